//! Session reset: forget the conversation on both ends.

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::backend::{BackendError, ChatBackend};
use crate::message::MessageLog;

/// Clears server-side memory, then the local transcript.
#[derive(Clone)]
pub struct SessionResetCoordinator {
    backend: Arc<dyn ChatBackend>,
}

impl SessionResetCoordinator {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }

    /// Ask the backend to drop its history; clear `transcript` only once it confirms.
    /// Returns how many local messages were removed. On failure the transcript is kept.
    pub async fn reset(&self, transcript: &Mutex<MessageLog>) -> Result<usize, BackendError> {
        if let Err(e) = self.backend.reset_chat_history().await {
            log::warn!("reset chat history failed, keeping transcript: {}", e);
            return Err(e);
        }
        let cleared = transcript.lock().await.clear();
        log::info!("chat history reset ({} messages cleared)", cleared);
        Ok(cleared)
    }
}
