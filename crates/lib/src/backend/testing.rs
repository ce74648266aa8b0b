//! In-process backend for unit tests: scripted answers, recorded calls.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

use super::{BackendError, ChatBackend, IngestStatus, VideoUpload};
use crate::attachment::Attachment;
use crate::mode::InferenceMode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Image {
        text: String,
        image: Option<String>,
    },
    Video {
        text: String,
        inference: InferenceMode,
        video_id: String,
    },
    Upload {
        file_name: String,
        frame_interval: u32,
    },
    Reset,
}

#[derive(Default)]
pub(crate) struct ScriptedBackend {
    calls: Mutex<Vec<Call>>,
    answers: Mutex<VecDeque<Result<String, BackendError>>>,
    uploads: Mutex<VecDeque<Result<IngestStatus, BackendError>>>,
    delay: Duration,
    /// When set, each upload waits for one permit before answering.
    upload_gate: Option<Arc<Semaphore>>,
    /// When set, each chat call waits for one permit before answering.
    chat_gate: Option<Arc<Semaphore>>,
    reset_fails: AtomicBool,
}

impl ScriptedBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_answer(self, answer: Result<String, BackendError>) -> Self {
        lock(&self.answers).push_back(answer);
        self
    }

    pub(crate) fn with_upload(self, status: Result<IngestStatus, BackendError>) -> Self {
        lock(&self.uploads).push_back(status);
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn with_upload_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.upload_gate = Some(gate);
        self
    }

    pub(crate) fn with_chat_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.chat_gate = Some(gate);
        self
    }

    pub(crate) fn failing_reset(self) -> Self {
        self.reset_fails.store(true, Ordering::SeqCst);
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    fn record(&self, call: Call) {
        lock(&self.calls).push(call);
    }

    async fn answer(&self) -> Result<String, BackendError> {
        if let Some(gate) = &self.chat_gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        lock(&self.answers)
            .pop_front()
            .unwrap_or_else(|| Ok("ok".to_string()))
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn image_chat(
        &self,
        text: &str,
        image: Option<&Attachment>,
    ) -> Result<String, BackendError> {
        self.record(Call::Image {
            text: text.to_string(),
            image: image.map(|a| a.name().to_string()),
        });
        self.answer().await
    }

    async fn video_chat(
        &self,
        text: &str,
        inference: InferenceMode,
        video_id: &str,
    ) -> Result<String, BackendError> {
        self.record(Call::Video {
            text: text.to_string(),
            inference,
            video_id: video_id.to_string(),
        });
        self.answer().await
    }

    async fn upload_video(&self, upload: &VideoUpload) -> Result<IngestStatus, BackendError> {
        self.record(Call::Upload {
            file_name: upload.file_name.clone(),
            frame_interval: upload.frame_interval,
        });
        if let Some(gate) = &self.upload_gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        lock(&self.uploads)
            .pop_front()
            .unwrap_or(Ok(IngestStatus::Processed))
    }

    async fn reset_chat_history(&self) -> Result<(), BackendError> {
        self.record(Call::Reset);
        if self.reset_fails.load(Ordering::SeqCst) {
            Err(BackendError::Api("500 Internal Server Error".to_string()))
        } else {
            Ok(())
        }
    }
}
