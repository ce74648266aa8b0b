//! Inference backend: the four HTTP routes a session talks to.
//!
//! [`ChatBackend`] is the seam the engine is written against; [`BackendClient`] is the
//! multipart HTTP implementation.

mod client;

pub use client::{BackendClient, BackendError};

use async_trait::async_trait;
use serde::Deserialize;

use crate::attachment::Attachment;
use crate::mode::InferenceMode;

/// Terminal or interim status returned by a video upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Processed,
    Processing,
}

/// Video bytes and sampling interval for `upload_video`.
#[derive(Debug, Clone)]
pub struct VideoUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub frame_interval: u32,
}

/// Remote operations used by a session.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Ask about an optional image; returns the answer text.
    async fn image_chat(&self, text: &str, image: Option<&Attachment>)
        -> Result<String, BackendError>;

    /// Ask about an ingested video; returns the answer text.
    async fn video_chat(
        &self,
        text: &str,
        inference: InferenceMode,
        video_id: &str,
    ) -> Result<String, BackendError>;

    /// Upload a video for ingestion.
    async fn upload_video(&self, upload: &VideoUpload) -> Result<IngestStatus, BackendError>;

    /// Drop server-side conversational memory.
    async fn reset_chat_history(&self) -> Result<(), BackendError>;
}

#[cfg(test)]
pub(crate) mod testing;
