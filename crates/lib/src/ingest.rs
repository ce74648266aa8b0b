//! Video ingestion: upload a clip and wait until the backend has preprocessed it.
//!
//! The backend answers a single upload with either `processed` or `processing` once it
//! is done with the clip. There is no status route, so a `processing` answer is final for
//! that upload and the clip is never re-sent. The upload is bounded by its own timeout.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::attachment::{is_video_file, AttachmentKind};
use crate::backend::{BackendError, ChatBackend, IngestStatus, VideoUpload};
use crate::config::VideoConfig;
use crate::error::ValidationError;

/// Smallest `frameInterval` the backend accepts.
pub const MIN_FRAME_INTERVAL: u32 = 25;

#[derive(Debug, Clone, Copy)]
pub struct IngestSettings {
    /// Upper bound for the upload round trip.
    pub upload_timeout: Duration,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self::from_config(&VideoConfig::default())
    }
}

impl IngestSettings {
    pub fn from_config(video: &VideoConfig) -> Self {
        Self {
            upload_timeout: video.upload_timeout(),
        }
    }
}

/// What the backend said about the upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Processed,
    /// Accepted but not finished; the upload is not repeated.
    Processing,
}

/// Check file type and frame interval, then package the upload.
pub fn prepare_upload(
    file_name: impl Into<String>,
    bytes: Vec<u8>,
    frame_interval: u32,
) -> Result<VideoUpload, ValidationError> {
    let file_name = file_name.into();
    if !is_video_file(&file_name) {
        return Err(ValidationError::UnsupportedFile {
            kind: AttachmentKind::Video,
            name: file_name,
        });
    }
    if frame_interval < MIN_FRAME_INTERVAL {
        return Err(ValidationError::FrameInterval {
            min: MIN_FRAME_INTERVAL,
            got: frame_interval,
        });
    }
    Ok(VideoUpload {
        file_name,
        bytes,
        frame_interval,
    })
}

/// Read a video file from disk and package it for upload.
pub async fn read_upload(path: &Path, frame_interval: u32) -> Result<VideoUpload, ValidationError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    // Validate before reading so a wrong pick does not pull a large file into memory.
    prepare_upload(name.clone(), Vec::new(), frame_interval)?;
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ValidationError::Unreadable {
            name: name.clone(),
            reason: e.to_string(),
        })?;
    prepare_upload(name, bytes, frame_interval)
}

/// Sends one upload and waits for the backend's answer.
#[derive(Clone)]
pub struct VideoIngestor {
    backend: Arc<dyn ChatBackend>,
    settings: IngestSettings,
}

impl VideoIngestor {
    pub fn new(backend: Arc<dyn ChatBackend>, settings: IngestSettings) -> Self {
        Self { backend, settings }
    }

    /// Upload once. A backend that does not answer within `upload_timeout` yields
    /// [`BackendError::Timeout`].
    pub async fn run(&self, upload: &VideoUpload) -> Result<IngestOutcome, BackendError> {
        let status = tokio::time::timeout(
            self.settings.upload_timeout,
            self.backend.upload_video(upload),
        )
        .await
        .map_err(|_| {
            log::warn!(
                "upload of {} unanswered after {:?}",
                upload.file_name,
                self.settings.upload_timeout
            );
            BackendError::Timeout
        })??;
        match status {
            IngestStatus::Processed => {
                log::info!("video {} processed", upload.file_name);
                Ok(IngestOutcome::Processed)
            }
            IngestStatus::Processing => {
                log::info!("video {} accepted, still processing", upload.file_name);
                Ok(IngestOutcome::Processing)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{Call, ScriptedBackend};
    use tokio::sync::Semaphore;

    fn settings(upload_timeout: Duration) -> IngestSettings {
        IngestSettings { upload_timeout }
    }

    fn uploads(backend: &ScriptedBackend) -> usize {
        backend
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Upload { .. }))
            .count()
    }

    #[test]
    fn upload_requires_mp4() {
        let err = prepare_upload("clip.avi", vec![], 50).unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedFile { .. }));
    }

    #[test]
    fn upload_requires_minimum_frame_interval() {
        assert_eq!(
            prepare_upload("clip.mp4", vec![], 24).unwrap_err(),
            ValidationError::FrameInterval { min: 25, got: 24 }
        );
        assert!(prepare_upload("clip.mp4", vec![], 25).is_ok());
    }

    #[tokio::test]
    async fn read_upload_validates_before_reading() {
        let err = read_upload(Path::new("/nonexistent/clip.mp4"), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, ValidationError::FrameInterval { .. }));
        let err = read_upload(Path::new("/nonexistent/clip.mp4"), 50)
            .await
            .unwrap_err();
        assert!(matches!(err, ValidationError::Unreadable { .. }));
    }

    #[tokio::test]
    async fn processed_answer_settles() {
        let backend = Arc::new(ScriptedBackend::new().with_upload(Ok(IngestStatus::Processed)));
        let ingestor = VideoIngestor::new(backend.clone(), settings(Duration::from_secs(5)));
        let upload = prepare_upload("clip.mp4", vec![0; 4], 50).unwrap();
        assert_eq!(ingestor.run(&upload).await.unwrap(), IngestOutcome::Processed);
        assert_eq!(uploads(&backend), 1);
    }

    #[tokio::test]
    async fn processing_answer_is_not_resent() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .with_upload(Ok(IngestStatus::Processing))
                .with_upload(Ok(IngestStatus::Processed)),
        );
        let ingestor = VideoIngestor::new(backend.clone(), settings(Duration::from_secs(5)));
        let upload = prepare_upload("clip.mp4", vec![0; 4], 50).unwrap();
        assert_eq!(ingestor.run(&upload).await.unwrap(), IngestOutcome::Processing);
        assert_eq!(uploads(&backend), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_upload_times_out() {
        let gate = Arc::new(Semaphore::new(0));
        let backend = Arc::new(ScriptedBackend::new().with_upload_gate(gate));
        let ingestor = VideoIngestor::new(backend.clone(), settings(Duration::from_secs(30)));
        let upload = prepare_upload("clip.mp4", vec![], 25).unwrap();
        let start = tokio::time::Instant::now();
        assert!(matches!(ingestor.run(&upload).await, Err(BackendError::Timeout)));
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert_eq!(uploads(&backend), 1);
    }

    #[tokio::test]
    async fn network_error_propagates() {
        let backend = Arc::new(
            ScriptedBackend::new().with_upload(Err(BackendError::Api("413 Payload Too Large".into()))),
        );
        let ingestor = VideoIngestor::new(backend, settings(Duration::from_secs(5)));
        let upload = prepare_upload("clip.mp4", vec![], 25).unwrap();
        assert!(matches!(ingestor.run(&upload).await, Err(BackendError::Api(_))));
    }
}
