//! Engine-level error taxonomy.
//!
//! Every failure maps onto one of four kinds. None of them is fatal to the session.

use crate::attachment::AttachmentKind;
use crate::audio::{CaptureError, SocketError};
use crate::backend::BackendError;

/// Coarse classification used by front ends to decide how to surface a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Request rejected, timed out, or answered with a malformed body.
    NetworkFailure,
    /// Microphone missing, busy, or not permitted.
    DeviceAccessFailure,
    /// Audio socket closed or errored.
    SocketFailure,
    /// Refused locally before any network call.
    ValidationFailure,
}

/// Reasons an operation is refused before it reaches the backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("message text is empty")]
    EmptyText,
    #[error("a reply is still pending")]
    Busy,
    #[error("sending is disabled while the video is processing")]
    IngestionInProgress,
    #[error("no video is available for video chat")]
    MissingVideo,
    #[error("unsupported {kind} file: {name}")]
    UnsupportedFile { kind: AttachmentKind, name: String },
    #[error("pasted content is not an image: {0}")]
    NotAnImage(String),
    #[error("cannot read {name}: {reason}")]
    Unreadable { name: String, reason: String },
    #[error("frame interval must be at least {min}, got {got}")]
    FrameInterval { min: u32, got: u32 },
}

/// Error returned by session operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("network failure: {0}")]
    Network(#[from] BackendError),
    #[error("device access failure: {0}")]
    Device(#[from] CaptureError),
    #[error("socket failure: {0}")]
    Socket(#[from] SocketError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::ValidationFailure,
            EngineError::Network(_) => ErrorKind::NetworkFailure,
            EngineError::Device(_) => ErrorKind::DeviceAccessFailure,
            EngineError::Socket(_) => ErrorKind::SocketFailure,
        }
    }

    /// The validation reason when this is a local refusal.
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            EngineError::Validation(v) => Some(v),
            _ => None,
        }
    }
}
