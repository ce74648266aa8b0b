//! Chat mode state machine.
//!
//! The next turn is routed by [`ChatMode`]: `Image` goes to the image chatbot, `Video`
//! carries an [`InferenceMode`] and goes to the video chatbot. Keeping the inference
//! strategy inside the `Video` variant means it cannot be set while chatting about an
//! image. [`VideoIngestionState`] gates every transition: while a video is processing,
//! only the ingestion outcome may move the machine.
//!
//! Transitions:
//! - image attached -> `Image`
//! - video attached or selected -> `Video(preferred inference)`
//! - explicit toggle -> flips the inference strategy, chat mode unchanged
//! - ingestion started -> `Video`, `Processing`
//! - ingestion finished -> `Processed`; aborted -> `NotStarted`
//! - video removed -> `Image`, `NotStarted`

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;

/// Retrieval strategy for video chat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InferenceMode {
    /// Whole-video context.
    #[default]
    #[serde(rename = "Full Context")]
    FullContext,
    /// Vector search over timestamped segments.
    #[serde(rename = "VectorDB Timestamp")]
    VectorDbTimestamp,
}

impl InferenceMode {
    /// Value of the `inference_type` form field.
    pub fn as_wire(&self) -> &'static str {
        match self {
            InferenceMode::FullContext => "Full Context",
            InferenceMode::VectorDbTimestamp => "VectorDB Timestamp",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            InferenceMode::FullContext => InferenceMode::VectorDbTimestamp,
            InferenceMode::VectorDbTimestamp => InferenceMode::FullContext,
        }
    }
}

impl fmt::Display for InferenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Which backend route the next turn uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChatMode {
    #[default]
    Image,
    Video(InferenceMode),
}

impl ChatMode {
    pub fn is_video(&self) -> bool {
        matches!(self, ChatMode::Video(_))
    }

    pub fn inference(&self) -> Option<InferenceMode> {
        match self {
            ChatMode::Image => None,
            ChatMode::Video(m) => Some(*m),
        }
    }
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatMode::Image => f.write_str("Image"),
            ChatMode::Video(m) => write!(f, "Video ({})", m),
        }
    }
}

/// Server-side preprocessing status of the uploaded video.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VideoIngestionState {
    #[default]
    NotStarted,
    Processing,
    Processed,
}

impl fmt::Display for VideoIngestionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoIngestionState::NotStarted => write!(f, "not started"),
            VideoIngestionState::Processing => write!(f, "processing"),
            VideoIngestionState::Processed => write!(f, "processed"),
        }
    }
}

/// Current mode plus the ingestion gate.
#[derive(Debug, Clone, Default)]
pub struct ChatModeController {
    mode: ChatMode,
    /// Last inference strategy the user picked; restored when returning to video chat.
    preferred: InferenceMode,
    ingestion: VideoIngestionState,
}

impl ChatModeController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> ChatMode {
        self.mode
    }

    pub fn inference(&self) -> InferenceMode {
        self.preferred
    }

    pub fn ingestion(&self) -> VideoIngestionState {
        self.ingestion
    }

    pub fn is_processing(&self) -> bool {
        self.ingestion == VideoIngestionState::Processing
    }

    fn ensure_idle(&self) -> Result<(), ValidationError> {
        if self.is_processing() {
            Err(ValidationError::IngestionInProgress)
        } else {
            Ok(())
        }
    }

    /// An image was staged: switch to image chat.
    pub fn on_image_attached(&mut self) -> Result<ChatMode, ValidationError> {
        self.ensure_idle()?;
        self.set_mode(ChatMode::Image);
        Ok(self.mode)
    }

    /// A video was staged or selected for chat: switch to video chat with the preferred strategy.
    pub fn on_video_selected(&mut self) -> Result<ChatMode, ValidationError> {
        self.ensure_idle()?;
        self.set_mode(ChatMode::Video(self.preferred));
        Ok(self.mode)
    }

    /// Flip the inference strategy. Chat mode is left as is.
    pub fn toggle_inference(&mut self) -> Result<InferenceMode, ValidationError> {
        self.ensure_idle()?;
        self.preferred = self.preferred.toggled();
        if let ChatMode::Video(_) = self.mode {
            self.mode = ChatMode::Video(self.preferred);
        }
        log::debug!("inference mode: {}", self.preferred);
        Ok(self.preferred)
    }

    /// Upload accepted for processing: video chat, submissions gated.
    pub fn begin_ingestion(&mut self) -> Result<(), ValidationError> {
        self.ensure_idle()?;
        self.set_mode(ChatMode::Video(self.preferred));
        self.set_ingestion(VideoIngestionState::Processing);
        Ok(())
    }

    pub fn finish_ingestion(&mut self) {
        self.set_ingestion(VideoIngestionState::Processed);
    }

    pub fn abort_ingestion(&mut self) {
        self.set_ingestion(VideoIngestionState::NotStarted);
    }

    /// The video was removed: back to image chat with nothing ingested.
    pub fn clear_video(&mut self) -> Result<(), ValidationError> {
        self.ensure_idle()?;
        self.set_mode(ChatMode::Image);
        self.set_ingestion(VideoIngestionState::NotStarted);
        Ok(())
    }

    fn set_mode(&mut self, mode: ChatMode) {
        if self.mode != mode {
            log::debug!("chat mode: {} -> {}", self.mode, mode);
            self.mode = mode;
        }
    }

    fn set_ingestion(&mut self, state: VideoIngestionState) {
        if self.ingestion != state {
            log::info!("video ingestion: {} -> {}", self.ingestion, state);
            self.ingestion = state;
        }
    }
}
