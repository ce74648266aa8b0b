//! One outbound request per submitted turn, with round-trip timing.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::attachment::{Attachment, AttachmentKind, AttachmentStager};
use crate::backend::{BackendError, ChatBackend};
use crate::error::ValidationError;
use crate::message::Message;
use crate::mode::{ChatMode, InferenceMode};

/// Backend route for one turn. A video turn always names its video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnRoute {
    Image,
    Video {
        inference: InferenceMode,
        video_id: String,
    },
}

/// Everything needed to send one turn, owned so nothing is read after the request suspends.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub text: String,
    pub attachment: Option<Attachment>,
    pub route: TurnRoute,
}

impl TurnRequest {
    /// Validate the compose area and, if it is sendable, take its contents.
    ///
    /// A refused turn leaves the compose area untouched. In video mode the staged video
    /// reference wins over the session's active video.
    pub fn from_compose(
        stager: &mut AttachmentStager,
        mode: ChatMode,
        active_video: Option<&str>,
    ) -> Result<Self, ValidationError> {
        if stager.text().trim().is_empty() {
            return Err(ValidationError::EmptyText);
        }
        let route = match mode {
            ChatMode::Image => TurnRoute::Image,
            ChatMode::Video(inference) => {
                let staged = stager
                    .pending()
                    .and_then(|p| p.attachment.video_id())
                    .map(str::to_string);
                let video_id = staged
                    .or_else(|| active_video.map(str::to_string))
                    .ok_or(ValidationError::MissingVideo)?;
                TurnRoute::Video {
                    inference,
                    video_id,
                }
            }
        };
        let snapshot = stager.take();
        Ok(Self {
            text: snapshot.text,
            attachment: snapshot.attachment.map(|p| p.attachment),
            route,
        })
    }

    /// The optimistic user entry for this turn.
    pub fn user_message(&self) -> Message {
        Message::user(
            self.text.clone(),
            self.attachment.as_ref().map(Attachment::reference),
        )
    }
}

/// Backend answer and how long it took.
#[derive(Debug, Clone)]
pub struct TurnReply {
    pub answer: String,
    pub elapsed: Duration,
}

impl TurnReply {
    pub fn into_message(self) -> Message {
        Message::bot(self.answer, self.elapsed)
    }
}

/// Sends turns to the backend route selected by chat mode.
#[derive(Clone)]
pub struct RequestDispatcher {
    backend: Arc<dyn ChatBackend>,
}

impl RequestDispatcher {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }

    /// Send `turn` and time the round trip on the monotonic clock.
    pub async fn dispatch(&self, turn: &TurnRequest) -> Result<TurnReply, BackendError> {
        let start = Instant::now();
        let answer = match &turn.route {
            TurnRoute::Video {
                inference,
                video_id,
            } => {
                self.backend
                    .video_chat(&turn.text, *inference, video_id)
                    .await?
            }
            TurnRoute::Image => {
                let image = turn
                    .attachment
                    .as_ref()
                    .filter(|a| a.kind() == AttachmentKind::Image);
                self.backend.image_chat(&turn.text, image).await?
            }
        };
        let elapsed = start.elapsed();
        log::info!("turn answered in {:.2}s", elapsed.as_secs_f64());
        Ok(TurnReply { answer, elapsed })
    }
}
