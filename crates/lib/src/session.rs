//! One open conversation: message log, compose area, chat mode and ingestion gate.
//!
//! `Session` is cheap to clone; clones share state. Operations never hold a lock across a
//! network call. When both locks are needed, `state` is taken before `log`.

use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

use crate::attachment::{Attachment, AttachmentKind, AttachmentStager, PendingAttachment};
use crate::backend::{BackendClient, ChatBackend, VideoUpload};
use crate::config::Config;
use crate::dispatcher::{RequestDispatcher, TurnRequest};
use crate::error::{EngineError, ValidationError};
use crate::ingest::{self, IngestOutcome, IngestSettings, VideoIngestor};
use crate::message::{AttachmentRef, Message, MessageLog};
use crate::mode::{ChatMode, ChatModeController, InferenceMode, VideoIngestionState};
use crate::reset::SessionResetCoordinator;

/// Unique session identifier (opaque string).
pub type SessionId = String;

/// Shown instead of sending while a video is being processed.
pub const PROCESSING_WARNING: &str =
    "Sending messages is disabled while processing video. Please wait.";

const EVENT_CAPACITY: usize = 64;

/// State changes, for front ends that render the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    MessageAppended(Message),
    HistoryCleared,
    ModeChanged(ChatMode),
    IngestionChanged(VideoIngestionState),
    AttachmentStaged(AttachmentRef),
    AttachmentCleared,
    AwaitingReply(bool),
    /// A turn failed after its user message was recorded.
    TurnFailed(String),
}

#[derive(Default)]
struct SessionState {
    modes: ChatModeController,
    compose: AttachmentStager,
    /// Name of the last video that finished ingestion.
    active_video: Option<String>,
    awaiting_reply: bool,
    /// An upload request is outstanding.
    uploading: bool,
}

#[derive(Clone)]
pub struct Session {
    id: SessionId,
    state: Arc<Mutex<SessionState>>,
    log: Arc<Mutex<MessageLog>>,
    dispatcher: RequestDispatcher,
    resetter: SessionResetCoordinator,
    ingestor: VideoIngestor,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    pub fn new(backend: Arc<dyn ChatBackend>, ingest: IngestSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            id: format!("sess-{}", uuid::Uuid::new_v4()),
            state: Arc::new(Mutex::new(SessionState::default())),
            log: Arc::new(Mutex::new(MessageLog::new())),
            dispatcher: RequestDispatcher::new(backend.clone()),
            resetter: SessionResetCoordinator::new(backend.clone()),
            ingestor: VideoIngestor::new(backend, ingest),
            events,
        }
    }

    /// Session against the HTTP backend named in `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(BackendClient::from_config(config)),
            IngestSettings::from_config(&config.video),
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn emit_mode_change(&self, before: ChatMode, after: ChatMode) {
        if before != after {
            self.emit(SessionEvent::ModeChanged(after));
        }
    }

    // ---- compose area ----

    pub async fn set_text(&self, text: impl Into<String>) {
        self.state.lock().await.compose.set_text(text);
    }

    /// Stage an attachment, replacing any staged one. The attachment kind picks the chat
    /// mode. Refused while a video is processing.
    pub async fn stage(&self, attachment: Attachment) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        let before = state.modes.mode();
        match attachment.kind() {
            AttachmentKind::Image => state.modes.on_image_attached()?,
            AttachmentKind::Video => state.modes.on_video_selected()?,
        };
        let after = state.modes.mode();
        let reference = attachment.reference();
        if let Some(replaced) = state.compose.stage(attachment) {
            log::debug!("replaced staged {}", replaced.attachment.name());
        }
        drop(state);
        self.emit_mode_change(before, after);
        self.emit(SessionEvent::AttachmentStaged(reference));
        Ok(())
    }

    /// Read a `.jpg`/`.jpeg`/`.png` file and stage it.
    pub async fn stage_image_file(&self, path: &Path) -> Result<(), EngineError> {
        let attachment = Attachment::image_file(path).await?;
        self.stage(attachment).await
    }

    /// Stage image bytes pasted from a clipboard.
    pub async fn paste_image(&self, mime: &str, bytes: Vec<u8>) -> Result<(), EngineError> {
        let attachment = Attachment::pasted_image(mime, bytes)?;
        self.stage(attachment).await
    }

    /// Stage an already ingested video by name.
    pub async fn stage_video_reference(&self, name: &str) -> Result<(), EngineError> {
        let attachment = Attachment::video_reference(name)?;
        self.stage(attachment).await
    }

    /// Drop the staged attachment. Returns false when nothing was staged.
    pub async fn remove_attachment(&self) -> bool {
        let removed = self.state.lock().await.compose.clear().is_some();
        if removed {
            self.emit(SessionEvent::AttachmentCleared);
        }
        removed
    }

    pub async fn compose_text(&self) -> String {
        self.state.lock().await.compose.text().to_string()
    }

    pub async fn staged(&self) -> Option<PendingAttachment> {
        self.state.lock().await.compose.pending().cloned()
    }

    // ---- modes ----

    pub async fn toggle_inference(&self) -> Result<InferenceMode, EngineError> {
        let mut state = self.state.lock().await;
        let before = state.modes.mode();
        let inference = state.modes.toggle_inference()?;
        let after = state.modes.mode();
        drop(state);
        self.emit_mode_change(before, after);
        Ok(inference)
    }

    pub async fn chat_mode(&self) -> ChatMode {
        self.state.lock().await.modes.mode()
    }

    /// Preferred inference strategy, also while in image mode.
    pub async fn inference(&self) -> InferenceMode {
        self.state.lock().await.modes.inference()
    }

    pub async fn ingestion_state(&self) -> VideoIngestionState {
        self.state.lock().await.modes.ingestion()
    }

    pub async fn active_video(&self) -> Option<String> {
        self.state.lock().await.active_video.clone()
    }

    pub async fn is_awaiting_reply(&self) -> bool {
        self.state.lock().await.awaiting_reply
    }

    /// Banner text for the compose area, if sending is currently blocked.
    pub async fn warning(&self) -> Option<&'static str> {
        if self.state.lock().await.modes.is_processing() {
            Some(PROCESSING_WARNING)
        } else {
            None
        }
    }

    // ---- turns ----

    /// Send the compose area as one turn.
    ///
    /// The user message is logged before the request goes out and stays on failure; the
    /// bot message is logged only on success. The compose area is taken as soon as the
    /// turn is accepted and emptied again when the turn resolves, whatever the outcome, so
    /// anything typed or staged while the reply is pending is discarded.
    pub async fn submit(&self) -> Result<Message, EngineError> {
        let turn = {
            let mut state = self.state.lock().await;
            if state.modes.is_processing() {
                return Err(ValidationError::IngestionInProgress.into());
            }
            if state.awaiting_reply {
                return Err(ValidationError::Busy.into());
            }
            let mode = state.modes.mode();
            let active_video = state.active_video.clone();
            let turn = TurnRequest::from_compose(&mut state.compose, mode, active_video.as_deref())?;
            state.awaiting_reply = true;
            let user = turn.user_message();
            self.log.lock().await.append(user.clone());
            drop(state);
            self.emit(SessionEvent::MessageAppended(user));
            if turn.attachment.is_some() {
                self.emit(SessionEvent::AttachmentCleared);
            }
            self.emit(SessionEvent::AwaitingReply(true));
            turn
        };

        let result = self.dispatcher.dispatch(&turn).await;

        let mut state = self.state.lock().await;
        state.awaiting_reply = false;
        let leftover = state.compose.take();
        if let Some(dropped) = &leftover.attachment {
            log::debug!(
                "discarding {} staged during the turn",
                dropped.attachment.name()
            );
        }
        let outcome = match result {
            Ok(reply) => {
                let bot = reply.into_message();
                self.log.lock().await.append(bot.clone());
                Ok(bot)
            }
            Err(e) => Err(e),
        };
        drop(state);
        if leftover.attachment.is_some() {
            self.emit(SessionEvent::AttachmentCleared);
        }
        match outcome {
            Ok(bot) => {
                self.emit(SessionEvent::MessageAppended(bot.clone()));
                self.emit(SessionEvent::AwaitingReply(false));
                Ok(bot)
            }
            Err(e) => {
                log::warn!("turn failed: {}", e);
                self.emit(SessionEvent::TurnFailed(e.to_string()));
                self.emit(SessionEvent::AwaitingReply(false));
                Err(e.into())
            }
        }
    }

    /// Replace the compose text with `text` and submit.
    pub async fn send(&self, text: impl Into<String>) -> Result<Message, EngineError> {
        self.set_text(text).await;
        self.submit().await
    }

    /// Log snapshot.
    pub async fn messages(&self) -> Vec<Message> {
        self.log.lock().await.messages().to_vec()
    }

    /// Log snapshot plus a loading placeholder while a reply is pending.
    pub async fn transcript(&self) -> Vec<Message> {
        let awaiting = self.state.lock().await.awaiting_reply;
        let mut messages = self.messages().await;
        if awaiting {
            messages.push(Message::placeholder());
        }
        messages
    }

    /// Clear server-side memory, then the local log. The log is kept if the backend refuses.
    pub async fn reset(&self) -> Result<usize, EngineError> {
        let cleared = self.resetter.reset(&self.log).await?;
        self.emit(SessionEvent::HistoryCleared);
        Ok(cleared)
    }

    // ---- video ----

    /// Upload video bytes and wait for the backend's answer. Returns the resulting
    /// ingestion state.
    ///
    /// `Processed` makes the video the active one and resets the conversation.
    /// `Processing` keeps submissions gated; the clip is not re-sent, and the gate is lifted
    /// by uploading again or by [`Session::remove_video`]. A failed or timed-out upload
    /// returns the state to `NotStarted`.
    pub async fn ingest_video(
        &self,
        file_name: impl Into<String>,
        bytes: Vec<u8>,
        frame_interval: u32,
    ) -> Result<VideoIngestionState, EngineError> {
        let upload = ingest::prepare_upload(file_name, bytes, frame_interval)?;
        self.run_ingestion(upload).await
    }

    pub async fn ingest_video_file(
        &self,
        path: &Path,
        frame_interval: u32,
    ) -> Result<VideoIngestionState, EngineError> {
        let upload = ingest::read_upload(path, frame_interval).await?;
        self.run_ingestion(upload).await
    }

    async fn run_ingestion(&self, upload: VideoUpload) -> Result<VideoIngestionState, EngineError> {
        {
            let mut state = self.state.lock().await;
            if state.uploading {
                return Err(ValidationError::IngestionInProgress.into());
            }
            if state.modes.is_processing() {
                log::info!("replacing an upload still processing on the backend");
                state.modes.abort_ingestion();
            }
            let before = state.modes.mode();
            state.modes.begin_ingestion()?;
            state.uploading = true;
            let after = state.modes.mode();
            drop(state);
            self.emit_mode_change(before, after);
            self.emit(SessionEvent::IngestionChanged(VideoIngestionState::Processing));
        }

        let outcome = self.ingestor.run(&upload).await;

        let mut state = self.state.lock().await;
        state.uploading = false;
        match outcome {
            Ok(IngestOutcome::Processed) => {
                state.modes.finish_ingestion();
                state.active_video = Some(upload.file_name.clone());
                drop(state);
                self.emit(SessionEvent::IngestionChanged(VideoIngestionState::Processed));
                if let Err(e) = self.reset().await {
                    log::warn!("reset after ingesting {} failed: {}", upload.file_name, e);
                }
                Ok(VideoIngestionState::Processed)
            }
            Ok(IngestOutcome::Processing) => Ok(VideoIngestionState::Processing),
            Err(e) => {
                state.modes.abort_ingestion();
                drop(state);
                log::warn!("ingesting {} failed: {}", upload.file_name, e);
                self.emit(SessionEvent::IngestionChanged(VideoIngestionState::NotStarted));
                Err(e.into())
            }
        }
    }

    /// Forget the active video (and a staged video reference); back to image chat.
    /// Refused while an upload is outstanding.
    pub async fn remove_video(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        if state.uploading {
            return Err(ValidationError::IngestionInProgress.into());
        }
        let before = state.modes.mode();
        if state.modes.is_processing() {
            state.modes.abort_ingestion();
        }
        state.modes.clear_video()?;
        state.active_video = None;
        let staged_video = state
            .compose
            .pending()
            .is_some_and(|p| p.attachment.kind() == AttachmentKind::Video);
        if staged_video {
            state.compose.clear();
        }
        let after = state.modes.mode();
        drop(state);
        self.emit_mode_change(before, after);
        self.emit(SessionEvent::IngestionChanged(VideoIngestionState::NotStarted));
        if staged_video {
            self.emit(SessionEvent::AttachmentCleared);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{Call, ScriptedBackend};
    use crate::backend::{BackendError, IngestStatus};
    use crate::error::ErrorKind;
    use crate::message::Sender;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    fn session_with(backend: ScriptedBackend) -> (Session, Arc<ScriptedBackend>) {
        let backend = Arc::new(backend);
        let settings = IngestSettings {
            upload_timeout: Duration::from_secs(60),
        };
        (Session::new(backend.clone(), settings), backend)
    }

    async fn wait_for_ingestion(session: &Session, want: VideoIngestionState) {
        while session.ingestion_state().await != want {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn image_turn_records_question_and_timed_answer() {
        let (session, backend) = session_with(
            ScriptedBackend::new()
                .with_answer(Ok("A cat.".into()))
                .with_delay(Duration::from_millis(1200)),
        );
        session
            .stage(Attachment::image("photo.jpg", vec![0xff, 0xd8]).unwrap())
            .await
            .unwrap();
        session.set_text("What is this?").await;
        session.submit().await.unwrap();

        let log = session.messages().await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].sender, Sender::User);
        assert_eq!(log[0].text, "What is this?");
        assert_eq!(
            log[0].attachment_ref,
            Some(AttachmentRef {
                kind: AttachmentKind::Image,
                name: "photo.jpg".into()
            })
        );
        assert_eq!(log[1].sender, Sender::Bot);
        assert_eq!(log[1].text, "A cat.");
        let latency = log[1].response_time_seconds.unwrap();
        assert!((1.2..1.3).contains(&latency), "latency {}", latency);
        assert_eq!(
            backend.calls(),
            vec![Call::Image {
                text: "What is this?".into(),
                image: Some("photo.jpg".into())
            }]
        );
    }

    #[tokio::test]
    async fn blank_submit_is_a_no_op() {
        let (session, backend) = session_with(ScriptedBackend::new());
        let err = session.send("  \t").await.unwrap_err();
        assert_eq!(err.as_validation(), Some(&ValidationError::EmptyText));
        assert_eq!(err.kind(), ErrorKind::ValidationFailure);
        assert!(session.messages().await.is_empty());
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_turn_keeps_user_message_and_clears_compose() {
        let (session, _) = session_with(
            ScriptedBackend::new().with_answer(Err(BackendError::Api("502 Bad Gateway".into()))),
        );
        session
            .stage(Attachment::image("a.png", vec![1]).unwrap())
            .await
            .unwrap();
        let err = session.send("hello").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NetworkFailure);

        let log = session.messages().await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].sender, Sender::User);
        assert!(session.compose_text().await.is_empty());
        assert!(session.staged().await.is_none());
        assert!(!session.is_awaiting_reply().await);
    }

    #[tokio::test]
    async fn every_turn_adds_one_user_and_at_most_one_bot_message() {
        let (session, _) = session_with(
            ScriptedBackend::new()
                .with_answer(Ok("one".into()))
                .with_answer(Err(BackendError::Timeout))
                .with_answer(Ok("three".into())),
        );
        for (text, expected_len) in [("a", 2), ("b", 3), ("c", 5)] {
            let _ = session.send(text).await;
            assert_eq!(session.messages().await.len(), expected_len);
            assert!(session.compose_text().await.is_empty());
        }
    }

    #[tokio::test]
    async fn second_submit_while_pending_is_busy() {
        let gate = Arc::new(Semaphore::new(0));
        let (session, backend) =
            session_with(ScriptedBackend::new().with_chat_gate(gate.clone()));
        let first = tokio::spawn({
            let session = session.clone();
            async move { session.send("first").await }
        });
        while !session.is_awaiting_reply().await {
            tokio::task::yield_now().await;
        }

        let transcript = session.transcript().await;
        assert_eq!(transcript.len(), 2);
        assert!(transcript[1].is_placeholder());

        let err = session.send("second").await.unwrap_err();
        assert_eq!(err.as_validation(), Some(&ValidationError::Busy));
        assert_eq!(session.compose_text().await, "second");

        gate.add_permits(1);
        first.await.unwrap().unwrap();
        assert_eq!(session.messages().await.len(), 2);
        assert_eq!(backend.calls().len(), 1);
    }

    #[tokio::test]
    async fn compose_area_is_empty_after_turn_resolves() {
        let gate = Arc::new(Semaphore::new(0));
        let (session, backend) =
            session_with(ScriptedBackend::new().with_chat_gate(gate.clone()));
        session
            .stage(Attachment::image("first.png", vec![1]).unwrap())
            .await
            .unwrap();
        let first = tokio::spawn({
            let session = session.clone();
            async move { session.send("one").await }
        });
        while !session.is_awaiting_reply().await {
            tokio::task::yield_now().await;
        }
        session
            .stage(Attachment::image("second.png", vec![2]).unwrap())
            .await
            .unwrap();
        session.set_text("typed meanwhile").await;
        let mut events = session.subscribe();
        gate.add_permits(2);
        first.await.unwrap().unwrap();

        assert!(session.staged().await.is_none());
        assert!(session.compose_text().await.is_empty());
        assert_eq!(events.recv().await.unwrap(), SessionEvent::AttachmentCleared);
        assert_eq!(
            backend.calls(),
            vec![Call::Image {
                text: "one".into(),
                image: Some("first.png".into())
            }]
        );
        let log = session.messages().await;
        assert_eq!(
            log[0].attachment_ref.as_ref().map(|a| a.name.as_str()),
            Some("first.png")
        );
    }

    #[tokio::test]
    async fn compose_area_is_empty_after_failed_turn_with_mid_flight_input() {
        let gate = Arc::new(Semaphore::new(0));
        let (session, _) = session_with(
            ScriptedBackend::new()
                .with_answer(Err(BackendError::Timeout))
                .with_chat_gate(gate.clone()),
        );
        let first = tokio::spawn({
            let session = session.clone();
            async move { session.send("one").await }
        });
        while !session.is_awaiting_reply().await {
            tokio::task::yield_now().await;
        }
        session.set_text("draft").await;
        gate.add_permits(1);
        assert!(first.await.unwrap().is_err());
        assert!(session.compose_text().await.is_empty());
        assert!(session.staged().await.is_none());
    }

    #[tokio::test]
    async fn reset_empties_log_only_when_backend_confirms() {
        let (session, _) = session_with(ScriptedBackend::new());
        session.send("hi").await.unwrap();
        assert_eq!(session.reset().await.unwrap(), 2);
        assert!(session.messages().await.is_empty());

        let (session, _) = session_with(ScriptedBackend::new().failing_reset());
        session.send("hi").await.unwrap();
        let err = session.reset().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NetworkFailure);
        assert_eq!(session.messages().await.len(), 2);
    }

    #[tokio::test]
    async fn staging_an_image_leaves_video_mode() {
        let (session, backend) = session_with(ScriptedBackend::new());
        session.ingest_video("clip.mp4", vec![0], 25).await.unwrap();
        assert!(session.chat_mode().await.is_video());

        let mut events = session.subscribe();
        session
            .stage(Attachment::image("photo.png", vec![1]).unwrap())
            .await
            .unwrap();
        assert_eq!(session.chat_mode().await, ChatMode::Image);
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::ModeChanged(ChatMode::Image)
        );

        session.send("and this?").await.unwrap();
        assert!(matches!(backend.calls().last(), Some(Call::Image { .. })));
    }

    #[tokio::test]
    async fn video_ingestion_gates_submission_then_resets() {
        let gate = Arc::new(Semaphore::new(0));
        let (session, backend) = session_with(
            ScriptedBackend::new()
                .with_upload(Ok(IngestStatus::Processed))
                .with_upload_gate(gate.clone()),
        );
        session.send("before").await.unwrap();
        assert_eq!(session.ingestion_state().await, VideoIngestionState::NotStarted);

        let ingest = tokio::spawn({
            let session = session.clone();
            async move { session.ingest_video("clip.mp4", vec![0; 16], 50).await }
        });
        wait_for_ingestion(&session, VideoIngestionState::Processing).await;

        let before = session.messages().await.len();
        let err = session.send("what happens?").await.unwrap_err();
        assert_eq!(err.as_validation(), Some(&ValidationError::IngestionInProgress));
        assert_eq!(session.messages().await.len(), before);
        assert_eq!(session.warning().await, Some(PROCESSING_WARNING));
        assert!(session.toggle_inference().await.is_err());
        assert!(session.remove_video().await.is_err());

        gate.add_permits(1);
        assert_eq!(ingest.await.unwrap().unwrap(), VideoIngestionState::Processed);

        assert_eq!(session.ingestion_state().await, VideoIngestionState::Processed);
        assert_eq!(session.active_video().await.as_deref(), Some("clip.mp4"));
        assert_eq!(
            session.chat_mode().await,
            ChatMode::Video(InferenceMode::FullContext)
        );
        assert!(session.messages().await.is_empty());
        assert_eq!(session.warning().await, None);
        assert_eq!(
            backend.calls()[1..],
            [
                Call::Upload {
                    file_name: "clip.mp4".into(),
                    frame_interval: 50,
                },
                Call::Reset
            ]
        );

        session.send("what happens?").await.unwrap();
        assert_eq!(
            backend.calls().last(),
            Some(&Call::Video {
                text: "what happens?".into(),
                inference: InferenceMode::FullContext,
                video_id: "clip.mp4".into()
            })
        );
    }

    #[tokio::test]
    async fn processing_answer_keeps_gate_without_resending() {
        let (session, backend) = session_with(
            ScriptedBackend::new()
                .with_upload(Ok(IngestStatus::Processing))
                .with_upload(Ok(IngestStatus::Processed)),
        );
        let state = session.ingest_video("clip.mp4", vec![0; 8], 50).await.unwrap();
        assert_eq!(state, VideoIngestionState::Processing);
        assert_eq!(session.ingestion_state().await, VideoIngestionState::Processing);
        assert_eq!(session.warning().await, Some(PROCESSING_WARNING));
        assert!(session.active_video().await.is_none());
        let err = session.send("anything?").await.unwrap_err();
        assert_eq!(err.as_validation(), Some(&ValidationError::IngestionInProgress));

        tokio::task::yield_now().await;
        assert_eq!(backend.calls().len(), 1);

        // a fresh upload replaces the pending one
        let state = session.ingest_video("clip.mp4", vec![0; 8], 50).await.unwrap();
        assert_eq!(state, VideoIngestionState::Processed);
        assert_eq!(session.active_video().await.as_deref(), Some("clip.mp4"));
        assert!(matches!(backend.calls().last(), Some(Call::Reset)));
    }

    #[tokio::test]
    async fn processing_video_can_be_removed_once_answered() {
        let (session, _) =
            session_with(ScriptedBackend::new().with_upload(Ok(IngestStatus::Processing)));
        session.ingest_video("clip.mp4", vec![], 25).await.unwrap();
        session.remove_video().await.unwrap();
        assert_eq!(session.ingestion_state().await, VideoIngestionState::NotStarted);
        assert_eq!(session.chat_mode().await, ChatMode::Image);
        session.send("hello").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_upload_times_out_and_lifts_gate() {
        let gate = Arc::new(Semaphore::new(0));
        let (session, backend) = session_with(ScriptedBackend::new().with_upload_gate(gate));
        let err = session
            .ingest_video("clip.mp4", vec![], 25)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NetworkFailure);
        assert!(matches!(err, EngineError::Network(BackendError::Timeout)));
        assert_eq!(session.ingestion_state().await, VideoIngestionState::NotStarted);
        assert!(session.active_video().await.is_none());
        assert_eq!(session.warning().await, None);
        assert_eq!(backend.calls().len(), 1);

        session.send("still here?").await.unwrap();
    }

    #[tokio::test]
    async fn invalid_upload_is_refused_before_any_call() {
        let (session, backend) = session_with(ScriptedBackend::new());
        let err = session.ingest_video("clip.mp4", vec![], 10).await.unwrap_err();
        assert_eq!(
            err.as_validation(),
            Some(&ValidationError::FrameInterval { min: 25, got: 10 })
        );
        let err = session.ingest_video("clip.mov", vec![], 50).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailure);
        assert!(backend.calls().is_empty());
        assert_eq!(session.ingestion_state().await, VideoIngestionState::NotStarted);
    }

    #[tokio::test]
    async fn removing_video_returns_to_image_chat() {
        let (session, backend) = session_with(ScriptedBackend::new());
        session.ingest_video("clip.mp4", vec![], 25).await.unwrap();
        session.remove_video().await.unwrap();
        assert_eq!(session.chat_mode().await, ChatMode::Image);
        assert_eq!(session.ingestion_state().await, VideoIngestionState::NotStarted);
        assert!(session.active_video().await.is_none());

        session.stage_video_reference("clip.mp4").await.unwrap();
        session.remove_video().await.unwrap();
        assert!(session.staged().await.is_none());

        // back in image mode a plain question goes to the image route
        session.send("hello").await.unwrap();
        assert!(matches!(backend.calls().last(), Some(Call::Image { image: None, .. })));
    }

    #[tokio::test]
    async fn toggle_changes_strategy_used_for_video_turns() {
        let (session, backend) = session_with(ScriptedBackend::new());
        assert_eq!(
            session.toggle_inference().await.unwrap(),
            InferenceMode::VectorDbTimestamp
        );
        assert_eq!(session.chat_mode().await, ChatMode::Image);
        session.ingest_video("clip.mp4", vec![], 25).await.unwrap();
        assert_eq!(
            session.chat_mode().await,
            ChatMode::Video(InferenceMode::VectorDbTimestamp)
        );
        session.send("when?").await.unwrap();
        assert!(matches!(
            backend.calls().last(),
            Some(Call::Video {
                inference: InferenceMode::VectorDbTimestamp,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn events_follow_a_turn() {
        let (session, _) = session_with(ScriptedBackend::new().with_answer(Ok("yes".into())));
        let mut events = session.subscribe();
        session.send("ok?").await.unwrap();
        let mut seen = Vec::new();
        while let Ok(e) = events.try_recv() {
            seen.push(e);
        }
        assert!(matches!(&seen[0], SessionEvent::MessageAppended(m) if m.text == "ok?"));
        assert_eq!(seen[1], SessionEvent::AwaitingReply(true));
        assert!(matches!(&seen[2], SessionEvent::MessageAppended(m) if m.text == "yes"));
        assert_eq!(seen[3], SessionEvent::AwaitingReply(false));
    }
}
