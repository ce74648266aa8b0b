//! Capture state machine: one device feeding one audio socket.
//!
//! The device is started before the socket task is spawned, so a device failure never
//! opens a connection. Stopping is bounded: the socket task gets `drain_timeout` to send
//! what is queued and close, after which it is aborted and the streamer is Idle anyway.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::device::{CaptureDevice, CaptureError};
use super::frames::{frame_queue, FrameProducer};
use super::socket::{
    run_socket_sender, SentCounter, SocketConnector, StreamReport, WebSocketConnector,
};
use super::{AudioEvent, CaptureState};
use crate::config::{self, Config};

const EVENT_CAPACITY: usize = 32;
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

struct ActiveCapture {
    device: Box<dyn CaptureDevice>,
    producer: FrameProducer,
    sender: JoinHandle<StreamReport>,
    sent: SentCounter,
}

/// Idle/Capturing state machine over one capture device and one audio socket.
pub struct AudioCaptureStreamer {
    connector: Arc<dyn SocketConnector>,
    queue_capacity: usize,
    drain_timeout: Duration,
    active: Option<ActiveCapture>,
    events: broadcast::Sender<AudioEvent>,
}

impl AudioCaptureStreamer {
    pub fn new(connector: Arc<dyn SocketConnector>, queue_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            connector,
            queue_capacity,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            active: None,
            events,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let url = config::resolve_audio_socket_url(config);
        let connector =
            WebSocketConnector::new(url).with_connect_timeout(config.audio.connect_timeout());
        Self::new(Arc::new(connector), config.audio.queue_capacity)
            .with_drain_timeout(config.audio.drain_timeout())
    }

    /// How long `stop_capture` waits for the socket task before aborting it.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn state(&self) -> CaptureState {
        if self.active.is_some() {
            CaptureState::Capturing
        } else {
            CaptureState::Idle
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AudioEvent> {
        self.events.subscribe()
    }

    /// Start `device` and stream its frames. Returns `Ok(false)` (and leaves `device`
    /// unused) when already capturing. The socket is opened only once the device runs;
    /// frames produced meanwhile are queued.
    pub async fn start_capture(
        &mut self,
        mut device: Box<dyn CaptureDevice>,
    ) -> Result<bool, CaptureError> {
        if self.active.is_some() {
            log::debug!("start_capture ignored: already capturing");
            return Ok(false);
        }
        let (producer, receiver) = frame_queue(self.queue_capacity);
        if let Err(e) = device.start(producer.clone()).await {
            log::warn!("capture device {} failed to start: {}", device.name(), e);
            if let Err(stop_err) = device.stop().await {
                log::debug!("release after failed start: {}", stop_err);
            }
            return Err(e);
        }
        log::info!("capturing from {}", device.name());
        let sent = SentCounter::default();
        let sender = tokio::spawn(run_socket_sender(
            self.connector.clone(),
            receiver,
            self.events.clone(),
            sent.clone(),
        ));
        self.active = Some(ActiveCapture {
            device,
            producer,
            sender,
            sent,
        });
        let _ = self
            .events
            .send(AudioEvent::StateChanged(CaptureState::Capturing));
        Ok(true)
    }

    /// Stop the device, let the socket task send everything it produced, then close.
    /// No-op (`Ok(None)`) when idle. The streamer is Idle afterwards on every path; a
    /// socket task still running after `drain_timeout` is aborted and whatever it had not
    /// sent is counted as lost.
    pub async fn stop_capture(&mut self) -> Result<Option<StreamReport>, CaptureError> {
        let Some(mut active) = self.active.take() else {
            return Ok(None);
        };
        let stopped = active.device.stop().await;
        active.producer.finish();
        let abort = active.sender.abort_handle();
        let report = match tokio::time::timeout(self.drain_timeout, &mut active.sender).await {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                log::warn!("audio socket task ended abnormally: {}", e);
                unsent_report(&active)
            }
            Err(_) => {
                log::warn!(
                    "audio socket task still busy after {:?}, aborting",
                    self.drain_timeout
                );
                abort.abort();
                let _ = self.events.send(AudioEvent::SocketFailure(
                    "audio socket did not drain in time".to_string(),
                ));
                unsent_report(&active)
            }
        };
        let _ = self.events.send(AudioEvent::StateChanged(CaptureState::Idle));
        log::info!(
            "capture stopped: {} produced, {} sent, {} lost",
            report.frames_produced,
            report.frames_sent,
            report.frames_lost
        );
        stopped?;
        Ok(Some(report))
    }
}

/// Report for a socket task that did not finish on its own.
fn unsent_report(active: &ActiveCapture) -> StreamReport {
    let produced = active.producer.produced();
    let sent = active.sent.get();
    StreamReport {
        frames_produced: produced,
        frames_sent: sent,
        frames_lost: produced.saturating_sub(sent),
    }
}

impl Drop for AudioCaptureStreamer {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            log::warn!("audio streamer dropped while capturing; stop_capture was not called");
            active.producer.finish();
        }
    }
}
