//! Audio socket: one outbound WebSocket per capture, binary frames only.

use async_trait::async_trait;
use futures_util::SinkExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::frames::FrameReceiver;
use super::AudioEvent;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SocketError {
    #[error("audio socket connect failed: {0}")]
    Connect(String),
    #[error("audio socket send failed: {0}")]
    Send(String),
    #[error("audio socket closed")]
    Closed,
}

impl From<tungstenite::Error> for SocketError {
    fn from(e: tungstenite::Error) -> Self {
        match e {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                SocketError::Closed
            }
            other => SocketError::Send(other.to_string()),
        }
    }
}

/// An open socket that accepts binary frames.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_frame(&mut self, data: Vec<u8>) -> Result<(), SocketError>;

    async fn close(&mut self) -> Result<(), SocketError>;
}

/// Opens the socket for one capture session.
#[async_trait]
pub trait SocketConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn FrameSink>, SocketError>;
}

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connects to `ws://<host>/audio-stream` (or whatever URL is configured).
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Bound on TCP connect plus the WebSocket handshake.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

struct WebSocketSink {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl SocketConnector for WebSocketConnector {
    async fn connect(&self) -> Result<Box<dyn FrameSink>, SocketError> {
        let (ws, _) = tokio::time::timeout(
            self.connect_timeout,
            tokio_tungstenite::connect_async(self.url.as_str()),
        )
        .await
        .map_err(|_| {
            SocketError::Connect(format!(
                "{}: no handshake within {:?}",
                self.url, self.connect_timeout
            ))
        })?
        .map_err(|e| SocketError::Connect(format!("{}: {}", self.url, e)))?;
        log::info!("audio socket open: {}", self.url);
        Ok(Box::new(WebSocketSink { ws }))
    }
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send_frame(&mut self, data: Vec<u8>) -> Result<(), SocketError> {
        self.ws.send(Message::Binary(data)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SocketError> {
        match self.ws.close(None).await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Frame accounting for one capture session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamReport {
    pub frames_produced: u64,
    pub frames_sent: u64,
    /// Frames that could not be sent because the socket failed.
    pub frames_lost: u64,
}

/// Frames delivered so far, readable while the sender task is still running.
#[derive(Debug, Clone, Default)]
pub(crate) struct SentCounter(Arc<AtomicU64>);

impl SentCounter {
    fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Consumer task: owns the socket from connect to close.
///
/// Frames queue up while the connection is being established. A socket failure is
/// reported once; the task keeps draining so the producer is never stalled, counting
/// the rest as lost. The socket is closed only after the end marker has been received.
pub(crate) async fn run_socket_sender(
    connector: Arc<dyn SocketConnector>,
    mut frames: FrameReceiver,
    events: broadcast::Sender<AudioEvent>,
    sent: SentCounter,
) -> StreamReport {
    let mut report = StreamReport::default();
    let mut sink = match connector.connect().await {
        Ok(sink) => Some(sink),
        Err(e) => {
            log::warn!("{}", e);
            let _ = events.send(AudioEvent::SocketFailure(e.to_string()));
            None
        }
    };
    while let Some(frame) = frames.recv().await {
        report.frames_produced += 1;
        let Some(open) = sink.as_mut() else {
            report.frames_lost += 1;
            continue;
        };
        match open.send_frame(frame.data).await {
            Ok(()) => {
                report.frames_sent += 1;
                sent.increment();
            }
            Err(e) => {
                log::warn!("audio frame {} not sent: {}", frame.seq, e);
                let _ = events.send(AudioEvent::SocketFailure(e.to_string()));
                report.frames_lost += 1;
                sink = None;
            }
        }
    }
    if let Some(mut open) = sink {
        if let Err(e) = open.close().await {
            log::warn!("audio socket close: {}", e);
        }
    }
    log::debug!(
        "audio stream done: {} sent, {} lost",
        report.frames_sent,
        report.frames_lost
    );
    report
}
