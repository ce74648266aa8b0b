//! Live audio: capture device → ordered frame queue → dedicated WebSocket.
//!
//! Runs independently of the chat flow. The device pushes frames without ever waiting on
//! the network; one consumer task owns the socket and sends frames in capture order.

mod device;
mod frames;
#[cfg(feature = "microphone")]
mod microphone;
mod socket;
mod streamer;

pub use device::{CaptureDevice, CaptureError, FileCaptureDevice};
pub use frames::{frame_queue, AudioFrame, FrameProducer, FrameReceiver};
#[cfg(feature = "microphone")]
pub use microphone::MicrophoneDevice;
pub use socket::{FrameSink, SocketConnector, SocketError, StreamReport, WebSocketConnector};
pub use streamer::AudioCaptureStreamer;

/// Capture lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    #[default]
    Idle,
    Capturing,
}

/// Published by the streamer for front ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioEvent {
    StateChanged(CaptureState),
    /// The socket failed; capture keeps running and later frames are counted as lost.
    SocketFailure(String),
}
