//! Capture devices: anything that can push audio frames into a [`FrameProducer`].

use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::frames::FrameProducer;
use crate::config::AudioConfig;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("capture device unavailable: {0}")]
    Unavailable(String),
    #[error("capture permission denied: {0}")]
    PermissionDenied(String),
    #[error("capture device error: {0}")]
    Device(String),
    #[error("capture io error: {0}")]
    Io(#[from] io::Error),
}

/// A source of audio frames.
///
/// `start` must return only once the device is producing (or has failed); `stop` must
/// flush any partially filled frame before returning and release the device on every path.
#[async_trait]
pub trait CaptureDevice: Send {
    fn name(&self) -> &str;

    async fn start(&mut self, frames: FrameProducer) -> Result<(), CaptureError>;

    async fn stop(&mut self) -> Result<(), CaptureError>;
}

/// Replays a recorded file as fixed-size frames at a steady pace.
pub struct FileCaptureDevice {
    path: PathBuf,
    name: String,
    frame_bytes: usize,
    pacing: Duration,
    running: Option<(oneshot::Sender<()>, JoinHandle<io::Result<u64>>)>,
}

impl FileCaptureDevice {
    pub fn new(path: impl Into<PathBuf>, frame_bytes: usize, pacing: Duration) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            path,
            name,
            frame_bytes: frame_bytes.max(1),
            pacing,
            running: None,
        }
    }

    pub fn from_config(path: impl Into<PathBuf>, audio: &AudioConfig) -> Self {
        Self::new(path, audio.frame_bytes, audio.frame_pacing())
    }
}

#[async_trait]
impl CaptureDevice for FileCaptureDevice {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self, frames: FrameProducer) -> Result<(), CaptureError> {
        if self.running.is_some() {
            return Err(CaptureError::Device(format!("{} already started", self.name)));
        }
        let file = tokio::fs::File::open(&self.path).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                CaptureError::Unavailable(format!("{}: {}", self.path.display(), e))
            }
            io::ErrorKind::PermissionDenied => {
                CaptureError::PermissionDenied(format!("{}: {}", self.path.display(), e))
            }
            _ => CaptureError::Io(e),
        })?;
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(pump(file, frames, self.frame_bytes, self.pacing, stop_rx));
        self.running = Some((stop_tx, handle));
        log::debug!("file capture started: {}", self.path.display());
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        let Some((stop_tx, handle)) = self.running.take() else {
            return Ok(());
        };
        let _ = stop_tx.send(());
        match handle.await {
            Ok(Ok(pushed)) => {
                log::debug!("file capture stopped: {} ({} frames)", self.name, pushed);
                Ok(())
            }
            Ok(Err(e)) => Err(CaptureError::Io(e)),
            Err(e) => Err(CaptureError::Device(e.to_string())),
        }
    }
}

async fn pump(
    mut file: tokio::fs::File,
    frames: FrameProducer,
    frame_bytes: usize,
    pacing: Duration,
    mut stop: oneshot::Receiver<()>,
) -> io::Result<u64> {
    let mut buf = vec![0u8; frame_bytes];
    let mut filled = 0;
    let mut pushed = 0u64;
    loop {
        let n = tokio::select! {
            _ = &mut stop => break,
            read = file.read(&mut buf[filled..]) => read?,
        };
        if n == 0 {
            break;
        }
        filled += n;
        if filled < frame_bytes {
            continue;
        }
        frames.push(buf.clone());
        pushed += 1;
        filled = 0;
        if !pacing.is_zero() {
            tokio::select! {
                _ = &mut stop => break,
                _ = tokio::time::sleep(pacing) => {}
            }
        }
    }
    if filled > 0 {
        frames.push(buf[..filled].to_vec());
        pushed += 1;
    }
    Ok(pushed)
}
