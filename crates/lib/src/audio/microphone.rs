//! Default input device via cpal. Frames are 16-bit little-endian PCM, one per callback.
//!
//! `cpal::Stream` is not `Send`, so it lives on a dedicated thread that holds it until
//! told to stop; dropping the stream releases the device.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;

use super::device::{CaptureDevice, CaptureError};
use super::frames::FrameProducer;

pub struct MicrophoneDevice {
    name: String,
    running: Option<(std_mpsc::Sender<()>, JoinHandle<()>)>,
}

impl Default for MicrophoneDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MicrophoneDevice {
    pub fn new() -> Self {
        Self {
            name: "default input".to_string(),
            running: None,
        }
    }
}

fn pcm_from_f32(data: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * 2);
    for s in data {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn pcm_from_i16(data: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * 2);
    for s in data {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

fn build_stream(frames: FrameProducer) -> Result<(cpal::Stream, String), CaptureError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| CaptureError::Unavailable("no default input device".into()))?;
    let name = device.name().unwrap_or_else(|_| "unknown".to_string());
    let supported = device
        .default_input_config()
        .map_err(|e| CaptureError::Unavailable(e.to_string()))?;
    let config: cpal::StreamConfig = supported.config();
    let on_error = |e: cpal::StreamError| log::warn!("microphone stream error: {}", e);
    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                frames.push(pcm_from_f32(data));
            },
            on_error,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                frames.push(pcm_from_i16(data));
            },
            on_error,
            None,
        ),
        other => {
            return Err(CaptureError::Device(format!(
                "unsupported sample format {:?}",
                other
            )))
        }
    }
    .map_err(|e| match e {
        cpal::BuildStreamError::DeviceNotAvailable => {
            CaptureError::Unavailable("input device not available".into())
        }
        other => CaptureError::Device(other.to_string()),
    })?;
    stream
        .play()
        .map_err(|e| CaptureError::Device(e.to_string()))?;
    log::debug!(
        "microphone {}: {} Hz, {} ch",
        name,
        config.sample_rate.0,
        config.channels
    );
    Ok((stream, name))
}

#[async_trait]
impl CaptureDevice for MicrophoneDevice {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self, frames: FrameProducer) -> Result<(), CaptureError> {
        if self.running.is_some() {
            return Err(CaptureError::Device("microphone already started".into()));
        }
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let handle = std::thread::spawn(move || match build_stream(frames) {
            Ok((stream, name)) => {
                let _ = ready_tx.send(Ok(name));
                // Blocks until stop is sent or the sender is dropped.
                let _ = stop_rx.recv();
                drop(stream);
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
            }
        });
        match ready_rx.await {
            Ok(Ok(name)) => {
                self.name = name;
                self.running = Some((stop_tx, handle));
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CaptureError::Device("microphone thread exited".into())),
        }
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        let Some((stop_tx, handle)) = self.running.take() else {
            return Ok(());
        };
        let _ = stop_tx.send(());
        tokio::task::spawn_blocking(move || handle.join())
            .await
            .map_err(|e| CaptureError::Device(e.to_string()))?
            .map_err(|_| CaptureError::Device("microphone thread panicked".into()))?;
        log::debug!("microphone released");
        Ok(())
    }
}
