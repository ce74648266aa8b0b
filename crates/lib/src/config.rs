//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.wishva/config.json`) and environment.
//! Every field has a default so a missing or empty file yields a working local setup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::ingest::MIN_FRAME_INTERVAL;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Inference backend (HTTP) settings.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Live audio streaming settings.
    #[serde(default)]
    pub audio: AudioConfig,

    /// Video ingestion settings.
    #[serde(default)]
    pub video: VideoConfig,
}

/// Backend base URL and request limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Base URL of the backend (default "http://localhost:8000"). Overridden by WISHVA_BACKEND_URL env.
    #[serde(default = "default_backend_url")]
    pub base_url: String,

    /// Upper bound for a chat or reset request, in seconds (default 120).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Audio socket and framing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioConfig {
    /// WebSocket URL for the audio stream. When unset, derived from the backend URL as `ws://<host>/audio-stream`.
    #[serde(default)]
    pub socket_url: Option<String>,

    /// Frames held in the ordered queue between capture and socket before spilling into the backlog (default 64).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Bytes per frame for file-backed capture (default 3200, i.e. 100 ms of 16 kHz mono 16-bit PCM).
    #[serde(default = "default_frame_bytes")]
    pub frame_bytes: usize,

    /// Pacing between frames for file-backed capture, in milliseconds (default 100).
    #[serde(default = "default_frame_millis")]
    pub frame_millis: u64,

    /// Upper bound for opening the audio socket (TCP connect plus handshake), in milliseconds (default 5000).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// How long stopping capture waits for queued frames to be sent before the socket task is aborted, in milliseconds (default 5000).
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

/// Video upload and ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoConfig {
    /// Frame sampling interval sent with uploads (minimum and default 25).
    #[serde(default = "default_frame_interval")]
    pub frame_interval: u32,

    /// Upper bound for the upload request, which answers only once preprocessing settles, in seconds (default 600).
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
}

fn default_backend_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_queue_capacity() -> usize {
    64
}

fn default_frame_bytes() -> usize {
    3200
}

fn default_frame_millis() -> u64 {
    100
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_drain_timeout_ms() -> u64 {
    5000
}

fn default_frame_interval() -> u32 {
    MIN_FRAME_INTERVAL
}

fn default_upload_timeout_secs() -> u64 {
    600
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            socket_url: None,
            queue_capacity: default_queue_capacity(),
            frame_bytes: default_frame_bytes(),
            frame_millis: default_frame_millis(),
            connect_timeout_ms: default_connect_timeout_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            frame_interval: default_frame_interval(),
            upload_timeout_secs: default_upload_timeout_secs(),
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

impl AudioConfig {
    pub fn frame_pacing(&self) -> Duration {
        Duration::from_millis(self.frame_millis)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms.max(1))
    }
}

impl VideoConfig {
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs.max(1))
    }
}

/// Resolve the backend base URL: env WISHVA_BACKEND_URL overrides config. Trailing slashes are removed.
pub fn resolve_backend_url(config: &Config) -> String {
    std::env::var("WISHVA_BACKEND_URL")
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .unwrap_or_else(|| config.backend.base_url.trim().to_string())
        .trim_end_matches('/')
        .to_string()
}

/// Resolve the audio socket URL: explicit `audio.socketUrl`, else `ws://<backend host>/audio-stream`
/// (`wss://` when the backend is served over https).
pub fn resolve_audio_socket_url(config: &Config) -> String {
    if let Some(url) = config
        .audio
        .socket_url
        .as_ref()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
    {
        return url.to_string();
    }
    let base = resolve_backend_url(config);
    let (scheme, rest) = match base.split_once("://") {
        Some(("https", rest)) => ("wss", rest),
        Some((_, rest)) => ("ws", rest),
        None => ("ws", base.as_str()),
    };
    let host = rest.split('/').next().unwrap_or(rest);
    format!("{}://{}/audio-stream", scheme, host)
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("WISHVA_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".wishva").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the default path (or WISHVA_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let mut config: Config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    if config.video.frame_interval < MIN_FRAME_INTERVAL {
        log::warn!(
            "video.frameInterval {} is below the minimum, using {}",
            config.video.frame_interval,
            MIN_FRAME_INTERVAL
        );
        config.video.frame_interval = MIN_FRAME_INTERVAL;
    }
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_local_backend() {
        let c = Config::default();
        assert_eq!(c.backend.base_url, "http://localhost:8000");
        assert_eq!(c.backend.request_timeout_secs, 120);
        assert_eq!(c.video.frame_interval, 25);
        assert_eq!(c.audio.queue_capacity, 64);
    }

    #[test]
    fn empty_json_fills_every_section() {
        let c: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(c.audio.frame_bytes, 3200);
        assert_eq!(c.audio.connect_timeout(), Duration::from_secs(5));
        assert_eq!(c.audio.drain_timeout(), Duration::from_secs(5));
        assert_eq!(c.video.upload_timeout(), Duration::from_secs(600));
        assert!(c.audio.socket_url.is_none());
    }

    #[test]
    fn camel_case_keys_are_read() {
        let c: Config = serde_json::from_str(
            r#"{"backend":{"baseUrl":"http://gpu:9000/","requestTimeoutSecs":5},"video":{"frameInterval":50}}"#,
        )
        .unwrap();
        assert_eq!(c.backend.base_url, "http://gpu:9000/");
        assert_eq!(c.backend.request_timeout(), Duration::from_secs(5));
        assert_eq!(c.video.frame_interval, 50);
    }

    #[test]
    fn audio_socket_url_derived_from_backend_host() {
        let mut c = Config::default();
        c.backend.base_url = "http://10.0.0.7:8000/api/".to_string();
        assert_eq!(resolve_audio_socket_url(&c), "ws://10.0.0.7:8000/audio-stream");

        c.backend.base_url = "https://example.ngrok-free.app".to_string();
        assert_eq!(
            resolve_audio_socket_url(&c),
            "wss://example.ngrok-free.app/audio-stream"
        );
    }

    #[test]
    fn explicit_audio_socket_url_wins() {
        let mut c = Config::default();
        c.audio.socket_url = Some(" ws://audio:9001/in ".to_string());
        assert_eq!(resolve_audio_socket_url(&c), "ws://audio:9001/in");
    }

    #[test]
    fn load_config_missing_file_uses_defaults() {
        let path = std::env::temp_dir()
            .join(format!("wishva-config-{}", uuid::Uuid::new_v4()))
            .join("config.json");
        let (c, used) = load_config(Some(path.clone())).unwrap();
        assert_eq!(used, path);
        assert_eq!(c.backend.base_url, "http://localhost:8000");
    }

    #[test]
    fn load_config_clamps_frame_interval() {
        let dir = std::env::temp_dir().join(format!("wishva-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, r#"{"video":{"frameInterval":3}}"#).unwrap();
        let (c, _) = load_config(Some(path)).unwrap();
        assert_eq!(c.video.frame_interval, MIN_FRAME_INTERVAL);
    }
}
