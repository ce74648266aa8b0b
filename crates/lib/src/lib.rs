//! Wishva core library: conversational session engine for the multi-modal chat backend.
//!
//! A [`session::Session`] turns compose-area input into image or video chat turns, keeps
//! the transcript, gates on video ingestion and resets history. Live audio runs beside it
//! in [`audio::AudioCaptureStreamer`].

pub mod attachment;
pub mod audio;
pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod ingest;
pub mod init;
pub mod message;
pub mod mode;
pub mod reset;
pub mod session;

pub use error::{EngineError, ErrorKind, ValidationError};
pub use session::{Session, SessionEvent};
