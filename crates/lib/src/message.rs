//! Transcript messages and the append-only message log.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::attachment::AttachmentKind;

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

/// Opaque pointer to the image or video shown alongside a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub kind: AttachmentKind,
    pub name: String,
}

/// A single transcript entry. Fields are fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub sender: Sender,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_ref: Option<AttachmentRef>,
    /// Local wall-clock time, 24-hour `HH:MM`.
    pub timestamp: String,
    /// Round-trip latency of the turn; bot messages only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_seconds: Option<f64>,
}

impl Message {
    pub fn user(text: impl Into<String>, attachment_ref: Option<AttachmentRef>) -> Self {
        Self {
            sender: Sender::User,
            text: text.into(),
            attachment_ref,
            timestamp: clock_timestamp(),
            response_time_seconds: None,
        }
    }

    pub fn bot(text: impl Into<String>, response_time: Duration) -> Self {
        Self {
            sender: Sender::Bot,
            text: text.into(),
            attachment_ref: None,
            timestamp: clock_timestamp(),
            response_time_seconds: Some(response_time.as_secs_f64()),
        }
    }

    /// Transient bot entry shown while a reply is pending. Never stored in the log.
    pub fn placeholder() -> Self {
        Self {
            sender: Sender::Bot,
            text: String::new(),
            attachment_ref: None,
            timestamp: clock_timestamp(),
            response_time_seconds: None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.sender == Sender::Bot && self.text.is_empty() && self.response_time_seconds.is_none()
    }
}

fn clock_timestamp() -> String {
    chrono::Local::now().format("%H:%M").to_string()
}

/// Ordered record of exchanged messages. Entries are only ever appended; a session
/// reset drops them all at once.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    messages: Vec<Message>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message; returns its position.
    pub fn append(&mut self, message: Message) -> usize {
        self.messages.push(message);
        self.messages.len() - 1
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop every entry; returns how many were removed.
    pub(crate) fn clear(&mut self) -> usize {
        let n = self.messages.len();
        self.messages.clear();
        n
    }
}
