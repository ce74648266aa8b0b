//! Attachment staging: the pending image or video reference plus the pending text.
//!
//! File picker, clipboard paste, and drag-drop all end in [`AttachmentStager::stage`].
//! Staging also starts building a `data:` URL preview in the background; nothing that
//! sends a turn waits for it.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tokio::sync::watch;

use crate::error::ValidationError;
use crate::message::AttachmentRef;

const IMAGE_EXTENSIONS: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
];
const VIDEO_EXTENSION: &str = "mp4";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Video,
}

impl fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachmentKind::Image => write!(f, "image"),
            AttachmentKind::Video => write!(f, "video"),
        }
    }
}

/// Image bytes travel with the turn; videos are referenced by the name they were ingested under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentPayload {
    Bytes(Vec<u8>),
    Reference(String),
}

/// A user-selected image or video reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    kind: AttachmentKind,
    name: String,
    mime: Option<String>,
    payload: AttachmentPayload,
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// MIME type for an accepted image file name (`.jpg`, `.jpeg`, `.png`), else None.
pub fn image_mime_for(name: &str) -> Option<&'static str> {
    let ext = extension_of(name)?;
    IMAGE_EXTENSIONS
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| *mime)
}

/// True for accepted video file names (`.mp4`).
pub fn is_video_file(name: &str) -> bool {
    extension_of(name).as_deref() == Some(VIDEO_EXTENSION)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl Attachment {
    /// Image picked from a file; the name must end in `.jpg`, `.jpeg` or `.png`.
    pub fn image(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, ValidationError> {
        let name = name.into();
        let mime = image_mime_for(&name).ok_or_else(|| ValidationError::UnsupportedFile {
            kind: AttachmentKind::Image,
            name: name.clone(),
        })?;
        Ok(Self {
            kind: AttachmentKind::Image,
            name,
            mime: Some(mime.to_string()),
            payload: AttachmentPayload::Bytes(bytes),
        })
    }

    /// Read an image file from disk.
    pub async fn image_file(path: &Path) -> Result<Self, ValidationError> {
        let name = file_name_of(path);
        if image_mime_for(&name).is_none() {
            return Err(ValidationError::UnsupportedFile {
                kind: AttachmentKind::Image,
                name,
            });
        }
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ValidationError::Unreadable {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        Self::image(name, bytes)
    }

    /// Image pasted from the clipboard. Pastes carry no file name, so the MIME type must be
    /// one of the accepted image types (`image/jpeg`, `image/png`).
    pub fn pasted_image(mime: &str, bytes: Vec<u8>) -> Result<Self, ValidationError> {
        let mime = mime.trim().to_ascii_lowercase();
        if !mime.starts_with("image/") {
            return Err(ValidationError::NotAnImage(mime));
        }
        let Some((ext, mime)) = IMAGE_EXTENSIONS.iter().find(|(_, m)| *m == mime) else {
            return Err(ValidationError::UnsupportedFile {
                kind: AttachmentKind::Image,
                name: mime,
            });
        };
        Ok(Self {
            kind: AttachmentKind::Image,
            name: format!("pasted-image.{}", ext),
            mime: Some(mime.to_string()),
            payload: AttachmentPayload::Bytes(bytes),
        })
    }

    /// Reference to an already ingested video; the name must end in `.mp4`.
    pub fn video_reference(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        if !is_video_file(&name) {
            return Err(ValidationError::UnsupportedFile {
                kind: AttachmentKind::Video,
                name,
            });
        }
        Ok(Self {
            kind: AttachmentKind::Video,
            payload: AttachmentPayload::Reference(name.clone()),
            name,
            mime: None,
        })
    }

    pub fn kind(&self) -> AttachmentKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    pub fn payload(&self) -> &AttachmentPayload {
        &self.payload
    }

    /// Image bytes, if this is an image.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            AttachmentPayload::Bytes(b) => Some(b),
            AttachmentPayload::Reference(_) => None,
        }
    }

    /// Video identifier, if this is a video reference.
    pub fn video_id(&self) -> Option<&str> {
        match &self.payload {
            AttachmentPayload::Reference(id) => Some(id),
            AttachmentPayload::Bytes(_) => None,
        }
    }

    pub fn reference(&self) -> AttachmentRef {
        AttachmentRef {
            kind: self.kind,
            name: self.name.clone(),
        }
    }
}

/// Encode bytes as a `data:` URL for display.
pub fn data_url(mime: &str, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// Displayable preview of a staged attachment, filled in asynchronously.
#[derive(Debug, Clone)]
pub struct Preview {
    rx: watch::Receiver<Option<String>>,
}

impl Preview {
    fn ready(url: Option<String>) -> Self {
        let (_tx, rx) = watch::channel(url);
        Self { rx }
    }

    /// Start encoding `attachment` in the background. Videos have no inline preview.
    fn schedule(attachment: &Attachment) -> Self {
        let (Some(bytes), Some(mime)) = (attachment.bytes(), attachment.mime()) else {
            return Self::ready(None);
        };
        let bytes = bytes.to_vec();
        let mime = mime.to_string();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let (tx, rx) = watch::channel(None);
                handle.spawn_blocking(move || {
                    let _ = tx.send(Some(data_url(&mime, &bytes)));
                });
                Self { rx }
            }
            Err(_) => Self::ready(Some(data_url(&mime, &bytes))),
        }
    }

    /// Preview if already available.
    pub fn get(&self) -> Option<String> {
        self.rx.borrow().clone()
    }

    /// Wait for the preview. Returns None for attachments without one.
    pub async fn wait(&mut self) -> Option<String> {
        if let Some(url) = self.get() {
            return Some(url);
        }
        // Err only means the encoder finished (or there was none); the value is still readable.
        let _ = self.rx.changed().await;
        self.get()
    }
}

/// An attachment owned by the compose area, with its preview.
#[derive(Debug, Clone)]
pub struct PendingAttachment {
    pub attachment: Attachment,
    pub preview: Preview,
}

/// What a submit takes out of the compose area.
#[derive(Debug, Default)]
pub struct ComposeSnapshot {
    pub text: String,
    pub attachment: Option<PendingAttachment>,
}

/// Pending text plus at most one pending attachment.
#[derive(Debug, Default)]
pub struct AttachmentStager {
    text: String,
    pending: Option<PendingAttachment>,
}

impl AttachmentStager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Stage `attachment`, replacing whatever was staged before. Returns the replaced one.
    pub fn stage(&mut self, attachment: Attachment) -> Option<PendingAttachment> {
        log::debug!("staged {} {}", attachment.kind(), attachment.name());
        let preview = Preview::schedule(&attachment);
        self.pending.replace(PendingAttachment {
            attachment,
            preview,
        })
    }

    /// Remove the staged attachment, keeping the text.
    pub fn clear(&mut self) -> Option<PendingAttachment> {
        self.pending.take()
    }

    pub fn pending(&self) -> Option<&PendingAttachment> {
        self.pending.as_ref()
    }

    /// Take text and attachment in one step, leaving the compose area empty.
    pub fn take(&mut self) -> ComposeSnapshot {
        ComposeSnapshot {
            text: std::mem::take(&mut self.text),
            attachment: self.pending.take(),
        }
    }
}
