//! Backend HTTP client (http://localhost:8000 by default).
//! Every call is a multipart form POST except the history reset, which is a plain GET.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;

use super::{ChatBackend, IngestStatus, VideoUpload};
use crate::attachment::Attachment;
use crate::config::{self, Config};
use crate::mode::InferenceMode;

const DEFAULT_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

const IMAGE_CHAT_PATH: &str = "/api/chatbot/Chatbot";
const VIDEO_CHAT_PATH: &str = "/api/chatbot/video_chatbot";
const UPLOAD_VIDEO_PATH: &str = "/api/chatbot/upload_video";
const RESET_HISTORY_PATH: &str = "/api/chatbot/reset_chat_history";

/// Client for the inference backend HTTP API.
#[derive(Clone)]
pub struct BackendClient {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("backend request timed out")]
    Timeout,
    #[error("backend api error: {0}")]
    Api(String),
    #[error("malformed backend response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Timeout
        } else if e.is_decode() {
            BackendError::Malformed(e.to_string())
        } else {
            BackendError::Request(e)
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnswerResponse {
    answer: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    status: IngestStatus,
}

impl BackendClient {
    pub fn new(base_url: Option<String>, timeout: Option<Duration>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url,
            timeout: timeout.unwrap_or(DEFAULT_TIMEOUT),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Some(config::resolve_backend_url(config)),
            Some(config.backend.request_timeout()),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        form: Form,
        timeout: Option<Duration>,
    ) -> Result<T, BackendError> {
        let url = self.url(path);
        let mut req = self.client.post(&url).multipart(form);
        if let Some(t) = timeout {
            req = req.timeout(t);
        }
        let res = req.send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(BackendError::Api(format!("{} {}", status, body)));
        }
        Ok(res.json().await?)
    }
}

#[async_trait]
impl ChatBackend for BackendClient {
    /// POST /api/chatbot/Chatbot: `text` plus optional `image` file part.
    async fn image_chat(
        &self,
        text: &str,
        image: Option<&Attachment>,
    ) -> Result<String, BackendError> {
        let mut form = Form::new().text("text", text.to_string());
        if let Some(attachment) = image {
            if let Some(bytes) = attachment.bytes() {
                let part = Part::bytes(bytes.to_vec())
                    .file_name(attachment.name().to_string())
                    .mime_str(attachment.mime().unwrap_or("application/octet-stream"))?;
                form = form.part("image", part);
            }
        }
        log::debug!("image chat: {} chars, image: {}", text.len(), image.is_some());
        let data: AnswerResponse = self
            .post_form(IMAGE_CHAT_PATH, form, Some(self.timeout))
            .await?;
        Ok(data.answer)
    }

    /// POST /api/chatbot/video_chatbot: `text`, `inference_type`, `video_id`.
    async fn video_chat(
        &self,
        text: &str,
        inference: InferenceMode,
        video_id: &str,
    ) -> Result<String, BackendError> {
        let form = Form::new()
            .text("text", text.to_string())
            .text("inference_type", inference.as_wire())
            .text("video_id", video_id.to_string());
        log::debug!("video chat: video_id={} inference_type={}", video_id, inference);
        let data: AnswerResponse = self
            .post_form(VIDEO_CHAT_PATH, form, Some(self.timeout))
            .await?;
        Ok(data.answer)
    }

    /// POST /api/chatbot/upload_video: `video` file part and `frameInterval`. No request timeout:
    /// the server answers only once preprocessing settles.
    async fn upload_video(&self, upload: &VideoUpload) -> Result<IngestStatus, BackendError> {
        let part = Part::bytes(upload.bytes.clone())
            .file_name(upload.file_name.clone())
            .mime_str("video/mp4")?;
        let form = Form::new()
            .part("video", part)
            .text("frameInterval", upload.frame_interval.to_string());
        log::debug!(
            "upload video: {} ({} bytes, frameInterval={})",
            upload.file_name,
            upload.bytes.len(),
            upload.frame_interval
        );
        let data: UploadResponse = self.post_form(UPLOAD_VIDEO_PATH, form, None).await?;
        Ok(data.status)
    }

    /// GET /api/chatbot/reset_chat_history: body is ignored.
    async fn reset_chat_history(&self) -> Result<(), BackendError> {
        let url = self.url(RESET_HISTORY_PATH);
        let res = self.client.get(&url).timeout(self.timeout).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(BackendError::Api(format!("{} {}", status, body)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let c = BackendClient::new(Some("http://gpu:8000/".to_string()), None);
        assert_eq!(c.base_url(), "http://gpu:8000");
        assert_eq!(c.url(IMAGE_CHAT_PATH), "http://gpu:8000/api/chatbot/Chatbot");
    }

    #[test]
    fn default_base_url() {
        let c = BackendClient::new(None, None);
        assert_eq!(c.base_url(), DEFAULT_BASE_URL);
        assert_eq!(c.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn upload_status_parses_lowercase() {
        let r: UploadResponse = serde_json::from_str(r#"{"status":"processing"}"#).unwrap();
        assert_eq!(r.status, IngestStatus::Processing);
        assert!(serde_json::from_str::<UploadResponse>(r#"{"status":"null"}"#).is_err());
    }
}
