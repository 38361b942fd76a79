//! OCR engine clients.
//!
//! Two interchangeable engines sit behind the [`OcrEngine`] trait:
//!
//! - [`FastOcrClient`]: a dedicated OCR service taking a multipart file
//!   upload and returning extracted text directly.
//! - [`VisionOcrClient`]: an OpenAI-compatible chat-completion endpoint
//!   given the image as a base64 data URI.
//!
//! The engine is chosen once at startup; nothing upstream can observe
//! which one is in use. Transient failures (connection errors, 5xx) are
//! retried with exponential backoff before the document is failed.

use async_trait::async_trait;
use base64::Engine as _;
use dockside_core::{with_retry, ExtractError, OcrEngine, RetryPolicy};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const OCR_PROMPT: &str = "Please perform OCR on this image and extract all text content. \
Maintain the reading order and structure. \
If there are tables or structured layouts, preserve them.";

/// Client for the fast OCR service (`POST /ocr`, multipart field `file`).
pub struct FastOcrClient {
    client: reqwest::Client,
    endpoint: String,
    policy: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct FastOcrResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    total_pages: Option<u32>,
}

impl FastOcrClient {
    /// Build a client against `endpoint` with a per-request timeout.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExtractError::Failed(format!("http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            policy: RetryPolicy::ocr(),
        })
    }

    async fn recognize_once(&self, image: &[u8], file_name: &str) -> Result<String, ExtractError> {
        let part = reqwest::multipart::Part::bytes(image.to_vec())
            .file_name(file_name.to_string())
            .mime_str("application/octet-stream")
            .map_err(|e| ExtractError::Failed(format!("multipart: {e}")))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ExtractError::OcrTransport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractError::OcrStatus {
                status: status.as_u16(),
                body,
            });
        }

        let payload: FastOcrResponse = response
            .json()
            .await
            .map_err(|e| ExtractError::Parse(format!("ocr response: {e}")))?;

        if matches!(payload.status.as_deref(), Some(s) if s != "success") {
            return Err(ExtractError::Failed(format!(
                "ocr reported status {:?}",
                payload.status
            )));
        }

        debug!(
            file = file_name,
            pages = payload.total_pages.unwrap_or(1),
            chars = payload.content.len(),
            "fast ocr complete"
        );
        Ok(payload.content)
    }
}

#[async_trait]
impl OcrEngine for FastOcrClient {
    fn name(&self) -> &str {
        "fast"
    }

    async fn recognize(&self, image: &[u8], file_name: &str) -> Result<String, ExtractError> {
        with_retry(&self.policy, ExtractError::is_transient, || {
            self.recognize_once(image, file_name)
        })
        .await
    }
}

/// Client for a vision language model behind an OpenAI-compatible
/// chat-completion API.
pub struct VisionOcrClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    policy: RetryPolicy,
}

impl VisionOcrClient {
    /// Build a client against a `/v1/chat/completions` endpoint.
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExtractError::Failed(format!("http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
            policy: RetryPolicy::ocr(),
        })
    }

    async fn recognize_once(&self, image: &[u8], file_name: &str) -> Result<String, ExtractError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let body = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": OCR_PROMPT },
                    {
                        "type": "image_url",
                        "image_url": { "url": format!("data:image/png;base64,{encoded}") }
                    }
                ]
            }],
            "max_tokens": 4096,
            "temperature": 0.1,
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.is_empty()) {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExtractError::OcrTransport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractError::OcrStatus {
                status: status.as_u16(),
                body,
            });
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ExtractError::Parse(format!("completion response: {e}")))?;

        let text = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        debug!(file = file_name, chars = text.len(), "vision ocr complete");
        Ok(text)
    }
}

#[async_trait]
impl OcrEngine for VisionOcrClient {
    fn name(&self) -> &str {
        "llm"
    }

    async fn recognize(&self, image: &[u8], file_name: &str) -> Result<String, ExtractError> {
        with_retry(&self.policy, ExtractError::is_transient, || {
            self.recognize_once(image, file_name)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn fast_client(url: &str) -> FastOcrClient {
        let mut client = FastOcrClient::new(url, Duration::from_secs(5)).unwrap();
        client.policy = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            jitter_percent: 0.0,
            ..RetryPolicy::default()
        };
        client
    }

    #[tokio::test]
    async fn fast_ocr_returns_content() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/ocr");
                then.status(200).json_body(serde_json::json!({
                    "status": "success",
                    "content": "Alpha",
                    "total_pages": 1
                }));
            })
            .await;

        let client = fast_client(&format!("{}/ocr", server.base_url()));
        let text = client.recognize(b"png-bytes", "page-1.png").await.unwrap();

        mock.assert();
        assert_eq!(text, "Alpha");
    }

    #[tokio::test]
    async fn fast_ocr_retries_5xx_then_succeeds() {
        let server = MockServer::start_async().await;
        let failing = server
            .mock_async(|when, then| {
                when.method(POST).path("/ocr");
                then.status(503).body("warming up");
            })
            .await;

        let client = fast_client(&format!("{}/ocr", server.base_url()));
        let err = client.recognize(b"img", "x.png").await.unwrap_err();

        // Three attempts, then the transient error surfaces.
        failing.assert_hits(3);
        assert!(matches!(err, ExtractError::OcrStatus { status: 503, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn fast_ocr_does_not_retry_4xx() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/ocr");
                then.status(422).body("bad image");
            })
            .await;

        let client = fast_client(&format!("{}/ocr", server.base_url()));
        let err = client.recognize(b"img", "x.png").await.unwrap_err();

        mock.assert_hits(1);
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn vision_ocr_sends_data_uri_and_parses_completion() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .body_contains("data:image/png;base64,")
                    .body_contains("qwen2.5-vl-3b-instruct");
                then.status(200).json_body(serde_json::json!({
                    "choices": [{
                        "message": { "role": "assistant", "content": "Extracted text" }
                    }]
                }));
            })
            .await;

        let client = VisionOcrClient::new(
            format!("{}/v1/chat/completions", server.base_url()),
            "qwen2.5-vl-3b-instruct",
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        let text = client.recognize(b"img-bytes", "scan.png").await.unwrap();

        mock.assert();
        assert_eq!(text, "Extracted text");
    }

    #[tokio::test]
    async fn vision_ocr_sends_bearer_when_configured() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .header("authorization", "Bearer sk-test");
                then.status(200).json_body(serde_json::json!({
                    "choices": [{ "message": { "content": "ok" } }]
                }));
            })
            .await;

        let client = VisionOcrClient::new(
            format!("{}/v1/chat/completions", server.base_url()),
            "m",
            Some("sk-test".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();
        client.recognize(b"img", "a.png").await.unwrap();

        mock.assert();
    }
}
