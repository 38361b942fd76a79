//! HTTP embedding client.
//!
//! Talks to the embedding service's `POST /embed` endpoint with
//! `{model, text, normalize}` and expects `{embedding: [f32; D]}`. The
//! dimension D is discovered once at construction by embedding a probe
//! text and cached; any later response of a different length fails the
//! chunk rather than poisoning the index.
//!
//! When a batch endpoint is configured, up to [`BATCH_SIZE`] texts go out
//! per request as `{model, texts, normalize}` and the response must echo
//! exactly one vector per input, in order.

use async_trait::async_trait;
use dockside_core::{with_retry, EmbedError, Embedder, RetryPolicy};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

/// Maximum texts per batch request.
pub const BATCH_SIZE: usize = 32;

const DIMENSION_PROBE: &str = "dimension probe";

/// Settings for [`HttpEmbedder::connect`].
#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    /// Single-text endpoint, e.g. `http://localhost:8001/embed`.
    pub endpoint: String,
    /// Optional batch endpoint. Absent means sequential singles.
    pub batch_endpoint: Option<String>,
    /// Model name sent with every request.
    pub model: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    text: &'a str,
    normalize: bool,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedding client over HTTP with a cached dimension.
pub struct HttpEmbedder {
    client: reqwest::Client,
    config: EmbedderConfig,
    dimension: usize,
    policy: RetryPolicy,
}

impl HttpEmbedder {
    /// Connect to the embedding service and discover its dimension.
    pub async fn connect(config: EmbedderConfig) -> Result<Self, EmbedError> {
        if config.model.is_empty() {
            return Err(EmbedError::Configuration("model name is empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| EmbedError::Configuration(format!("http client: {e}")))?;

        let policy = RetryPolicy::embedding();
        let probe = with_retry(&policy, EmbedError::is_transient, || {
            embed_single(&client, &config, DIMENSION_PROBE)
        })
        .await?;

        if probe.is_empty() {
            return Err(EmbedError::Configuration(
                "embedding service returned an empty vector".into(),
            ));
        }

        info!(
            endpoint = %config.endpoint,
            model = %config.model,
            dimension = probe.len(),
            batched = config.batch_endpoint.is_some(),
            "embedding service ready"
        );

        Ok(Self {
            client,
            dimension: probe.len(),
            config,
            policy,
        })
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), EmbedError> {
        if vector.len() != self.dimension {
            return Err(EmbedError::DimensionMismatch {
                got: vector.len(),
                expected: self.dimension,
            });
        }
        Ok(())
    }

    async fn embed_batch_request(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let endpoint = self
            .config
            .batch_endpoint
            .as_deref()
            .expect("batch endpoint checked by caller");

        let body = json!({
            "model": self.config.model,
            "texts": texts,
            "normalize": true,
        });

        let response = self
            .client
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: BatchEmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::Transport(format!("batch response decode: {e}")))?;

        if payload.embeddings.len() != texts.len() {
            return Err(EmbedError::BatchMismatch(
                payload.embeddings.len(),
                texts.len(),
            ));
        }
        Ok(payload.embeddings)
    }
}

async fn embed_single(
    client: &reqwest::Client,
    config: &EmbedderConfig,
    text: &str,
) -> Result<Vec<f32>, EmbedError> {
    let request = EmbedRequest {
        model: &config.model,
        text,
        normalize: true,
    };

    let response = client
        .post(&config.endpoint)
        .json(&request)
        .send()
        .await
        .map_err(|e| EmbedError::Transport(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(EmbedError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let payload: EmbedResponse = response
        .json()
        .await
        .map_err(|e| EmbedError::Transport(format!("response decode: {e}")))?;
    Ok(payload.embedding)
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut vectors = Vec::with_capacity(texts.len());

        if self.config.batch_endpoint.is_some() {
            for batch in texts.chunks(BATCH_SIZE) {
                let embedded = with_retry(&self.policy, EmbedError::is_transient, || {
                    self.embed_batch_request(batch)
                })
                .await?;
                for vector in &embedded {
                    self.check_dimension(vector)?;
                }
                vectors.extend(embedded);
            }
        } else {
            for text in texts {
                let vector = with_retry(&self.policy, EmbedError::is_transient, || {
                    embed_single(&self.client, &self.config, text)
                })
                .await?;
                self.check_dimension(&vector)?;
                vectors.push(vector);
            }
        }

        debug!(texts = texts.len(), "embedded");
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    const DIM: usize = 384;

    fn vector(fill: f32) -> Vec<f32> {
        vec![fill; DIM]
    }

    async fn connect(server: &MockServer, batch: bool) -> HttpEmbedder {
        let config = EmbedderConfig {
            endpoint: format!("{}/embed", server.base_url()),
            batch_endpoint: batch.then(|| format!("{}/batch-embed", server.base_url())),
            model: "bge-small-en-v1.5".to_string(),
            timeout: Duration::from_secs(5),
        };
        let mut embedder = HttpEmbedder::connect(config).await.unwrap();
        embedder.policy = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            jitter_percent: 0.0,
            ..RetryPolicy::default()
        };
        embedder
    }

    async fn mock_probe(server: &MockServer) {
        server.mock_async(|when, then| {
            when.method(POST).path("/embed").body_contains(DIMENSION_PROBE);
            then.status(200)
                .json_body(serde_json::json!({ "embedding": vector(0.0) }));
        }).await;
    }

    #[tokio::test]
    async fn connect_discovers_dimension() {
        let server = MockServer::start_async().await;
        mock_probe(&server).await;

        let embedder = connect(&server, false).await;
        assert_eq!(embedder.dimension(), DIM);
        assert_eq!(embedder.model_name(), "bge-small-en-v1.5");
    }

    #[tokio::test]
    async fn single_requests_carry_model_and_normalize() {
        let server = MockServer::start_async().await;
        mock_probe(&server).await;
        let mock = server.mock_async(|when, then| {
            when.method(POST)
                .path("/embed")
                .body_contains("\"model\":\"bge-small-en-v1.5\"")
                .body_contains("\"normalize\":true")
                .body_contains("chunk text");
            then.status(200)
                .json_body(serde_json::json!({ "embedding": vector(0.5) }));
        }).await;

        let embedder = connect(&server, false).await;
        let vectors = embedder.embed(&["chunk text"]).await.unwrap();

        mock.assert();
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].len(), DIM);
    }

    #[tokio::test]
    async fn dimension_mismatch_fails_chunk() {
        let server = MockServer::start_async().await;
        mock_probe(&server).await;
        server.mock_async(|when, then| {
            when.method(POST).path("/embed").body_contains("short");
            then.status(200)
                .json_body(serde_json::json!({ "embedding": [0.1, 0.2] }));
        }).await;

        let embedder = connect(&server, false).await;
        let err = embedder.embed(&["short"]).await.unwrap_err();
        assert!(matches!(
            err,
            EmbedError::DimensionMismatch {
                got: 2,
                expected: DIM
            }
        ));
    }

    #[tokio::test]
    async fn batch_endpoint_used_and_order_checked() {
        let server = MockServer::start_async().await;
        mock_probe(&server).await;
        let mock = server.mock_async(|when, then| {
            when.method(POST).path("/batch-embed").body_contains("\"texts\"");
            then.status(200).json_body(serde_json::json!({
                "embeddings": [vector(0.1), vector(0.2)]
            }));
        }).await;

        let embedder = connect(&server, true).await;
        let vectors = embedder.embed(&["a", "b"]).await.unwrap();

        mock.assert();
        assert_eq!(vectors.len(), 2);
        assert!((vectors[0][0] - 0.1).abs() < f32::EPSILON);
        assert!((vectors[1][0] - 0.2).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn batch_count_mismatch_fails_batch() {
        let server = MockServer::start_async().await;
        mock_probe(&server).await;
        server.mock_async(|when, then| {
            when.method(POST).path("/batch-embed");
            then.status(200)
                .json_body(serde_json::json!({ "embeddings": [vector(0.1)] }));
        }).await;

        let embedder = connect(&server, true).await;
        let err = embedder.embed(&["a", "b"]).await.unwrap_err();
        assert!(matches!(err, EmbedError::BatchMismatch(1, 2)));
    }

    #[tokio::test]
    async fn transient_5xx_retried_to_exhaustion() {
        let server = MockServer::start_async().await;
        mock_probe(&server).await;

        let fail = server.mock_async(|when, then| {
            when.method(POST).path("/embed").body_contains("flaky");
            then.status(503).body("busy");
        }).await;

        let embedder = connect(&server, false).await;
        let err = embedder.embed(&["flaky"]).await.unwrap_err();
        assert!(matches!(err, EmbedError::Status { status: 503, .. }));
        fail.assert_hits(3);
    }

    #[tokio::test]
    async fn client_4xx_not_retried() {
        let server = MockServer::start_async().await;
        mock_probe(&server).await;
        let mock = server.mock_async(|when, then| {
            when.method(POST).path("/embed").body_contains("bad");
            then.status(422).body("text too long");
        }).await;

        let embedder = connect(&server, false).await;
        let err = embedder.embed(&["bad"]).await.unwrap_err();
        assert!(matches!(err, EmbedError::Status { status: 422, .. }));
        mock.assert_hits(1);
    }

    #[tokio::test]
    async fn empty_input_is_empty_output() {
        let server = MockServer::start_async().await;
        mock_probe(&server).await;

        let embedder = connect(&server, false).await;
        assert!(embedder.embed(&[]).await.unwrap().is_empty());
    }
}
