//! S3-compatible object store client.
//!
//! Talks the S3 REST API directly with SigV4 signing: `ListObjectsV2`
//! with continuation-token pagination, `HeadObject`, and `GetObject`.
//! Standard AWS endpoints use virtual-hosted addressing; a custom
//! `endpoint_url` (MinIO, LocalStack) switches to path-style.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dockside_core::{file_type_of, ObjectMeta, ObjectStore, StoreError};
use reqwest::Method;
use std::time::Duration;
use tracing::{debug, warn};

use crate::sigv4::{
    extract_xml_value, hex_sha256, sign, uri_encode, xml_blocks, xml_unescape, AwsCredentials,
    SigningRequest,
};

const LIST_PAGE_SIZE: u32 = 1000;

/// Settings for [`S3ObjectStore`].
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible services; `None` means AWS.
    pub endpoint_url: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// SigV4-signed S3 client implementing [`ObjectStore`].
pub struct S3ObjectStore {
    client: reqwest::Client,
    config: S3Config,
    creds: AwsCredentials,
}

impl S3ObjectStore {
    /// Build a client with credentials from the environment.
    pub fn new(config: S3Config) -> Result<Self, StoreError> {
        let creds = AwsCredentials::from_env()?;
        Self::with_credentials(config, creds)
    }

    /// Build a client with explicit credentials.
    pub fn with_credentials(
        config: S3Config,
        creds: AwsCredentials,
    ) -> Result<Self, StoreError> {
        if config.bucket.is_empty() {
            return Err(StoreError::Credentials("bucket name is empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StoreError::Transport(format!("http client: {e}")))?;
        Ok(Self {
            client,
            config,
            creds,
        })
    }

    /// (scheme, host, path prefix). Custom endpoints address the bucket
    /// in the path; AWS endpoints put it in the host.
    fn endpoint_parts(&self) -> (String, String, String) {
        match &self.config.endpoint_url {
            Some(endpoint) => {
                let scheme = if endpoint.starts_with("http://") {
                    "http"
                } else {
                    "https"
                };
                let host = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_string();
                (scheme.into(), host, format!("/{}", self.config.bucket))
            }
            None => (
                "https".into(),
                format!(
                    "{}.s3.{}.amazonaws.com",
                    self.config.bucket, self.config.region
                ),
                String::new(),
            ),
        }
    }

    async fn signed_send(
        &self,
        method: Method,
        storage_key: Option<&str>,
        query_pairs: &[(String, String)],
    ) -> Result<reqwest::Response, StoreError> {
        let (scheme, host, prefix) = self.endpoint_parts();

        let uri = match storage_key {
            Some(key) => {
                let encoded: String = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
                format!("{prefix}/{encoded}")
            }
            None => format!("{prefix}/"),
        };

        let mut sorted = query_pairs.to_vec();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        let query: String = sorted
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let payload_hash = hex_sha256(b"");
        let headers = sign(
            &SigningRequest {
                method: method.as_str(),
                host: &host,
                uri: &uri,
                query: &query,
                payload_hash: &payload_hash,
                region: &self.config.region,
                service: "s3",
            },
            &self.creds,
            Utc::now(),
        );

        let url = if query.is_empty() {
            format!("{scheme}://{host}{uri}")
        } else {
            format!("{scheme}://{host}{uri}?{query}")
        };

        let mut request = self.client.request(method, url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        request
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StoreError> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), LIST_PAGE_SIZE.to_string()),
            ];
            if !prefix.is_empty() {
                query.push(("prefix".to_string(), prefix.to_string()));
            }
            if let Some(token) = &continuation {
                query.push(("continuation-token".to_string(), token.clone()));
            }

            let response = self.signed_send(Method::GET, None, &query).await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(StoreError::UnexpectedStatus {
                    status: status.as_u16(),
                    body: body.chars().take(500).collect(),
                });
            }

            let xml = response
                .text()
                .await
                .map_err(|e| StoreError::Transport(e.to_string()))?;

            for block in xml_blocks(&xml, "Contents") {
                let Some(key) = extract_xml_value(block, "Key").map(|k| xml_unescape(&k)) else {
                    continue;
                };
                // Folder markers are not documents.
                if key.is_empty() || key.ends_with('/') {
                    continue;
                }
                let last_modified = extract_xml_value(block, "LastModified")
                    .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(Utc::now);
                let size = extract_xml_value(block, "Size")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0);

                objects.push(ObjectMeta {
                    content_type: infer_content_type(&key),
                    storage_key: key,
                    size,
                    last_modified,
                });
            }

            let truncated = extract_xml_value(&xml, "IsTruncated")
                .map(|v| v == "true")
                .unwrap_or(false);
            if truncated {
                continuation = extract_xml_value(&xml, "NextContinuationToken");
                if continuation.is_none() {
                    return Err(StoreError::Listing(
                        "truncated listing without continuation token".into(),
                    ));
                }
            } else {
                break;
            }
        }

        debug!(prefix, objects = objects.len(), "listed bucket");
        Ok(objects)
    }

    async fn head(&self, storage_key: &str) -> Result<Option<ObjectMeta>, StoreError> {
        let response = self
            .signed_send(Method::HEAD, Some(storage_key), &[])
            .await?;

        match response.status().as_u16() {
            200 => {
                let size = response
                    .headers()
                    .get("content-length")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                let last_modified = response
                    .headers()
                    .get("last-modified")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(Utc::now);
                Ok(Some(ObjectMeta {
                    storage_key: storage_key.to_string(),
                    size,
                    last_modified,
                    content_type: infer_content_type(storage_key),
                }))
            }
            404 => Ok(None),
            status => {
                warn!(key = storage_key, status, "head failed");
                Err(StoreError::UnexpectedStatus {
                    status,
                    body: String::new(),
                })
            }
        }
    }

    async fn get(&self, storage_key: &str) -> Result<Vec<u8>, StoreError> {
        let response = self
            .signed_send(Method::GET, Some(storage_key), &[])
            .await?;

        match response.status().as_u16() {
            200 => {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| StoreError::Transport(e.to_string()))?;
                debug!(key = storage_key, bytes = bytes.len(), "object downloaded");
                Ok(bytes.to_vec())
            }
            404 => Err(StoreError::NotFound(storage_key.to_string())),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(StoreError::UnexpectedStatus {
                    status,
                    body: body.chars().take(500).collect(),
                })
            }
        }
    }
}

/// Infer a MIME type from the key suffix.
fn infer_content_type(storage_key: &str) -> String {
    match file_type_of(storage_key).as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "tiff" => "image/tiff",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xls" => "application/vnd.ms-excel",
        "csv" => "text/csv",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
    .to_string()
}
