//! REST driver for an Elasticsearch-compatible search index.
//!
//! All mutation is keyed by `storage_key` and idempotent:
//!
//! - [`ensure_index`](dockside_core::SearchIndex::ensure_index) creates
//!   the index with its mapping only when absent.
//! - [`upsert_document`](dockside_core::SearchIndex::upsert_document)
//!   deletes every record for the key, then bulk-inserts one record per
//!   chunk under deterministic ids.
//! - [`delete_by_storage_key`](dockside_core::SearchIndex::delete_by_storage_key)
//!   is a delete-by-query; an absent key or index deletes 0 and succeeds.
//!
//! Readers that interleave with an upsert observe either the previous
//! document or an empty one, never a mix of versions.

use async_trait::async_trait;
use dockside_core::{Chunk, IndexError, IndexedRecord, SearchIndex};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, error, info};

/// Page size for the scroll used by `list_storage_keys`.
const SCROLL_PAGE_SIZE: usize = 1000;
const SCROLL_KEEPALIVE: &str = "2m";

/// Settings for [`ElasticIndex::new`].
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Base URL of the index service, e.g. `http://localhost:9200`.
    pub endpoint: String,
    /// Index name.
    pub index: String,
    /// Optional basic-auth credentials.
    pub username: Option<String>,
    pub password: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// HTTP driver for the search index.
pub struct ElasticIndex {
    client: reqwest::Client,
    config: IndexConfig,
    dimension: usize,
}

impl ElasticIndex {
    /// Build a driver. `dimension` fixes the dense-vector mapping.
    pub fn new(config: IndexConfig, dimension: usize) -> Result<Self, IndexError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| IndexError::Transport(format!("http client: {e}")))?;
        Ok(Self {
            client,
            config,
            dimension,
        })
    }

    /// Check the service root is reachable.
    pub async fn ping(&self) -> Result<(), IndexError> {
        let response = self
            .request(Method::GET, "")
            .send()
            .await
            .map_err(|e| IndexError::Transport(e.to_string()))?;
        let status = response.status();
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let base = self.config.endpoint.trim_end_matches('/');
        let url = if path.is_empty() {
            base.to_string()
        } else {
            format!("{base}/{}", path.trim_start_matches('/'))
        };
        let mut builder = self.client.request(method, url);
        if let Some(user) = self.config.username.as_deref().filter(|u| !u.is_empty()) {
            builder = builder.basic_auth(user, self.config.password.as_deref());
        }
        builder
    }

    fn mapping(&self) -> Value {
        json!({
            "mappings": {
                "properties": {
                    "record_id":    { "type": "keyword" },
                    "storage_key":  { "type": "keyword" },
                    "file_name":    { "type": "keyword" },
                    "file_type":    { "type": "keyword" },
                    "content":      { "type": "text" },
                    "content_hash": { "type": "keyword" },
                    "vector": {
                        "type": "dense_vector",
                        "dims": self.dimension,
                        "index": true,
                        "similarity": "cosine"
                    },
                    "chunk_index":  { "type": "integer" },
                    "chunk_count":  { "type": "integer" },
                    "indexed_at":   { "type": "date" }
                }
            }
        })
    }

    async fn delete_by_key_query(&self, storage_key: &str) -> Result<u64, IndexError> {
        let body = json!({
            "query": { "term": { "storage_key": storage_key } }
        });
        let response = self
            .request(
                Method::POST,
                &format!("{}/_delete_by_query?refresh=true", self.config.index),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| IndexError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(0),
            status if status.is_success() => {
                let payload: Value = response
                    .json()
                    .await
                    .map_err(|e| IndexError::Decode(e.to_string()))?;
                Ok(payload["deleted"].as_u64().unwrap_or(0))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(IndexError::Status {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }
}

#[async_trait]
impl SearchIndex for ElasticIndex {
    async fn ensure_index(&self) -> Result<(), IndexError> {
        let response = self
            .request(Method::HEAD, &self.config.index)
            .send()
            .await
            .map_err(|e| IndexError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::OK => return Ok(()),
            StatusCode::NOT_FOUND => {}
            status => {
                let body = response.text().await.unwrap_or_default();
                return Err(IndexError::Status {
                    status: status.as_u16(),
                    body,
                });
            }
        }

        let response = self
            .request(Method::PUT, &self.config.index)
            .json(&self.mapping())
            .send()
            .await
            .map_err(|e| IndexError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            info!(index = %self.config.index, dims = self.dimension, "index created");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        // Lost a create race; the index now exists with the same mapping.
        if body.contains("resource_already_exists_exception") {
            return Ok(());
        }
        error!(index = %self.config.index, status = %status, "index creation failed");
        Err(IndexError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn lookup_by_fingerprint(
        &self,
        content_hash: &str,
    ) -> Result<Option<String>, IndexError> {
        let body = json!({
            "query": { "term": { "content_hash": content_hash } },
            "size": 1,
            "_source": ["storage_key"]
        });

        let response = self
            .request(Method::POST, &format!("{}/_search", self.config.index))
            .json(&body)
            .send()
            .await
            .map_err(|e| IndexError::Transport(e.to_string()))?;

        match response.status() {
            // No index yet means no duplicates.
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let payload: Value = response
                    .json()
                    .await
                    .map_err(|e| IndexError::Decode(e.to_string()))?;
                let key = payload["hits"]["hits"][0]["_source"]["storage_key"]
                    .as_str()
                    .map(str::to_string);
                Ok(key)
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(IndexError::Status {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }

    async fn upsert_document(
        &self,
        storage_key: &str,
        chunks: &[Chunk],
        content_hash: &str,
    ) -> Result<(), IndexError> {
        let removed = self.delete_by_key_query(storage_key).await?;
        debug!(key = storage_key, removed, "cleared previous records");

        if chunks.is_empty() {
            return Ok(());
        }

        let now = chrono::Utc::now();
        let chunk_count = chunks.len() as u32;
        let mut ndjson = String::new();
        for chunk in chunks {
            let record =
                IndexedRecord::from_chunk(storage_key, chunk, chunk_count, content_hash, now);
            let action = json!({
                "index": { "_index": self.config.index, "_id": record.record_id }
            });
            ndjson.push_str(&action.to_string());
            ndjson.push('\n');
            ndjson.push_str(
                &serde_json::to_string(&record).map_err(|e| IndexError::Decode(e.to_string()))?,
            );
            ndjson.push('\n');
        }

        let response = self
            .request(Method::POST, "_bulk?refresh=true")
            .header("content-type", "application/x-ndjson")
            .body(ndjson)
            .send()
            .await
            .map_err(|e| IndexError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| IndexError::Decode(e.to_string()))?;
        if payload["errors"].as_bool().unwrap_or(false) {
            return Err(IndexError::Decode(format!(
                "bulk insert reported item failures for {storage_key}"
            )));
        }

        debug!(key = storage_key, chunks = chunk_count, "document upserted");
        Ok(())
    }

    async fn delete_by_storage_key(&self, storage_key: &str) -> Result<u64, IndexError> {
        let removed = self.delete_by_key_query(storage_key).await?;
        debug!(key = storage_key, removed, "delete by storage key");
        Ok(removed)
    }

    async fn list_storage_keys(&self) -> Result<Vec<String>, IndexError> {
        let mut keys = BTreeSet::new();

        let body = json!({
            "size": SCROLL_PAGE_SIZE,
            "_source": ["storage_key"],
            "query": { "match_all": {} }
        });
        let response = self
            .request(
                Method::POST,
                &format!("{}/_search?scroll={SCROLL_KEEPALIVE}", self.config.index),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| IndexError::Transport(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut payload: Value = response
            .json()
            .await
            .map_err(|e| IndexError::Decode(e.to_string()))?;
        let mut scroll_id = payload["_scroll_id"].as_str().map(str::to_string);

        loop {
            let hits = payload["hits"]["hits"].as_array().cloned().unwrap_or_default();
            if hits.is_empty() {
                break;
            }
            for hit in &hits {
                if let Some(key) = hit["_source"]["storage_key"].as_str() {
                    keys.insert(key.to_string());
                }
            }

            let Some(id) = scroll_id.as_deref() else {
                break;
            };
            let response = self
                .request(Method::POST, "_search/scroll")
                .json(&json!({ "scroll": SCROLL_KEEPALIVE, "scroll_id": id }))
                .send()
                .await
                .map_err(|e| IndexError::Transport(e.to_string()))?;
            if !response.status().is_success() {
                break;
            }
            payload = response
                .json()
                .await
                .map_err(|e| IndexError::Decode(e.to_string()))?;
            if let Some(id) = payload["_scroll_id"].as_str() {
                scroll_id = Some(id.to_string());
            }
        }

        if let Some(id) = scroll_id {
            let _ = self
                .request(Method::DELETE, "_search/scroll")
                .json(&json!({ "scroll_id": id }))
                .send()
                .await;
        }

        debug!(keys = keys.len(), "listed storage keys");
        Ok(keys.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method as MockMethod, MockServer};

    fn driver(server: &MockServer) -> ElasticIndex {
        ElasticIndex::new(
            IndexConfig {
                endpoint: server.base_url(),
                index: "documents_v1".to_string(),
                username: None,
                password: None,
                timeout: Duration::from_secs(5),
            },
            8,
        )
        .unwrap()
    }

    fn chunk(index: u32, text: &str) -> Chunk {
        Chunk {
            chunk_index: index,
            text: text.to_string(),
            vector: vec![0.1; 8],
        }
    }

    #[tokio::test]
    async fn ensure_index_skips_existing() {
        let server = MockServer::start_async().await;
        let head = server.mock_async(|when, then| {
            when.method(MockMethod::HEAD).path("/documents_v1");
            then.status(200);
        }).await;

        driver(&server).ensure_index().await.unwrap();
        head.assert();
    }

    #[tokio::test]
    async fn ensure_index_creates_with_mapping() {
        let server = MockServer::start_async().await;
        server.mock_async(|when, then| {
            when.method(MockMethod::HEAD).path("/documents_v1");
            then.status(404);
        }).await;
        let put = server.mock_async(|when, then| {
            when.method(MockMethod::PUT)
                .path("/documents_v1")
                .body_contains("dense_vector")
                .body_contains("\"dims\":8")
                .body_contains("cosine");
            then.status(200).json_body(serde_json::json!({ "acknowledged": true }));
        }).await;

        driver(&server).ensure_index().await.unwrap();
        put.assert();
    }

    #[tokio::test]
    async fn lookup_returns_existing_key() {
        let server = MockServer::start_async().await;
        server.mock_async(|when, then| {
            when.method(MockMethod::POST)
                .path("/documents_v1/_search")
                .body_contains("content_hash")
                .body_contains("cafe01");
            then.status(200).json_body(serde_json::json!({
                "hits": { "hits": [
                    { "_source": { "storage_key": "a/x.txt" } }
                ]}
            }));
        }).await;

        let found = driver(&server).lookup_by_fingerprint("cafe01").await.unwrap();
        assert_eq!(found.as_deref(), Some("a/x.txt"));
    }

    #[tokio::test]
    async fn lookup_none_on_missing_index() {
        let server = MockServer::start_async().await;
        server.mock_async(|when, then| {
            when.method(MockMethod::POST).path("/documents_v1/_search");
            then.status(404).body("index_not_found_exception");
        }).await;

        let found = driver(&server).lookup_by_fingerprint("cafe01").await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn upsert_deletes_then_bulk_inserts() {
        let server = MockServer::start_async().await;
        let delete = server.mock_async(|when, then| {
            when.method(MockMethod::POST)
                .path("/documents_v1/_delete_by_query")
                .body_contains("a/x.txt");
            then.status(200).json_body(serde_json::json!({ "deleted": 2 }));
        }).await;
        let bulk = server.mock_async(|when, then| {
            when.method(MockMethod::POST)
                .path("/_bulk")
                .body_contains("\"_index\":\"documents_v1\"")
                .body_contains("hello world")
                .body_contains("\"content_hash\":\"cafe01\"");
            then.status(200)
                .json_body(serde_json::json!({ "errors": false, "items": [] }));
        }).await;

        driver(&server)
            .upsert_document("a/x.txt", &[chunk(0, "hello world")], "cafe01")
            .await
            .unwrap();

        delete.assert();
        bulk.assert();
    }

    #[tokio::test]
    async fn upsert_surfaces_bulk_item_failures() {
        let server = MockServer::start_async().await;
        server.mock_async(|when, then| {
            when.method(MockMethod::POST).path("/documents_v1/_delete_by_query");
            then.status(200).json_body(serde_json::json!({ "deleted": 0 }));
        }).await;
        server.mock_async(|when, then| {
            when.method(MockMethod::POST).path("/_bulk");
            then.status(200)
                .json_body(serde_json::json!({ "errors": true, "items": [] }));
        }).await;

        let err = driver(&server)
            .upsert_document("a/x.txt", &[chunk(0, "t")], "h")
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Decode(_)));
    }

    #[tokio::test]
    async fn delete_returns_count() {
        let server = MockServer::start_async().await;
        server.mock_async(|when, then| {
            when.method(MockMethod::POST)
                .path("/documents_v1/_delete_by_query")
                .body_contains("gone/key.pdf");
            then.status(200).json_body(serde_json::json!({ "deleted": 3 }));
        }).await;

        let removed = driver(&server)
            .delete_by_storage_key("gone/key.pdf")
            .await
            .unwrap();
        assert_eq!(removed, 3);
    }

    #[tokio::test]
    async fn delete_missing_index_is_zero() {
        let server = MockServer::start_async().await;
        server.mock_async(|when, then| {
            when.method(MockMethod::POST).path("/documents_v1/_delete_by_query");
            then.status(404).body("index_not_found_exception");
        }).await;

        let removed = driver(&server).delete_by_storage_key("k").await.unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn list_storage_keys_follows_scroll() {
        let server = MockServer::start_async().await;
        server.mock_async(|when, then| {
            when.method(MockMethod::POST)
                .path("/documents_v1/_search")
                .query_param("scroll", "2m");
            then.status(200).json_body(serde_json::json!({
                "_scroll_id": "scroll-1",
                "hits": { "hits": [
                    { "_source": { "storage_key": "a/x.txt" } },
                    { "_source": { "storage_key": "b/y.txt" } }
                ]}
            }));
        }).await;
        server.mock_async(|when, then| {
            when.method(MockMethod::POST)
                .path("/_search/scroll")
                .body_contains("scroll-1");
            then.status(200).json_body(serde_json::json!({
                "_scroll_id": "scroll-2",
                "hits": { "hits": [
                    { "_source": { "storage_key": "a/x.txt" } },
                    { "_source": { "storage_key": "c/z.pdf" } }
                ]}
            }));
        }).await;
        server.mock_async(|when, then| {
            when.method(MockMethod::POST)
                .path("/_search/scroll")
                .body_contains("scroll-2");
            then.status(200).json_body(serde_json::json!({
                "_scroll_id": "scroll-2",
                "hits": { "hits": [] }
            }));
        }).await;
        server.mock_async(|when, then| {
            when.method(MockMethod::DELETE).path("/_search/scroll");
            then.status(200);
        }).await;

        let keys = driver(&server).list_storage_keys().await.unwrap();
        assert_eq!(keys, vec!["a/x.txt", "b/y.txt", "c/z.pdf"]);
    }

    #[tokio::test]
    async fn list_storage_keys_missing_index_is_empty() {
        let server = MockServer::start_async().await;
        server.mock_async(|when, then| {
            when.method(MockMethod::POST).path("/documents_v1/_search");
            then.status(404);
        }).await;

        let keys = driver(&server).list_storage_keys().await.unwrap();
        assert!(keys.is_empty());
    }
}
