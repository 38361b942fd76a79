//! The per-document pipeline.
//!
//! One [`WorkEvent`] in, one terminal [`Outcome`] out, always. A CREATE
//! runs fetch → extract → hash → dedup-check → chunk → embed → index; a
//! DELETE goes straight to the index driver. Each phase reports its
//! elapsed time into a [`PhaseTimings`] value assembled as the phases
//! return.
//!
//! Failures never escape as errors: they become
//! [`Outcome::Failed`] carrying the transient/permanent classification
//! the coordinator needs for queue acknowledgement.

use dockside_chunker::chunk_text;
use dockside_core::{
    Chunk, ChunkConfig, ContentFingerprint, Error, EventKind, Outcome, PhaseTimings, RawDocument,
    SearchIndex, ObjectStore, WorkEvent,
};
use dockside_embed::EmbedderPool;
use dockside_extract::Extractor;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Every collaborator the pipeline needs, created once at startup and
/// passed by reference. There is no other way for pipeline code to reach
/// an external service.
pub struct Services {
    pub store: Arc<dyn ObjectStore>,
    pub extractor: Arc<Extractor>,
    pub chunking: ChunkConfig,
    pub embedder: Arc<EmbedderPool>,
    pub index: Arc<dyn SearchIndex>,
}

/// Process one event to its terminal outcome.
pub async fn process_event(services: &Services, event: &WorkEvent) -> (Outcome, PhaseTimings) {
    let started = Instant::now();
    let mut timings = PhaseTimings::default();

    let result = match event.kind {
        EventKind::Create => process_create(services, &event.storage_key, &mut timings).await,
        EventKind::Delete => process_delete(services, &event.storage_key).await,
    };
    timings.total_ms = elapsed_ms(started);

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => Outcome::Failed {
            reason: e.to_string(),
            transient: e.is_transient(),
        },
    };

    log_outcome(event, &outcome, &timings);
    (outcome, timings)
}

async fn process_create(
    services: &Services,
    storage_key: &str,
    timings: &mut PhaseTimings,
) -> Result<Outcome, Error> {
    // Fetch. An object that vanished between the event and now is a
    // delete in disguise.
    let phase = Instant::now();
    let Some(meta) = services.store.head(storage_key).await? else {
        debug!(key = storage_key, "object gone before fetch, deleting");
        let removed = services.index.delete_by_storage_key(storage_key).await?;
        return Ok(Outcome::Deleted { removed });
    };
    let bytes = services.store.get(storage_key).await?;
    timings.fetch_ms = elapsed_ms(phase);

    let raw = RawDocument {
        storage_key: storage_key.to_string(),
        size: bytes.len() as u64,
        bytes,
        content_type: meta.content_type,
    };

    // Extract and clean.
    let phase = Instant::now();
    let document = services.extractor.extract(&raw).await?;
    timings.extract_ms = elapsed_ms(phase);

    if !document.extraction_errors.is_empty() {
        warn!(
            key = storage_key,
            errors = ?document.extraction_errors,
            "extraction finished with soft failures"
        );
    }
    if document.cleaned_text.is_empty() {
        return Ok(Outcome::Empty);
    }

    // Fingerprint.
    let phase = Instant::now();
    let fingerprint = ContentFingerprint::of_text(&document.cleaned_text);
    timings.hash_ms = elapsed_ms(phase);

    // Dedup check.
    let phase = Instant::now();
    let holder = services
        .index
        .lookup_by_fingerprint(fingerprint.as_str())
        .await?;
    timings.dedup_ms = elapsed_ms(phase);

    match holder {
        Some(existing) if existing == storage_key => return Ok(Outcome::Unchanged),
        Some(existing) => {
            return Ok(Outcome::Duplicate { original: existing });
        }
        None => {}
    }

    // Chunk.
    let phase = Instant::now();
    let windows = chunk_text(&document.cleaned_text, &services.chunking);
    timings.chunk_ms = elapsed_ms(phase);

    // Embed.
    let phase = Instant::now();
    let texts: Vec<&str> = windows.iter().map(|w| w.text.as_str()).collect();
    let vectors = services.embedder.embed(&texts).await?;
    timings.embed_ms = elapsed_ms(phase);

    let chunks: Vec<Chunk> = windows
        .into_iter()
        .zip(vectors)
        .map(|(window, vector)| Chunk {
            chunk_index: window.chunk_index,
            text: window.text,
            vector,
        })
        .collect();
    let chunk_count = chunks.len() as u32;

    // Index.
    let phase = Instant::now();
    services
        .index
        .upsert_document(storage_key, &chunks, fingerprint.as_str())
        .await?;
    timings.index_ms = elapsed_ms(phase);

    Ok(Outcome::Indexed {
        chunks: chunk_count,
    })
}

async fn process_delete(services: &Services, storage_key: &str) -> Result<Outcome, Error> {
    let removed = services.index.delete_by_storage_key(storage_key).await?;
    Ok(Outcome::Deleted { removed })
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

fn log_outcome(event: &WorkEvent, outcome: &Outcome, timings: &PhaseTimings) {
    let key = event.storage_key.as_str();
    match outcome {
        Outcome::Indexed { chunks } => info!(
            key,
            chunks,
            fetch_ms = timings.fetch_ms,
            extract_ms = timings.extract_ms,
            hash_ms = timings.hash_ms,
            dedup_ms = timings.dedup_ms,
            chunk_ms = timings.chunk_ms,
            embed_ms = timings.embed_ms,
            index_ms = timings.index_ms,
            total_ms = timings.total_ms,
            "indexed"
        ),
        Outcome::Duplicate { original } => {
            info!(key, original = original.as_str(), "duplicate content, not indexed");
        }
        Outcome::Unchanged => debug!(key, "already indexed with identical content"),
        Outcome::Deleted { removed } => info!(key, removed, "deleted"),
        Outcome::Empty => warn!(key, "empty extraction, nothing to index"),
        Outcome::Failed { reason, transient } => {
            error!(key, transient, reason = reason.as_str(), "processing failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dockside_core::{
        EmbedError, Embedder, EventOrigin, ExtractError, IndexError, IndexedRecord, ObjectMeta,
        OcrEngine, StoreError,
    };
    use dockside_extract::ElisionTable;
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    const DIM: usize = 4;

    // ==================== Test doubles ====================

    struct StubStore {
        objects: HashMap<String, Vec<u8>>,
    }

    #[async_trait]
    impl ObjectStore for StubStore {
        async fn list(&self, _prefix: &str) -> Result<Vec<ObjectMeta>, StoreError> {
            Ok(Vec::new())
        }

        async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, StoreError> {
            Ok(self.objects.get(key).map(|bytes| ObjectMeta {
                storage_key: key.to_string(),
                size: bytes.len() as u64,
                last_modified: chrono::Utc::now(),
                content_type: "text/plain".into(),
            }))
        }

        async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
            self.objects
                .get(key)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(key.to_string()))
        }
    }

    struct StubIndex {
        records: RwLock<HashMap<String, IndexedRecord>>,
    }

    impl StubIndex {
        fn new() -> Self {
            Self {
                records: RwLock::new(HashMap::new()),
            }
        }

        async fn keys(&self) -> Vec<String> {
            let records = self.records.read().await;
            let mut keys: Vec<String> =
                records.values().map(|r| r.storage_key.clone()).collect();
            keys.sort();
            keys.dedup();
            keys
        }
    }

    #[async_trait]
    impl SearchIndex for StubIndex {
        async fn ensure_index(&self) -> Result<(), IndexError> {
            Ok(())
        }

        async fn lookup_by_fingerprint(
            &self,
            content_hash: &str,
        ) -> Result<Option<String>, IndexError> {
            let records = self.records.read().await;
            Ok(records
                .values()
                .filter(|r| r.content_hash == content_hash)
                .map(|r| r.storage_key.clone())
                .min())
        }

        async fn upsert_document(
            &self,
            storage_key: &str,
            chunks: &[Chunk],
            content_hash: &str,
        ) -> Result<(), IndexError> {
            let mut records = self.records.write().await;
            records.retain(|_, r| r.storage_key != storage_key);
            let now = chrono::Utc::now();
            for chunk in chunks {
                let record = IndexedRecord::from_chunk(
                    storage_key,
                    chunk,
                    chunks.len() as u32,
                    content_hash,
                    now,
                );
                records.insert(record.record_id.clone(), record);
            }
            Ok(())
        }

        async fn delete_by_storage_key(&self, storage_key: &str) -> Result<u64, IndexError> {
            let mut records = self.records.write().await;
            let before = records.len();
            records.retain(|_, r| r.storage_key != storage_key);
            Ok((before - records.len()) as u64)
        }

        async fn list_storage_keys(&self) -> Result<Vec<String>, IndexError> {
            Ok(self.keys().await)
        }
    }

    struct StubEmbedder;

    #[async_trait]
    impl Embedder for StubEmbedder {
        fn model_name(&self) -> &str {
            "stub"
        }

        fn dimension(&self) -> usize {
            DIM
        }

        async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
            Ok(texts.iter().map(|t| vec![t.len() as f32; DIM]).collect())
        }
    }

    struct StubOcr;

    #[async_trait]
    impl OcrEngine for StubOcr {
        fn name(&self) -> &str {
            "stub"
        }

        async fn recognize(&self, _image: &[u8], _name: &str) -> Result<String, ExtractError> {
            Err(ExtractError::Failed("no ocr in tests".into()))
        }
    }

    fn services(objects: &[(&str, &[u8])]) -> (Services, Arc<StubIndex>) {
        let index = Arc::new(StubIndex::new());
        let services = Services {
            store: Arc::new(StubStore {
                objects: objects
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), v.to_vec()))
                    .collect(),
            }),
            extractor: Arc::new(Extractor::new(Arc::new(StubOcr), &ElisionTable::default())),
            chunking: ChunkConfig::default(),
            embedder: Arc::new(EmbedderPool::new(Arc::new(StubEmbedder), 2)),
            index: Arc::clone(&index) as Arc<dyn SearchIndex>,
        };
        (services, index)
    }

    fn create(key: &str) -> WorkEvent {
        WorkEvent::new(EventKind::Create, key, EventOrigin::Queue)
    }

    fn delete(key: &str) -> WorkEvent {
        WorkEvent::new(EventKind::Delete, key, EventOrigin::Queue)
    }

    // ==================== CREATE path ====================

    #[tokio::test]
    async fn test_create_indexes_document() {
        let (services, index) = services(&[("a/x.txt", b"hello world".as_slice())]);
        let (outcome, timings) = process_event(&services, &create("a/x.txt")).await;

        assert_eq!(outcome, Outcome::Indexed { chunks: 1 });
        let records = index.records.read().await;
        assert_eq!(records.len(), 1);
        let record = records.values().next().unwrap();
        assert_eq!(record.content, "hello world");
        assert_eq!(record.content_hash, ContentFingerprint::of_text("hello world").as_str());
        assert_eq!(record.vector.len(), DIM);
        assert!(timings.total_ms >= timings.fetch_ms);
    }

    #[tokio::test]
    async fn test_create_empty_file_is_empty_outcome() {
        let (services, index) = services(&[("a/empty.txt", b"".as_slice())]);
        let (outcome, _) = process_event(&services, &create("a/empty.txt")).await;

        assert_eq!(outcome, Outcome::Empty);
        assert!(index.records.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_create_duplicate_not_indexed() {
        let (services, index) =
            services(&[("a/x.txt", b"hello world".as_slice()), ("b/y.txt", b"hello world".as_slice())]);

        let (first, _) = process_event(&services, &create("a/x.txt")).await;
        let (second, _) = process_event(&services, &create("b/y.txt")).await;

        assert_eq!(first, Outcome::Indexed { chunks: 1 });
        assert_eq!(
            second,
            Outcome::Duplicate {
                original: "a/x.txt".to_string()
            }
        );
        assert_eq!(index.keys().await, vec!["a/x.txt"]);
    }

    #[tokio::test]
    async fn test_create_same_content_same_key_is_unchanged() {
        let (services, _) = services(&[("a/x.txt", b"hello world".as_slice())]);

        let (first, _) = process_event(&services, &create("a/x.txt")).await;
        let (second, _) = process_event(&services, &create("a/x.txt")).await;

        assert_eq!(first, Outcome::Indexed { chunks: 1 });
        assert_eq!(second, Outcome::Unchanged);
    }

    #[tokio::test]
    async fn test_create_missing_object_becomes_delete() {
        let (services, index) = services(&[]);
        index
            .upsert_document(
                "ghost.txt",
                &[Chunk {
                    chunk_index: 0,
                    text: "stale".into(),
                    vector: vec![0.0; DIM],
                }],
                "stale-hash",
            )
            .await
            .unwrap();

        let (outcome, _) = process_event(&services, &create("ghost.txt")).await;
        assert_eq!(outcome, Outcome::Deleted { removed: 1 });
        assert!(index.records.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_create_unsupported_type_is_permanent_failure() {
        let (services, _) = services(&[("a/blob.bin", b"x".as_slice())]);
        let (outcome, _) = process_event(&services, &create("a/blob.bin")).await;

        match outcome {
            Outcome::Failed { transient, .. } => assert!(!transient),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_replaces_previous_content() {
        let (services, index) = services(&[("a/x.txt", b"version two".as_slice())]);
        index
            .upsert_document(
                "a/x.txt",
                &[Chunk {
                    chunk_index: 0,
                    text: "version one".into(),
                    vector: vec![0.0; DIM],
                }],
                ContentFingerprint::of_text("version one").as_str(),
            )
            .await
            .unwrap();

        let (outcome, _) = process_event(&services, &create("a/x.txt")).await;
        assert_eq!(outcome, Outcome::Indexed { chunks: 1 });

        let records = index.records.read().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records.values().next().unwrap().content, "version two");
    }

    // ==================== DELETE path ====================

    #[tokio::test]
    async fn test_delete_removes_records() {
        let (services, index) = services(&[]);
        index
            .upsert_document(
                "a/x.txt",
                &[
                    Chunk {
                        chunk_index: 0,
                        text: "one".into(),
                        vector: vec![0.0; DIM],
                    },
                    Chunk {
                        chunk_index: 1,
                        text: "two".into(),
                        vector: vec![0.0; DIM],
                    },
                ],
                "h",
            )
            .await
            .unwrap();

        let (outcome, _) = process_event(&services, &delete("a/x.txt")).await;
        assert_eq!(outcome, Outcome::Deleted { removed: 2 });
        assert!(index.records.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_unknown_key_succeeds_with_zero() {
        let (services, _) = services(&[]);
        let (outcome, _) = process_event(&services, &delete("never/indexed.txt")).await;
        assert_eq!(outcome, Outcome::Deleted { removed: 0 });
    }

    // ==================== Fetch errors ====================

    #[tokio::test]
    async fn test_store_failure_maps_to_failed() {
        struct FailingStore;

        #[async_trait]
        impl ObjectStore for FailingStore {
            async fn list(&self, _p: &str) -> Result<Vec<ObjectMeta>, StoreError> {
                Err(StoreError::Transport("down".into()))
            }
            async fn head(&self, _k: &str) -> Result<Option<ObjectMeta>, StoreError> {
                Err(StoreError::Transport("down".into()))
            }
            async fn get(&self, _k: &str) -> Result<Vec<u8>, StoreError> {
                Err(StoreError::Transport("down".into()))
            }
        }

        let (mut services, _) = services(&[]);
        services.store = Arc::new(FailingStore);

        let (outcome, _) = process_event(&services, &create("a/x.txt")).await;
        match outcome {
            Outcome::Failed { transient, .. } => assert!(transient),
            other => panic!("expected transient failure, got {other:?}"),
        }
    }
}
