//! In-memory search index for testing without a live index service.
//!
//! [`MemoryIndex`] keeps records in a map keyed by record id and
//! implements the full [`SearchIndex`] contract, including the
//! delete-then-insert upsert. The pipeline and coordinator test suites
//! run against it.

use async_trait::async_trait;
use chrono::Utc;
use dockside_core::{Chunk, IndexError, IndexedRecord, SearchIndex};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory [`SearchIndex`] implementation.
#[derive(Default)]
pub struct MemoryIndex {
    records: Arc<RwLock<HashMap<String, IndexedRecord>>>,
}

impl MemoryIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All records currently held for one storage key, sorted by chunk
    /// index. Test helper.
    pub async fn records_for(&self, storage_key: &str) -> Vec<IndexedRecord> {
        let records = self.records.read().await;
        let mut found: Vec<IndexedRecord> = records
            .values()
            .filter(|r| r.storage_key == storage_key)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.chunk_index);
        found
    }

    /// Total record count. Test helper.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the index holds no records. Test helper.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn ensure_index(&self) -> Result<(), IndexError> {
        Ok(())
    }

    async fn lookup_by_fingerprint(
        &self,
        content_hash: &str,
    ) -> Result<Option<String>, IndexError> {
        let records = self.records.read().await;
        // First in key order, so the answer is deterministic.
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

        let now = Utc::now();
        let chunk_count = chunks.len() as u32;
        for chunk in chunks {
            let record =
                IndexedRecord::from_chunk(storage_key, chunk, chunk_count, content_hash, now);
            records.insert(record.record_id.clone(), record);
        }
        debug!(key = storage_key, chunks = chunk_count, "memory upsert");
        Ok(())
    }

    async fn delete_by_storage_key(&self, storage_key: &str) -> Result<u64, IndexError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| r.storage_key != storage_key);
        Ok((before - records.len()) as u64)
    }

    async fn list_storage_keys(&self) -> Result<Vec<String>, IndexError> {
        let records = self.records.read().await;
        let keys: BTreeSet<String> = records.values().map(|r| r.storage_key.clone()).collect();
        Ok(keys.into_iter().collect())
    }
}
