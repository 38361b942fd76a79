//! In-memory object store and queue for testing without live services.
//!
//! [`MemoryObjectStore`] and [`MemoryQueue`] implement the production
//! traits over maps and deques; the coordinator and pipeline scenario
//! tests run entirely against them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dockside_core::{
    ObjectMeta, ObjectStore, QueueError, QueueMessage, StoreError, EventQueue,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

/// In-memory [`ObjectStore`] implementation.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Arc<Mutex<BTreeMap<String, (Vec<u8>, DateTime<Utc>)>>>,
}

impl MemoryObjectStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an object. Test helper.
    pub async fn put(&self, storage_key: &str, bytes: &[u8]) {
        let mut objects = self.objects.lock().await;
        objects.insert(storage_key.to_string(), (bytes.to_vec(), Utc::now()));
    }

    /// Remove an object. Test helper.
    pub async fn remove(&self, storage_key: &str) {
        let mut objects = self.objects.lock().await;
        objects.remove(storage_key);
    }

    fn meta(storage_key: &str, bytes: &[u8], modified: DateTime<Utc>) -> ObjectMeta {
        ObjectMeta {
            storage_key: storage_key.to_string(),
            size: bytes.len() as u64,
            last_modified: modified,
            content_type: format!(
                "application/x-{}",
                dockside_core::file_type_of(storage_key)
            ),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StoreError> {
        let objects = self.objects.lock().await;
        Ok(objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix) && !key.ends_with('/'))
            .map(|(key, (bytes, modified))| Self::meta(key, bytes, *modified))
            .collect())
    }

    async fn head(&self, storage_key: &str) -> Result<Option<ObjectMeta>, StoreError> {
        let objects = self.objects.lock().await;
        Ok(objects
            .get(storage_key)
            .map(|(bytes, modified)| Self::meta(storage_key, bytes, *modified)))
    }

    async fn get(&self, storage_key: &str) -> Result<Vec<u8>, StoreError> {
        let objects = self.objects.lock().await;
        objects
            .get(storage_key)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| StoreError::NotFound(storage_key.to_string()))
    }
}

/// In-memory [`EventQueue`] implementation.
///
/// Messages pushed with [`push`](MemoryQueue::push) are handed out by
/// `receive`; a message stays redeliverable until `delete` is called with
/// its receipt.
#[derive(Default)]
pub struct MemoryQueue {
    pending: Arc<Mutex<VecDeque<QueueMessage>>>,
    deleted: Arc<Mutex<Vec<String>>>,
}

impl MemoryQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a message for delivery. Test helper.
    pub async fn push(&self, message: QueueMessage) {
        self.pending.lock().await.push_back(message);
    }

    /// Receipts deleted so far. Test helper.
    pub async fn deleted_receipts(&self) -> Vec<String> {
        self.deleted.lock().await.clone()
    }

    /// Messages not yet received. Test helper.
    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[async_trait]
impl EventQueue for MemoryQueue {
    async fn receive(&self) -> Result<Vec<QueueMessage>, QueueError> {
        let drained: Vec<QueueMessage> = {
            let mut pending = self.pending.lock().await;
            let take = pending.len().min(10);
            pending.drain(..take).collect()
        };
        if drained.is_empty() {
            // Stand in for the long poll so callers do not spin.
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        Ok(drained)
    }

    async fn delete(&self, receipt: &str) -> Result<(), QueueError> {
        self.deleted.lock().await.push(receipt.to_string());
        Ok(())
    }
}
