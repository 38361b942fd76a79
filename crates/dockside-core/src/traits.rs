//! Service traits for dockside components.
//!
//! These are the seams between the pipeline and its external
//! collaborators:
//!
//! - [`ObjectStore`]: read-only view of the bucket being watched
//! - [`EventQueue`]: typed receive/delete over the notification queue
//! - [`OcrEngine`]: text recognition for page images and image files
//! - [`Embedder`]: dense vectors for chunk texts
//! - [`SearchIndex`]: idempotent mutation of the search index
//!
//! Production implementations talk HTTP; the in-memory implementations in
//! the leaf crates back the test suites.

use async_trait::async_trait;

use crate::error::{EmbedError, ExtractError, IndexError, QueueError, StoreError};
use crate::types::{Chunk, ObjectMeta, QueueMessage};

// ============================================================================
// Object Store
// ============================================================================

/// Read-only access to the external object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List every object under a key prefix. Pagination is handled
    /// internally; folder markers (keys ending in `/`) are dropped.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StoreError>;

    /// Fetch metadata for one key, or `None` if the object is gone.
    async fn head(&self, storage_key: &str) -> Result<Option<ObjectMeta>, StoreError>;

    /// Download one object's bytes.
    async fn get(&self, storage_key: &str) -> Result<Vec<u8>, StoreError>;
}

// ============================================================================
// Event Queue
// ============================================================================

/// Typed receive/delete over the notification queue.
///
/// Receiving does not remove a message; callers must [`delete`] it after
/// every decoded event reached a terminal outcome. An undeleted message
/// redelivers, which is the at-least-once contract.
///
/// [`delete`]: EventQueue::delete
#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Long-poll for up to a batch of messages, decoding object-store
    /// notifications into work events.
    async fn receive(&self) -> Result<Vec<QueueMessage>, QueueError>;

    /// Delete a message by its receipt handle.
    async fn delete(&self, receipt: &str) -> Result<(), QueueError>;
}

// ============================================================================
// OCR
// ============================================================================

/// Text recognition over one image (or page image).
///
/// Implementations differ in transport (multipart upload vs. a
/// chat-completion call carrying a data URI) but expose the same
/// contract, so upstream code cannot tell which engine is configured.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Short engine name for logs.
    fn name(&self) -> &str;

    /// Recognize text in the given image bytes. `file_name` is used for
    /// logging and multipart metadata only.
    async fn recognize(&self, image: &[u8], file_name: &str) -> Result<String, ExtractError>;
}

// ============================================================================
// Embedding
// ============================================================================

/// Dense vector generation for chunk texts.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier sent with each request.
    fn model_name(&self) -> &str;

    /// Vector dimension, fixed at startup.
    fn dimension(&self) -> usize;

    /// Embed each text, returning one vector per input in order. Every
    /// vector is checked against [`dimension`](Embedder::dimension).
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

// ============================================================================
// Search Index
// ============================================================================

/// Idempotent mutation of the search index.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Create the index with its mapping if it does not exist.
    async fn ensure_index(&self) -> Result<(), IndexError>;

    /// Return the storage key of an existing document with this content
    /// hash, or `None`.
    async fn lookup_by_fingerprint(&self, content_hash: &str)
        -> Result<Option<String>, IndexError>;

    /// Replace every record for `storage_key` with one record per chunk.
    /// Readers observe either the previous version or the new one.
    async fn upsert_document(
        &self,
        storage_key: &str,
        chunks: &[Chunk],
        content_hash: &str,
    ) -> Result<(), IndexError>;

    /// Remove every record whose storage key equals the argument,
    /// returning the count removed. Deleting an absent key returns 0.
    async fn delete_by_storage_key(&self, storage_key: &str) -> Result<u64, IndexError>;

    /// Distinct storage keys currently present in the index. Used by the
    /// reconciliation sweep; snapshot consistency is not required.
    async fn list_storage_keys(&self) -> Result<Vec<String>, IndexError>;
}
