//! Core types for dockside.
//!
//! This module contains the shared data structures used across the
//! ingestion pipeline:
//!
//! ## Object Store
//! - [`ObjectMeta`]: Metadata about one object in the external store
//! - [`RawDocument`]: An in-memory snapshot of a downloaded object
//!
//! ## Extraction
//! - [`ExtractedDocument`]: Cleaned text plus per-format metadata
//! - [`ExtractionMethod`]: Which extraction path produced the text
//!
//! ## Indexing
//! - [`Chunk`]: A token window of cleaned text with its embedding
//! - [`IndexedRecord`]: One entry in the search index (one per chunk)
//! - [`ContentFingerprint`]: SHA-256 digest of cleaned text, the dedup key
//!
//! ## Events
//! - [`WorkEvent`]: One unit of pipeline work (CREATE or DELETE)
//! - [`QueueMessage`]: A decoded queue delivery holding one or more events
//! - [`Outcome`]: The terminal result of processing one event
//! - [`PhaseTimings`]: Per-phase elapsed milliseconds for one document

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ============================================================================
// Object Store
// ============================================================================

/// Metadata about one object in the external store.
///
/// The store is never mutated by the pipeline; this is a read-only view
/// captured at LIST or HEAD time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Opaque path identifying the object; the document's identity.
    pub storage_key: String,
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time reported by the store.
    pub last_modified: DateTime<Utc>,
    /// Content type inferred from the key suffix.
    pub content_type: String,
}

/// An in-memory snapshot of one stored object, created at fetch time and
/// discarded after extraction.
#[derive(Debug, Clone)]
pub struct RawDocument {
    /// Key of the source object.
    pub storage_key: String,
    /// Raw object bytes.
    pub bytes: Vec<u8>,
    /// Content type inferred from the key suffix.
    pub content_type: String,
    /// Size in bytes as reported by the store.
    pub size: u64,
}

impl RawDocument {
    /// Last path segment of the storage key.
    #[must_use]
    pub fn file_name(&self) -> &str {
        file_name_of(&self.storage_key)
    }
}

/// Last path segment of a storage key.
#[must_use]
pub fn file_name_of(storage_key: &str) -> &str {
    storage_key.rsplit('/').next().unwrap_or(storage_key)
}

/// Lower-cased suffix of a storage key, without the dot.
#[must_use]
pub fn file_type_of(storage_key: &str) -> String {
    file_name_of(storage_key)
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

// ============================================================================
// Extraction
// ============================================================================

/// Which extraction path produced a document's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    PdfOcr,
    ImageOcr,
    DocxText,
    SpreadsheetText,
    CsvText,
    PlainText,
}

/// Result of running the extractor on one [`RawDocument`].
///
/// Created by the extractor, consumed by the chunker and the hash step,
/// discarded after indexing.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    /// Key of the source object.
    pub storage_key: String,
    /// Normalized UTF-8 text after the cleaning rules.
    pub cleaned_text: String,
    /// Extraction path that produced the text.
    pub extraction_method: ExtractionMethod,
    /// Page count, where the format has pages.
    pub page_count: Option<u32>,
    /// Soft per-page or per-sheet failures accumulated during extraction.
    pub extraction_errors: Vec<String>,
}

// ============================================================================
// Fingerprint
// ============================================================================

/// The 256-bit digest of cleaned text, hex encoded; the dedup key.
///
/// Two documents with byte-identical cleaned text always produce the same
/// fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentFingerprint(String);

impl ContentFingerprint {
    /// Fingerprint the UTF-8 encoding of `text`.
    #[must_use]
    pub fn of_text(text: &str) -> Self {
        let digest = Sha256::digest(text.as_bytes());
        Self(hex::encode(digest))
    }

    /// The hex digest string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic record id for one chunk of one document.
///
/// Stable across re-ingests of the same key so that index writes are
/// idempotent.
#[must_use]
pub fn record_id(storage_key: &str, chunk_index: u32) -> String {
    let digest = Sha256::digest(storage_key.as_bytes());
    format!("{}-{chunk_index}", hex::encode(digest))
}

// ============================================================================
// Chunks
// ============================================================================

/// A contiguous token window of cleaned text with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Position of this window in the document, 0-based.
    pub chunk_index: u32,
    /// The window's text.
    pub text: String,
    /// Dense embedding of the text, dimension fixed by the embedding
    /// service.
    pub vector: Vec<f32>,
}

/// Chunking parameters: token window size and overlap.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Window size in whitespace-delimited tokens.
    #[serde(default = "default_window")]
    pub window: usize,
    /// Overlap between consecutive windows in tokens.
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

fn default_window() -> usize {
    512
}

fn default_overlap() -> usize {
    50
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
            overlap: default_overlap(),
        }
    }
}

// ============================================================================
// Indexed Records
// ============================================================================

/// One entry in the search index. A document yields one record per chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedRecord {
    /// Deterministic id derived from the storage key and chunk index.
    pub record_id: String,
    /// Key of the source object; exact-match field.
    pub storage_key: String,
    /// Last path segment of the storage key.
    pub file_name: String,
    /// Lower-cased key suffix.
    pub file_type: String,
    /// The chunk's text; full-text analyzable.
    pub content: String,
    /// Fingerprint of the whole document's cleaned text; exact-match field.
    pub content_hash: String,
    /// Dense embedding, indexed for cosine similarity.
    pub vector: Vec<f32>,
    /// Position of this chunk in the document.
    pub chunk_index: u32,
    /// Total chunks for the document.
    pub chunk_count: u32,
    /// Insertion timestamp.
    pub indexed_at: DateTime<Utc>,
}

impl IndexedRecord {
    /// Build the record for one chunk of a document.
    #[must_use]
    pub fn from_chunk(
        storage_key: &str,
        chunk: &Chunk,
        chunk_count: u32,
        content_hash: &str,
        indexed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            record_id: record_id(storage_key, chunk.chunk_index),
            storage_key: storage_key.to_string(),
            file_name: file_name_of(storage_key).to_string(),
            file_type: file_type_of(storage_key),
            content: chunk.text.clone(),
            content_hash: content_hash.to_string(),
            vector: chunk.vector.clone(),
            chunk_index: chunk.chunk_index,
            chunk_count,
            indexed_at,
        }
    }
}

// ============================================================================
// Work Events
// ============================================================================

/// What a [`WorkEvent`] asks the pipeline to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Create,
    Delete,
}

/// Which source produced a [`WorkEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOrigin {
    /// One-shot full bucket scan at startup.
    Scan,
    /// Real-time queue subscription.
    Queue,
    /// Periodic reconciliation sweep.
    Reconcile,
}

/// The unit of work handed from the coordinator to the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkEvent {
    pub kind: EventKind,
    pub storage_key: String,
    pub origin: EventOrigin,
    pub enqueued_at: DateTime<Utc>,
}

impl WorkEvent {
    /// Construct an event enqueued now.
    #[must_use]
    pub fn new(kind: EventKind, storage_key: impl Into<String>, origin: EventOrigin) -> Self {
        Self {
            kind,
            storage_key: storage_key.into(),
            origin,
            enqueued_at: Utc::now(),
        }
    }
}

/// One queue delivery: a receipt handle plus the decoded events it
/// carried. The message may be deleted only after every event reaches a
/// terminal outcome.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    /// Opaque handle used to delete the message.
    pub receipt: String,
    /// How many times the queue has delivered this message.
    pub receive_count: u32,
    /// Decoded work events, in payload order.
    pub events: Vec<WorkEvent>,
}

// ============================================================================
// Outcomes
// ============================================================================

/// The single terminal outcome every [`WorkEvent`] produces.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Document fully indexed with this many chunks.
    Indexed { chunks: u32 },
    /// Identical content already indexed under another key.
    Duplicate { original: String },
    /// This key is already indexed with identical content.
    Unchanged,
    /// Delete processed; this many records removed (0 is still success).
    Deleted { removed: u64 },
    /// Extraction produced no text; nothing indexed.
    Empty,
    /// Processing failed. `transient` failures may succeed on redelivery.
    Failed { reason: String, transient: bool },
}

impl Outcome {
    /// Short label used in logs and aggregate counters.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Indexed { .. } => "indexed",
            Outcome::Duplicate { .. } => "duplicate",
            Outcome::Unchanged => "unchanged",
            Outcome::Deleted { .. } => "deleted",
            Outcome::Empty => "empty",
            Outcome::Failed { .. } => "failed",
        }
    }

    /// Whether the outcome is a failure that may clear on redelivery.
    #[must_use]
    pub fn is_transient_failure(&self) -> bool {
        matches!(self, Outcome::Failed { transient: true, .. })
    }
}

/// Per-phase elapsed milliseconds for one document, assembled by the
/// pipeline as each phase returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseTimings {
    pub fetch_ms: u64,
    pub extract_ms: u64,
    pub hash_ms: u64,
    pub dedup_ms: u64,
    pub chunk_ms: u64,
    pub embed_ms: u64,
    pub index_ms: u64,
    pub total_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Key helpers ====================

    #[test]
    fn test_file_name_of_nested_key() {
        assert_eq!(file_name_of("docs/2024/report.pdf"), "report.pdf");
    }

    #[test]
    fn test_file_name_of_bare_key() {
        assert_eq!(file_name_of("notes.txt"), "notes.txt");
    }

    #[test]
    fn test_file_type_of_lowercases_suffix() {
        assert_eq!(file_type_of("a/b/Scan.PDF"), "pdf");
    }

    #[test]
    fn test_file_type_of_no_suffix() {
        assert_eq!(file_type_of("README"), "");
    }

    // ==================== Fingerprint ====================

    #[test]
    fn test_fingerprint_is_stable() {
        let a = ContentFingerprint::of_text("hello world");
        let b = ContentFingerprint::of_text("hello world");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_fingerprint_differs_on_content() {
        let a = ContentFingerprint::of_text("hello world");
        let b = ContentFingerprint::of_text("hello world!");
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_known_value() {
        // sha256("Alpha Beta Gamma")
        let fp = ContentFingerprint::of_text("Alpha Beta Gamma");
        assert_eq!(
            fp.as_str(),
            hex::encode(Sha256::digest(b"Alpha Beta Gamma"))
        );
    }

    // ==================== Record ids ====================

    #[test]
    fn test_record_id_deterministic() {
        assert_eq!(record_id("a/x.txt", 0), record_id("a/x.txt", 0));
        assert_ne!(record_id("a/x.txt", 0), record_id("a/x.txt", 1));
        assert_ne!(record_id("a/x.txt", 0), record_id("b/x.txt", 0));
    }

    #[test]
    fn test_indexed_record_from_chunk() {
        let chunk = Chunk {
            chunk_index: 2,
            text: "window text".to_string(),
            vector: vec![0.5; 8],
        };
        let record = IndexedRecord::from_chunk("a/b/doc.pdf", &chunk, 3, "cafe", Utc::now());

        assert_eq!(record.record_id, record_id("a/b/doc.pdf", 2));
        assert_eq!(record.storage_key, "a/b/doc.pdf");
        assert_eq!(record.file_name, "doc.pdf");
        assert_eq!(record.file_type, "pdf");
        assert_eq!(record.content, "window text");
        assert_eq!(record.content_hash, "cafe");
        assert_eq!(record.chunk_index, 2);
        assert_eq!(record.chunk_count, 3);
    }

    // ==================== Config ====================

    #[test]
    fn test_chunk_config_default() {
        let config = ChunkConfig::default();
        assert_eq!(config.window, 512);
        assert_eq!(config.overlap, 50);
    }

    // ==================== Outcomes ====================

    #[test]
    fn test_outcome_labels() {
        assert_eq!(Outcome::Indexed { chunks: 1 }.label(), "indexed");
        assert_eq!(
            Outcome::Duplicate {
                original: "k".into()
            }
            .label(),
            "duplicate"
        );
        assert_eq!(Outcome::Unchanged.label(), "unchanged");
        assert_eq!(Outcome::Deleted { removed: 0 }.label(), "deleted");
        assert_eq!(Outcome::Empty.label(), "empty");
        assert_eq!(
            Outcome::Failed {
                reason: "x".into(),
                transient: false
            }
            .label(),
            "failed"
        );
    }

    #[test]
    fn test_outcome_transient_failure() {
        assert!(Outcome::Failed {
            reason: "timeout".into(),
            transient: true
        }
        .is_transient_failure());
        assert!(!Outcome::Failed {
            reason: "bad pdf".into(),
            transient: false
        }
        .is_transient_failure());
        assert!(!Outcome::Empty.is_transient_failure());
    }

    #[test]
    fn test_work_event_new_stamps_time() {
        let before = Utc::now();
        let event = WorkEvent::new(EventKind::Create, "a/x.txt", EventOrigin::Queue);
        assert!(event.enqueued_at >= before);
        assert_eq!(event.kind, EventKind::Create);
        assert_eq!(event.origin, EventOrigin::Queue);
    }

    #[test]
    fn test_extraction_method_serialization() {
        assert_eq!(
            serde_json::to_string(&ExtractionMethod::PdfOcr).unwrap(),
            "\"pdf_ocr\""
        );
        assert_eq!(
            serde_json::to_string(&ExtractionMethod::SpreadsheetText).unwrap(),
            "\"spreadsheet_text\""
        );
    }

    #[test]
    fn test_indexed_record_serialization_round_trip() {
        let record = IndexedRecord {
            record_id: "id-0".into(),
            storage_key: "a/x.txt".into(),
            file_name: "x.txt".into(),
            file_type: "txt".into(),
            content: "hello".into(),
            content_hash: "hash".into(),
            vector: vec![0.1, 0.2],
            chunk_index: 0,
            chunk_count: 1,
            indexed_at: Utc::now(),
        };

        let json = serde_json::to_string(&record).unwrap();
        let back: IndexedRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.record_id, record.record_id);
        assert_eq!(back.vector, record.vector);
        assert_eq!(back.chunk_count, 1);
    }
}
