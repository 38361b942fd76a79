//! # dockside-core
//!
//! Core types and traits for dockside, a document ingestion and
//! search-consistency engine.
//!
//! Dockside watches an object store, extracts searchable text from
//! heterogeneous file formats, embeds it, and keeps a full-text + vector
//! search index consistent with the store. This crate provides the
//! foundational abstractions shared by every stage:
//!
//! - **Object access**: [`ObjectStore`] over the external bucket
//! - **Events**: [`EventQueue`] and the [`WorkEvent`] unit of work
//! - **Extraction**: [`OcrEngine`] plus the [`ExtractedDocument`] model
//! - **Embedding**: [`Embedder`] for dense chunk vectors
//! - **Indexing**: [`SearchIndex`] with idempotent upsert/delete
//!
//! ## Architecture
//!
//! ```text
//! scan ─┐
//! queue ─┼─> coordinator ─> lane workers ─> pipeline
//! sweep ─┘                                   │
//!                    fetch → extract → hash → dedup → chunk → embed → index
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`WorkEvent`] | CREATE or DELETE for one storage key |
//! | [`RawDocument`] | Downloaded object bytes |
//! | [`ExtractedDocument`] | Cleaned text plus extraction metadata |
//! | [`ContentFingerprint`] | SHA-256 of cleaned text, the dedup key |
//! | [`Chunk`] | One token window with its embedding |
//! | [`IndexedRecord`] | One search-index entry per chunk |
//! | [`Outcome`] | Terminal result of processing one event |
//! | [`PhaseTimings`] | Per-phase elapsed milliseconds |
//!
//! ## Related Crates
//!
//! - `dockside-extract`: format dispatch, OCR clients, text cleaning
//! - `dockside-chunker`: token-window chunking
//! - `dockside-embed`: embedding HTTP client and pool
//! - `dockside-index`: search index driver
//! - `dockside-store`: object store and queue clients
//! - `dockside-pipeline`: per-document pipeline and event coordinator

pub mod error;
pub mod retry;
pub mod traits;
pub mod types;

pub use error::{EmbedError, Error, ExtractError, IndexError, QueueError, Result, StoreError};
pub use retry::{with_retry, RetryPolicy};
pub use traits::*;
pub use types::*;
