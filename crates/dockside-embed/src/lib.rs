//! # dockside-embed
//!
//! Embedding generation for the dockside ingestion pipeline.
//!
//! The embedding model runs in an external HTTP service; this crate
//! provides [`HttpEmbedder`], which discovers the vector dimension once
//! at startup and enforces it on every response, and [`EmbedderPool`],
//! which bounds how many embedding requests the worker pool may have in
//! flight at once.

pub mod http;
pub mod pool;

pub use http::{EmbedderConfig, HttpEmbedder, BATCH_SIZE};
pub use pool::EmbedderPool;
