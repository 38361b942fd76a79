//! # dockside-index
//!
//! Search index drivers for the dockside ingestion pipeline.
//!
//! The production driver, [`ElasticIndex`], speaks the REST dialect of an
//! Elasticsearch-compatible index: explicit mapping creation, term
//! queries on keyword fields, delete-by-query keyed on `storage_key`,
//! bulk insertion under deterministic record ids, and a scroll for key
//! enumeration. [`MemoryIndex`] implements the same contract in memory
//! and backs the pipeline test suites.

pub mod elastic;
pub mod memory;

pub use elastic::{ElasticIndex, IndexConfig};
pub use memory::MemoryIndex;
