//! # dockside-pipeline
//!
//! The ingestion pipeline and its event coordinator.
//!
//! [`process_event`] turns one [`WorkEvent`](dockside_core::WorkEvent)
//! into exactly one terminal [`Outcome`](dockside_core::Outcome),
//! consulting the extractor, chunker, embedder, and index driver through
//! the [`Services`] record. [`Coordinator`] feeds it from the full scan,
//! the queue subscription, and the reconciliation sweep, with per-key
//! ordering, bounded lanes, and a single outcome reducer that owns the
//! aggregate statistics and queue acknowledgement.

pub mod coordinator;
pub mod pipeline;

pub use coordinator::{Coordinator, CoordinatorConfig, CoordinatorHandle, OutcomeTotals};
pub use pipeline::{process_event, Services};
