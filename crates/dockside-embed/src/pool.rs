//! Embedder pool with bounded concurrency.

use dockside_core::{EmbedError, Embedder};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Wraps an [`Embedder`] behind a semaphore so that at most
/// `max_concurrent` embedding requests are in flight across all pipeline
/// workers.
pub struct EmbedderPool {
    embedder: Arc<dyn Embedder>,
    semaphore: Semaphore,
    max_concurrent: usize,
}

impl EmbedderPool {
    /// Create a new pool.
    pub fn new(embedder: Arc<dyn Embedder>, max_concurrent: usize) -> Self {
        Self {
            embedder,
            semaphore: Semaphore::new(max_concurrent.max(1)),
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// The embedding dimension.
    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    /// The model name.
    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    /// Maximum concurrent requests.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Currently available permits.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Embed a batch of texts under the concurrency limit.
    pub async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| EmbedError::Transport(format!("semaphore closed: {e}")))?;
        self.embedder.embed(texts).await
    }
}
