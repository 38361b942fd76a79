//! # dockside-chunker
//!
//! Token-window chunking for the dockside ingestion pipeline.
//!
//! Cleaned text is split into overlapping windows of whitespace-delimited
//! tokens. With window size W and overlap O, the window slides by W − O
//! tokens; the last window holds whatever remains (at least one token).
//! A text of T tokens yields exactly one window when T ≤ W, and
//! `ceil(max(T − O, 1) / (W − O))` windows otherwise.

use dockside_core::ChunkConfig;
use tracing::debug;

/// A token window produced by [`chunk_text`], before embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextWindow {
    /// Position of this window in the document, 0-based.
    pub chunk_index: u32,
    /// The window's text, tokens re-joined with single spaces.
    pub text: String,
}

/// Split `text` into overlapping token windows.
///
/// Tokens are whitespace-delimited words; the original inter-token
/// whitespace is not preserved inside a window. Empty or
/// whitespace-only text yields no windows.
#[must_use]
pub fn chunk_text(text: &str, config: &ChunkConfig) -> Vec<TextWindow> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.is_empty() {
        return Vec::new();
    }

    let window = config.window.max(1);
    let step = window.saturating_sub(config.overlap).max(1);

    let mut windows = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + window).min(tokens.len());
        windows.push(TextWindow {
            chunk_index: windows.len() as u32,
            text: tokens[start..end].join(" "),
        });
        if end == tokens.len() {
            break;
        }
        start += step;
    }

    debug!(
        tokens = tokens.len(),
        windows = windows.len(),
        window,
        overlap = config.overlap,
        "chunked text"
    );
    windows
}

/// The number of windows [`chunk_text`] produces for `token_count` tokens.
#[must_use]
pub fn expected_windows(token_count: usize, config: &ChunkConfig) -> usize {
    if token_count == 0 {
        return 0;
    }
    if token_count <= config.window {
        return 1;
    }
    let step = config.window.saturating_sub(config.overlap).max(1);
    token_count
        .saturating_sub(config.overlap)
        .max(1)
        .div_ceil(step)
}
