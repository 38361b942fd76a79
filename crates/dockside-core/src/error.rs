//! Error types for dockside.
//!
//! Each pipeline concern has its own error enum; the top-level [`Error`]
//! folds them together for the pipeline and the binary. Every enum knows
//! whether a given value is transient (worth retrying or leaving the
//! source message for redelivery) or permanent.

use thiserror::Error;

/// Main error type for dockside operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Object store operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Event queue operation failed
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Content extraction failed
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractError),

    /// Embedding generation failed
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbedError),

    /// Search index operation failed
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the failure may clear without intervention (network blips,
    /// 5xx responses, timeouts).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Store(e) => e.is_transient(),
            Error::Queue(e) => e.is_transient(),
            Error::Extraction(e) => e.is_transient(),
            Error::Embedding(e) => e.is_transient(),
            Error::Index(e) => e.is_transient(),
            Error::Config(_) | Error::Other(_) => false,
        }
    }
}

/// Object store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("malformed listing: {0}")]
    Listing(String),

    #[error("credentials missing: {0}")]
    Credentials(String),
}

impl StoreError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Transport(_) => true,
            StoreError::UnexpectedStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Event queue errors.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("malformed message: {0}")]
    Decode(String),

    #[error("credentials missing: {0}")]
    Credentials(String),
}

impl QueueError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            QueueError::Transport(_) => true,
            QueueError::UnexpectedStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Content extraction errors.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("ocr transport failure: {0}")]
    OcrTransport(String),

    #[error("ocr failed with status {status}: {body}")]
    OcrStatus { status: u16, body: String },

    #[error("extraction failed: {0}")]
    Failed(String),
}

impl ExtractError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            ExtractError::OcrTransport(_) => true,
            ExtractError::OcrStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Embedding errors.
#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("embedding endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("dimension mismatch: got {got}, expected {expected}")]
    DimensionMismatch { got: usize, expected: usize },

    #[error("batch order mismatch: {0} vectors for {1} texts")]
    BatchMismatch(usize, usize),

    #[error("invalid embedding configuration: {0}")]
    Configuration(String),
}

impl EmbedError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            EmbedError::Transport(_) => true,
            EmbedError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Search index errors.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("index returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Decode(String),
}

impl IndexError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            IndexError::Transport(_) => true,
            IndexError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Result type alias for dockside operations.
pub type Result<T> = std::result::Result<T, Error>;
