//! Error types for the document store.

use thiserror::Error;

/// Main error type for store operations.
///
/// Pipeline-local failures (`Validation`, `Conflict`) are raised before any
/// reactor is contacted. Reactor-originated failures carry the reactor's
/// message verbatim.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Version conflict: expected {expected}, current is {actual}")]
    Conflict { expected: u64, actual: u64 },

    #[error("Reactor {reactor} rejected change: {message}")]
    Rejected { reactor: String, message: String },

    #[error("Reactor {reactor} did not answer in time")]
    ReactorTimeout { reactor: String },

    #[error("Document not found: {model}/{id}")]
    NotFound { model: String, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No reactor available for model {0}")]
    ReactorUnavailable(String),

    #[error("Reactor {reactor} already registered for model {model}")]
    ReactorExists { model: String, reactor: String },

    #[error("Submission cancelled before commit")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Store is shut down")]
    Shutdown,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether the caller can reasonably retry the same request after
    /// re-reading the document.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict { .. } | StoreError::ReactorTimeout { .. }
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
