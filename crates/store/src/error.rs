//! Error types for the storage seams.

/// Errors produced by document and object stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
