use thiserror::Error;

/// Errors from persistent store operations (used by the store trait in sigma-core).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("record not found")]
    NotFound,
}

/// Errors from the entity/fact extraction collaborator.
///
/// Never surfaced past the orchestrator: it recovers them to empty results.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("extraction failed: {0}")]
    Failed(String),

    #[error("malformed extraction output: {0}")]
    Malformed(String),
}

/// Errors raised while opening a backend at startup. Always fatal.
#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("backend unavailable: {0}")]
    Backend(String),

    #[error("schema preparation failed: {0}")]
    Schema(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}
