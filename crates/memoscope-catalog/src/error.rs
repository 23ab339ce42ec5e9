use thiserror::Error;

/// Typed failures surfaced by the catalog store.
///
/// Mirrors the error kinds from the pipeline-level error design: callers at
/// orchestration boundaries wrap these in `anyhow::Error` via `?`.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CatalogError>;
