//! Error types for extraction and ingestion
//!
//! Anticipated conditions (tool missing, evidence not mounted, a single bad
//! file) never surface here: they are reported through `Preflight`, manifest
//! notes and callbacks. `ExtractorError` is for the unexpected class only.

use std::io;
use thiserror::Error;

/// Result type alias for extractor operations
pub type ExtractorResult<T> = Result<T, ExtractorError>;

/// Errors that can escape an extraction or ingestion phase
#[derive(Debug, Error)]
pub enum ExtractorError {
    /// I/O error (file read/write)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Manifest or index serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Discovery query without any pattern
    #[error("Invalid discovery query: {0}")]
    InvalidQuery(String),
    /// Runner could not supply the resource an extractor declared
    #[error("Missing run resource: {0}")]
    MissingResource(String),
    /// Registry entry failed to load
    #[error("Failed to load extractor '{module}': {reason}")]
    Load { module: String, reason: String },
    /// Path escapes the directory it must stay under
    #[error("Unsafe path: {0}")]
    UnsafePath(String),
    /// Settings or run configuration problem
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ExtractorError {
    pub fn load(module: impl Into<String>, reason: impl Into<String>) -> Self {
        ExtractorError::Load {
            module: module.into(),
            reason: reason.into(),
        }
    }
}
