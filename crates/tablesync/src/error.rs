//! Error types for table synchronization.

use thiserror::Error;

/// Main error type for sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Client allocation or cursor initialization failure.
    #[error("Setup error: {0}")]
    Setup(String),

    /// Underlying database error from either side.
    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    /// Source and destination schemas disagree.
    #[error("Schema mismatch:\n{0}")]
    Schema(String),

    /// Row fetch failed mid-stream (not end-of-stream).
    #[error("Fetch error on {side}: {message}")]
    Fetch { side: String, message: String },

    /// Insert or delete failed against the destination.
    #[error("Mutation failed on {table}: {message}")]
    Mutation { table: String, message: String },

    /// Post-run consistency check failed (row count, empty-source guard).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A caller-supplied hook aborted the run.
    #[error("{stage} hook aborted the sync: {message}")]
    Hook { stage: String, message: String },

    /// Ordering contract between the two cursors was violated.
    #[error("Internal invariant violated: {0}")]
    Internal(String),

    /// IO error (dump files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV dump error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl SyncError {
    /// Create a Fetch error tagged with the failing side.
    pub fn fetch(side: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Fetch {
            side: side.into(),
            message: message.into(),
        }
    }

    /// Create a Mutation error for a table.
    pub fn mutation(table: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Mutation {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Hook error for a named hook stage.
    pub fn hook(stage: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Hook {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
