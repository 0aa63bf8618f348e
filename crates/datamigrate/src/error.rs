//! Error types for the migration library.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (unknown mode, empty table list, bad YAML values).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source or target store unreachable.
    #[error("Connection to {store} failed: {message}")]
    Connection { store: String, message: String },

    /// Fetch failed for a specific table.
    #[error("Failed to fetch data from table {table}: {message}")]
    Fetch { table: String, message: String },

    /// Import failed for a specific table.
    #[error("Failed to import data for table {table}: {message}")]
    Import { table: String, message: String },

    /// A single batch failed inside the batch processor.
    #[error("Failed to import batch {batch}/{total}: {message}")]
    Batch {
        batch: usize,
        total: usize,
        message: String,
    },

    /// Pre- or post-migration validation failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Snapshot could not be created, persisted or parsed.
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// No snapshot file exists for the given ID.
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// Rollback was already performed for this snapshot.
    #[error("Snapshot {0} has already been rolled back")]
    AlreadyRolledBack(String),

    /// Rollback could not undo one or more tables.
    #[error("Rollback failed: {0}")]
    Rollback(String),

    /// Migration mode exists but has no implementation.
    #[error("{0} migration is not supported")]
    NotSupported(String),

    /// Store client does not support the requested operation.
    #[error("Operation not supported by store {store}: {operation}")]
    Unsupported { store: String, operation: String },

    /// Worker pool lost its workers before all results arrived.
    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Fetch error
    pub fn fetch(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Fetch {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create an Import error
    pub fn import(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Import {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Connection error
    pub fn connection(store: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Connection {
            store: store.into(),
            message: message.into(),
        }
    }

    /// Create an Unsupported error for a store operation.
    pub fn unsupported(store: impl Into<String>, operation: impl Into<String>) -> Self {
        MigrateError::Unsupported {
            store: store.into(),
            operation: operation.into(),
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => 2,
            MigrateError::Validation(_) => 3,
            MigrateError::Snapshot(_)
            | MigrateError::SnapshotNotFound(_)
            | MigrateError::AlreadyRolledBack(_)
            | MigrateError::Rollback(_) => 4,
            MigrateError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
