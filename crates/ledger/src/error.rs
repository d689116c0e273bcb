use thiserror::Error;

use crate::store::{RecordKind, Version};

/// Errors that can occur when interacting with the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A conditional write named a version that is no longer current.
    /// Another writer got there first; re-read and decide again.
    #[error("Version conflict on {kind} {id}: expected version {expected}, found {actual}")]
    VersionConflict {
        kind: RecordKind,
        id: String,
        expected: Version,
        actual: Version,
    },

    /// A stored record could not be mapped back into its domain type.
    #[error("Corrupt {kind} record {id}: {message}")]
    InvalidRecord {
        kind: RecordKind,
        id: String,
        message: String,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
