use thiserror::Error;

/// Errors that can arise while reading or writing player records.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around JSON encoding and decoding errors.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Wrapper around IO errors (directory creation, file locks, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Returned when updating a record that is not present.
    #[error("record not found: {0}")]
    NotFound(String),

    /// The stored revision moved since the caller read the record.
    #[error("revision conflict for {account_id}: expected {expected}, found {found}")]
    Conflict {
        account_id: String,
        expected: u64,
        found: u64,
    },

    /// A field update was malformed or would produce an invalid record.
    #[error("invalid update for {account_id}: {reason}")]
    InvalidUpdate { account_id: String, reason: String },

    /// Internal error (blocking task join errors, unexpected conditions)
    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }
}
