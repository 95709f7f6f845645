use recmap_types::Key;

/// Errors from record store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Optimistic concurrency check failed on write.
    #[error("generation mismatch for {key}: expected {expected}, found {actual}")]
    GenerationMismatch { key: Key, expected: u32, actual: u32 },

    /// A create-only write found an existing record.
    #[error("record already exists: {0}")]
    RecordExists(Key),

    /// The key cannot address a record (empty namespace or set).
    #[error("invalid key {key}: {reason}")]
    InvalidKey { key: Key, reason: String },

    /// The operation exceeded the policy's time budget.
    #[error("operation timed out after {0} ms")]
    Timeout(u64),

    /// The store could not be reached or refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
