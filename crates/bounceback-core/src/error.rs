//! Error types for bounceback-core

use thiserror::Error;

/// Result type alias using bounceback-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in bounceback-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Startup migration failure; the store is unusable until resolved
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// A record violated its kind's schema constraints
    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    /// The hard storage limit would be exceeded by this write
    #[error("Storage limit exceeded: {size_bytes} bytes used, hard limit is {limit_bytes}")]
    StorageLimitExceeded { size_bytes: u64, limit_bytes: u64 },

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// No connectivity for a remote operation
    #[error("Network unavailable")]
    NetworkUnavailable,

    /// A remote request exceeded its timeout
    #[error("Request timed out")]
    RequestTimeout,

    /// The server rejected an operation; not retried past the queue policy
    #[error("Server rejected operation ({code}): {message}")]
    ServerRejected { code: u16, message: String },

    /// Conflicts left unresolved under the manual strategy
    #[error("{0} conflict(s) require manual resolution")]
    ConflictUnresolved(usize),

    /// Field encryption/decryption failure
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the sync engine should retry the failed operation later.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::NetworkUnavailable | Self::RequestTimeout)
    }
}
