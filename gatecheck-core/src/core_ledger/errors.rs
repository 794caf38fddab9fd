//! Error types for ledger operations

use super::types::CodeError;
use crate::storage::StorageError;
use thiserror::Error;

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors that can occur in ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Pool or migration failure while opening the store
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Could not check a connection out of the pool
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// SQLite reported an error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored row could not be decoded
    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    /// Administrative operation referenced an unknown tenant
    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    /// Administrative operation referenced an unknown event
    #[error("Event not found: {0}")]
    EventNotFound(String),

    /// Administrative insert collided with an existing row
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid participant code: {0}")]
    InvalidCode(#[from] CodeError),

    /// Blocking task panicked or was cancelled
    #[error("Task join error: {0}")]
    Join(String),
}

impl LedgerError {
    /// Whether retrying the same call later could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::Storage(_)
                | LedgerError::Pool(_)
                | LedgerError::Database(_)
                | LedgerError::Join(_)
        )
    }
}
