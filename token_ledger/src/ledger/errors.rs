//! Ledger error types.

use std::time::Duration;
use thiserror::Error;

use super::models::UserId;
use crate::db::timeouts::TimeoutFailure;

/// Ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Storage transport or transaction failure. Always rolled back.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Requested token amount is zero or negative
    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),

    /// Balance is below the requested debit
    #[error("Insufficient balance: available {available}, required {required}")]
    InsufficientBalance { required: i64, available: i64 },

    /// Account has never been credited
    #[error("Token account not found for user {0}")]
    AccountNotFound(UserId),

    /// A counter would overflow
    #[error("Balance overflow")]
    BalanceOverflow,

    /// The row lock or the store call did not complete in time
    #[error("Ledger operation timed out after {0:?}")]
    Timeout(Duration),

    /// The external reference is already recorded for another user or kind
    #[error("External reference '{0}' is already used by another transaction")]
    ReferenceConflict(String),

    /// A stored record could not be decoded
    #[error("Corrupt ledger record: {0}")]
    CorruptRecord(String),
}

impl LedgerError {
    /// Whether the caller may safely retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Database(_) | LedgerError::Timeout(_))
    }

    /// Number of tokens the user still needs, for insufficient balance errors
    pub fn tokens_needed(&self) -> Option<i64> {
        match self {
            LedgerError::InsufficientBalance {
                required,
                available,
            } => Some(required - available),
            _ => None,
        }
    }

    /// Get a client-safe error message that doesn't leak storage details
    pub fn client_message(&self) -> String {
        match self {
            LedgerError::Database(_) | LedgerError::CorruptRecord(_) => {
                "Internal server error".to_string()
            }
            LedgerError::AccountNotFound(_) => "Token account not found".to_string(),
            LedgerError::InsufficientBalance {
                required,
                available,
            } => format!(
                "Insufficient tokens: {} more needed",
                required.saturating_sub(*available)
            ),
            LedgerError::Timeout(_) => "Ledger busy, please retry".to_string(),
            LedgerError::ReferenceConflict(_) => {
                "External reference is already used by another transaction".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl TimeoutFailure for LedgerError {
    fn timed_out(duration: Duration) -> Self {
        LedgerError::Timeout(duration)
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
