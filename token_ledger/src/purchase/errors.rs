//! Purchase reconciliation error types.

use std::time::Duration;
use thiserror::Error;

use crate::db::timeouts::TimeoutFailure;
use crate::ledger::LedgerError;

/// Purchase reconciliation errors
#[derive(Debug, Error)]
pub enum PurchaseError {
    #[error("Invalid purchase: {0}")]
    InvalidPurchase(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Package catalog read failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Package catalog read timed out after {0:?}")]
    Timeout(Duration),
}

impl PurchaseError {
    /// Whether redelivering the same event may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidPurchase(_) => false,
            Self::Ledger(err) => err.is_retryable(),
            Self::Database(_) | Self::Timeout(_) => true,
        }
    }

    /// Message safe to hand back to the payment collaborator
    pub fn client_message(&self) -> String {
        match self {
            Self::InvalidPurchase(reason) => format!("Invalid purchase: {reason}"),
            Self::Ledger(err) => err.client_message(),
            Self::Database(_) => "Internal server error".to_string(),
            Self::Timeout(_) => "Package catalog busy, please retry".to_string(),
        }
    }
}

impl TimeoutFailure for PurchaseError {
    fn timed_out(duration: Duration) -> Self {
        PurchaseError::Timeout(duration)
    }
}

pub type PurchaseResult<T> = Result<T, PurchaseError>;
