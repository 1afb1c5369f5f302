//! Entitlement error types.

use std::time::Duration;
use thiserror::Error;

use crate::db::timeouts::TimeoutFailure;
use crate::ledger::UserId;

/// Entitlement errors
#[derive(Debug, Error)]
pub enum EntitlementError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Negative token spend reported for a contact
    #[error("Invalid tokens spent: {0}")]
    InvalidTokens(i64),

    /// A free contact was recorded after the month's allowance ran out
    #[error("Free contact allowance exhausted for user {user_id}")]
    FreeAllowanceExhausted { user_id: UserId },

    /// The entitlement lock or store call did not complete in time
    #[error("Entitlement operation timed out after {0:?}")]
    Timeout(Duration),
}

impl EntitlementError {
    /// Whether the caller may safely retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EntitlementError::Database(_) | EntitlementError::Timeout(_)
        )
    }

    /// Get a client-safe error message
    pub fn client_message(&self) -> String {
        match self {
            EntitlementError::Database(_) => "Internal server error".to_string(),
            EntitlementError::FreeAllowanceExhausted { .. } => {
                "Free contact allowance exhausted".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl TimeoutFailure for EntitlementError {
    fn timed_out(duration: Duration) -> Self {
        EntitlementError::Timeout(duration)
    }
}

/// Result type for entitlement operations
pub type EntitlementResult<T> = Result<T, EntitlementError>;
