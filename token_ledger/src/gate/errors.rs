//! Gating error types.

use thiserror::Error;

use crate::entitlement::EntitlementError;
use crate::ledger::LedgerError;

/// Errors raised while pricing or charging a gated action
#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Entitlement(#[from] EntitlementError),

    #[error("Invalid action: {0}")]
    InvalidAction(String),
}

impl GateError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Ledger(err) => err.is_retryable(),
            Self::Entitlement(err) => err.is_retryable(),
            Self::InvalidAction(_) => false,
        }
    }

    pub fn client_message(&self) -> String {
        match self {
            Self::Ledger(err) => err.client_message(),
            Self::Entitlement(err) => err.client_message(),
            Self::InvalidAction(reason) => format!("Invalid action: {reason}"),
        }
    }
}

pub type GateResult<T> = Result<T, GateError>;
