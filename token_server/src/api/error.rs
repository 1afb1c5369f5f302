//! Mapping of library errors onto HTTP responses.
//!
//! Storage details never reach the client: database failures become a
//! generic 500 and are logged server-side.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use token_ledger::{
    EntitlementError, GateError, LedgerError, PurchaseError,
};

/// JSON error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub needed: Option<i64>,
    /// Set when the same request may succeed later
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            required: None,
            available: None,
            needed: None,
            retryable: false,
        }
    }
}

/// Error returned by every API handler
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Entitlement(#[from] EntitlementError),

    #[error(transparent)]
    Purchase(#[from] PurchaseError),

    #[error("Invalid action: {0}")]
    InvalidAction(String),
}

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::Ledger(err) => ApiError::Ledger(err),
            GateError::Entitlement(err) => ApiError::Entitlement(err),
            GateError::InvalidAction(reason) => ApiError::InvalidAction(reason),
        }
    }
}

fn ledger_status(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
        LedgerError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
        LedgerError::AccountNotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::ReferenceConflict(_) => StatusCode::CONFLICT,
        LedgerError::BalanceOverflow => StatusCode::UNPROCESSABLE_ENTITY,
        LedgerError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
        LedgerError::Database(_) | LedgerError::CorruptRecord(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn entitlement_status(err: &EntitlementError) -> StatusCode {
    match err {
        EntitlementError::InvalidTokens(_) => StatusCode::BAD_REQUEST,
        EntitlementError::FreeAllowanceExhausted { .. } => StatusCode::CONFLICT,
        EntitlementError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
        EntitlementError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Ledger(err) => ledger_status(err),
            ApiError::Entitlement(err) => entitlement_status(err),
            ApiError::Purchase(PurchaseError::InvalidPurchase(_)) => StatusCode::BAD_REQUEST,
            ApiError::Purchase(PurchaseError::Ledger(err)) => ledger_status(err),
            ApiError::Purchase(PurchaseError::Database(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Purchase(PurchaseError::Timeout(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InvalidAction(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn body(&self) -> ErrorResponse {
        match self {
            ApiError::Ledger(err) | ApiError::Purchase(PurchaseError::Ledger(err)) => {
                let mut body = ErrorResponse::new(err.client_message());
                if let LedgerError::InsufficientBalance {
                    required,
                    available,
                } = err
                {
                    body.required = Some(*required);
                    body.available = Some(*available);
                    body.needed = err.tokens_needed();
                }
                body.retryable = err.is_retryable();
                body
            }
            ApiError::Entitlement(err) => {
                let mut body = ErrorResponse::new(err.client_message());
                body.retryable = err.is_retryable();
                body
            }
            ApiError::Purchase(err) => {
                let mut body = ErrorResponse::new(err.client_message());
                body.retryable = err.is_retryable();
                body
            }
            ApiError::InvalidAction(reason) => {
                ErrorResponse::new(format!("Invalid action: {reason}"))
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, status = %status, "Request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "Request rejected");
        }

        (status, Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_insufficient_balance_is_payment_required() {
        let err = ApiError::from(LedgerError::InsufficientBalance {
            required: 9,
            available: 8,
        });
        assert_eq!(err.status(), StatusCode::PAYMENT_REQUIRED);

        let body = err.body();
        assert_eq!(body.required, Some(9));
        assert_eq!(body.available, Some(8));
        assert_eq!(body.needed, Some(1));
        assert!(!body.retryable);
    }

    #[test]
    fn test_timeout_is_retryable() {
        let err = ApiError::from(LedgerError::Timeout(Duration::from_secs(5)));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.body().retryable);
    }

    #[test]
    fn test_database_error_is_sanitized() {
        let err = ApiError::from(LedgerError::Database(sqlx::Error::PoolTimedOut));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.body().error, "Internal server error");
    }

    #[test]
    fn test_gate_errors_unwrap() {
        let err = ApiError::from(GateError::InvalidAction("boost level 9".to_string()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = ApiError::from(GateError::Ledger(LedgerError::InvalidAmount(0)));
        assert!(matches!(err, ApiError::Ledger(LedgerError::InvalidAmount(0))));
    }

    #[test]
    fn test_invalid_purchase_is_bad_request() {
        let err = ApiError::from(PurchaseError::InvalidPurchase("empty".to_string()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_reference_conflict_is_conflict() {
        let err = ApiError::from(PurchaseError::Ledger(LedgerError::ReferenceConflict(
            "pi_secret".to_string(),
        )));
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert!(!err.body().error.contains("pi_secret"));
    }

    #[test]
    fn test_catalog_timeout_is_retryable() {
        let err = ApiError::from(PurchaseError::Timeout(Duration::from_secs(10)));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.body().retryable);
    }
}
