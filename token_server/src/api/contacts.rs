//! Gated contact and action handlers.
//!
//! # Examples
//!
//! Price a contact:
//! ```bash
//! curl http://localhost:3000/api/v1/contacts/7/quote -H "x-user-id: 42"
//! ```
//!
//! Boost a listing:
//! ```bash
//! curl -X POST http://localhost:3000/api/v1/actions/charge \
//!   -H "x-user-id: 42" -H "Content-Type: application/json" \
//!   -d '{"action": "boost_listing", "level": 2}'
//! ```

use axum::{
    Extension, Json,
    extract::{Path, State},
};
use token_ledger::{
    entitlement::BusinessId,
    gate::{ContactOutcome, ContactQuote, GatedAction},
    ledger::{ConsumeReceipt, TransactionMetadata, UserId},
};

use super::{AppState, error::ApiError, request_id::RequestId};

/// Price of contacting a business, without side effects
pub async fn quote_contact(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Path(business_id): Path<BusinessId>,
) -> Result<Json<ContactQuote>, ApiError> {
    Ok(Json(state.gate.quote(user_id, business_id).await?))
}

/// Contact a business, paying its current price.
///
/// # Errors
///
/// - `402 Payment Required`: Balance below the price, with
///   `required`, `available` and `needed`
/// - `503 Service Unavailable`: Lock contention, retry
pub async fn contact_business(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    request_id: RequestId,
    Path(business_id): Path<BusinessId>,
) -> Result<Json<ContactOutcome>, ApiError> {
    let metadata = TransactionMetadata::new().with_reference_id(request_id.into_string());
    Ok(Json(
        state.gate.contact(user_id, business_id, metadata).await?,
    ))
}

/// Charge a flat-priced gated action
pub async fn charge_action(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    request_id: RequestId,
    Json(action): Json<GatedAction>,
) -> Result<Json<ConsumeReceipt>, ApiError> {
    let metadata = TransactionMetadata::new().with_reference_id(request_id.into_string());
    Ok(Json(state.gate.charge(user_id, &action, metadata).await?))
}
