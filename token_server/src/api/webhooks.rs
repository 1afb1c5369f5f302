//! Payment confirmation webhook.
//!
//! Signature verification belongs to the payment collaborator in front of
//! this service; the handler only sees confirmed, verified purchases.

use axum::{Json, extract::State};
use token_ledger::purchase::{ConfirmedPurchase, ReconcileOutcome};

use super::{AppState, error::ApiError};

/// Credit a confirmed purchase.
///
/// Always `200 OK` for a valid event, including redeliveries, which report
/// `alreadyProcessed: true`. Providers retry on any other status.
pub async fn purchase_confirmed(
    State(state): State<AppState>,
    Json(event): Json<ConfirmedPurchase>,
) -> Result<Json<ReconcileOutcome>, ApiError> {
    Ok(Json(state.reconciler.reconcile(&event).await?))
}
