//! Token balance and history handlers.
//!
//! # Examples
//!
//! ```bash
//! curl http://localhost:3000/api/v1/tokens/packages
//! curl http://localhost:3000/api/v1/tokens/balance -H "x-user-id: 42"
//! curl "http://localhost:3000/api/v1/tokens/transactions?kind=consumption&limit=20" \
//!   -H "x-user-id: 42"
//! ```

use axum::{
    Extension, Json,
    extract::{Query, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use token_ledger::ledger::{
    TokenSummary, TransactionFilter, TransactionKind, TransactionPage, UserId,
};
use token_ledger::purchase::PackageListing;

use super::{AppState, error::ApiError};

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub user_id: UserId,
    pub balance: i64,
}

#[derive(Debug, Serialize)]
pub struct PackagesResponse {
    pub packages: Vec<PackageListing>,
}

/// Query parameters of the history endpoint
#[derive(Debug, Default, Deserialize)]
pub struct TransactionQuery {
    pub kind: Option<TransactionKind>,
    pub action_type: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Current spendable balance.
///
/// Returns `200 OK` with `{"user_id": 42, "balance": 8}`; a user that was
/// never credited reads as 0.
pub async fn get_balance(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = state.ledger.get_balance(user_id).await?;
    Ok(Json(BalanceResponse { user_id, balance }))
}

/// Balance, counters and utilization
pub async fn get_summary(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
) -> Result<Json<TokenSummary>, ApiError> {
    Ok(Json(state.ledger.get_summary(user_id).await?))
}

/// Transaction history, newest first.
///
/// `limit` defaults to 50 and is clamped to 1..=200.
pub async fn get_transactions(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Query(query): Query<TransactionQuery>,
) -> Result<Json<TransactionPage>, ApiError> {
    let filter = TransactionFilter {
        kind: query.kind,
        action_type: query.action_type,
        from: query.from,
        to: query.to,
    };

    let page = state
        .ledger
        .get_transactions(user_id, &filter, query.limit, query.offset)
        .await?;
    Ok(Json(page))
}

/// Active token packages in display order, with total tokens and the price
/// of one token.
pub async fn list_packages(
    State(state): State<AppState>,
) -> Result<Json<PackagesResponse>, ApiError> {
    let packages = state.catalog.list_packages().await?;
    Ok(Json(PackagesResponse { packages }))
}
