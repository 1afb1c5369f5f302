//! PostgreSQL package store.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;

use super::catalog::{PackageStore, TokenPackage};
use super::errors::PurchaseResult;
use super::models::PackageId;

const PACKAGE_COLUMNS: &str = "id, name, token_amount, bonus_tokens, price_minor_units, currency, \
                               recommended, description, display_order, is_active";

/// Package store backed by `token_packages`
#[derive(Clone)]
pub struct PgPackageStore {
    pool: Arc<PgPool>,
}

impl PgPackageStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PackageStore for PgPackageStore {
    async fn packages(&self, active_only: bool) -> PurchaseResult<Vec<TokenPackage>> {
        let rows = sqlx::query(&format!(
            "SELECT {PACKAGE_COLUMNS} FROM token_packages \
             WHERE is_active OR NOT $1 \
             ORDER BY display_order, token_amount, id"
        ))
        .bind(active_only)
        .fetch_all(self.pool.as_ref())
        .await?;

        rows.iter().map(package_from_row).collect()
    }

    async fn package(&self, id: PackageId) -> PurchaseResult<Option<TokenPackage>> {
        let row = sqlx::query(&format!(
            "SELECT {PACKAGE_COLUMNS} FROM token_packages WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.as_ref().map(package_from_row).transpose()
    }
}

fn package_from_row(row: &PgRow) -> PurchaseResult<TokenPackage> {
    Ok(TokenPackage {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        token_amount: row.try_get("token_amount")?,
        bonus_tokens: row.try_get("bonus_tokens")?,
        price_minor_units: row.try_get("price_minor_units")?,
        currency: row.try_get("currency")?,
        recommended: row.try_get("recommended")?,
        description: row.try_get("description")?,
        display_order: row.try_get("display_order")?,
        is_active: row.try_get("is_active")?,
    })
}
