//! PostgreSQL entitlement store.
#![allow(clippy::needless_raw_string_hashes)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Decode, PgPool, Postgres, Row, Transaction, Type};
use std::sync::Arc;
use std::time::Duration;

use super::errors::{EntitlementError, EntitlementResult};
use super::models::{BusinessId, ContactAttempt, Entitlement, free_used_by_user};
use super::store::EntitlementStore;
use crate::db::timeouts::{DEFAULT_LOCK_TIMEOUT, lock_timeout_setting};
use crate::ledger::UserId;

const LOCK_NOT_AVAILABLE: &str = "55P03";

const ENTITLEMENT_COLUMNS: &str = "user_id, business_id, contact_count, tokens_spent, \
                                   is_free_contact, monthly_free_used, last_free_reset_at, \
                                   first_contact_at, last_contact_at";

/// Entitlement store backed by `contact_entitlements`
#[derive(Clone)]
pub struct PgEntitlementStore {
    pool: Arc<PgPool>,
    lock_timeout: Duration,
}

impl PgEntitlementStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    fn map_lock_error(&self, err: sqlx::Error) -> EntitlementError {
        match &err {
            sqlx::Error::Database(db_err)
                if db_err.code().as_deref() == Some(LOCK_NOT_AVAILABLE) =>
            {
                EntitlementError::Timeout(self.lock_timeout)
            }
            _ => EntitlementError::Database(err),
        }
    }

    async fn apply(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        attempt: &ContactAttempt,
    ) -> EntitlementResult<Entitlement> {
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(lock_timeout_setting(self.lock_timeout))
            .execute(&mut **tx)
            .await?;

        // User-scoped exclusive section: the allowance spans every business
        // row of the user, including ones that do not exist yet.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended('contact_entitlements', $1))")
            .bind(attempt.user_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| self.map_lock_error(e))?;

        if attempt.was_free {
            let rows = sqlx::query(&format!(
                "SELECT {ENTITLEMENT_COLUMNS} FROM contact_entitlements WHERE user_id = $1"
            ))
            .bind(attempt.user_id)
            .fetch_all(&mut **tx)
            .await?;
            let current = rows
                .iter()
                .map(entitlement_from_row)
                .collect::<EntitlementResult<Vec<_>>>()?;

            if free_used_by_user(&current, attempt.at) >= attempt.free_allowance {
                return Err(EntitlementError::FreeAllowanceExhausted {
                    user_id: attempt.user_id,
                });
            }
        }

        sqlx::query(
            r#"
            INSERT INTO contact_entitlements (user_id, business_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id, business_id) DO NOTHING
            "#,
        )
        .bind(attempt.user_id)
        .bind(attempt.business_id)
        .execute(&mut **tx)
        .await?;

        let row = sqlx::query(&format!(
            r#"
            SELECT {ENTITLEMENT_COLUMNS}
            FROM contact_entitlements
            WHERE user_id = $1 AND business_id = $2
            FOR UPDATE
            "#
        ))
        .bind(attempt.user_id)
        .bind(attempt.business_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| self.map_lock_error(e))?;

        let next = entitlement_from_row(&row)?.record(
            attempt.tokens_spent,
            attempt.was_free,
            attempt.at,
        );

        sqlx::query(
            r#"
            UPDATE contact_entitlements
            SET contact_count = $3,
                tokens_spent = $4,
                is_free_contact = $5,
                monthly_free_used = $6,
                last_free_reset_at = $7,
                first_contact_at = $8,
                last_contact_at = $9
            WHERE user_id = $1 AND business_id = $2
            "#,
        )
        .bind(next.user_id)
        .bind(next.business_id)
        .bind(next.contact_count)
        .bind(next.tokens_spent)
        .bind(next.is_free_contact_used_this_cycle)
        .bind(next.monthly_free_used)
        .bind(next.last_free_reset_at)
        .bind(next.first_contact_at)
        .bind(next.last_contact_at)
        .execute(&mut **tx)
        .await?;

        Ok(next)
    }
}

#[async_trait]
impl EntitlementStore for PgEntitlementStore {
    async fn entitlement(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> EntitlementResult<Option<Entitlement>> {
        let row = sqlx::query(&format!(
            "SELECT {ENTITLEMENT_COLUMNS} FROM contact_entitlements \
             WHERE user_id = $1 AND business_id = $2"
        ))
        .bind(user_id)
        .bind(business_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.as_ref().map(entitlement_from_row).transpose()
    }

    async fn entitlements_for_user(&self, user_id: UserId) -> EntitlementResult<Vec<Entitlement>> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTITLEMENT_COLUMNS} FROM contact_entitlements \
             WHERE user_id = $1 ORDER BY business_id"
        ))
        .bind(user_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        rows.iter().map(entitlement_from_row).collect()
    }

    async fn record_contact(&self, attempt: ContactAttempt) -> EntitlementResult<Entitlement> {
        let mut tx = self.pool.begin().await?;
        let next = self.apply(&mut tx, &attempt).await?;
        tx.commit().await?;
        Ok(next)
    }
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> EntitlementResult<T>
where
    T: Decode<'r, Postgres> + Type<Postgres>,
{
    Ok(row.try_get(name)?)
}

fn entitlement_from_row(row: &PgRow) -> EntitlementResult<Entitlement> {
    Ok(Entitlement {
        user_id: column(row, "user_id")?,
        business_id: column(row, "business_id")?,
        contact_count: column(row, "contact_count")?,
        tokens_spent: column(row, "tokens_spent")?,
        is_free_contact_used_this_cycle: column(row, "is_free_contact")?,
        monthly_free_used: column(row, "monthly_free_used")?,
        last_free_reset_at: column::<Option<DateTime<Utc>>>(row, "last_free_reset_at")?,
        first_contact_at: column::<Option<DateTime<Utc>>>(row, "first_contact_at")?,
        last_contact_at: column::<Option<DateTime<Utc>>>(row, "last_contact_at")?,
    })
}
