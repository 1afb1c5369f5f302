//! PostgreSQL ledger store.
#![allow(clippy::needless_raw_string_hashes)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Decode, PgPool, Postgres, QueryBuilder, Row, Transaction, Type};
use std::sync::Arc;
use std::time::Duration;

use super::errors::{LedgerError, LedgerResult};
use super::models::{
    Account, EntryDirection, LedgerAudit, PostOutcome, Posting, TransactionFilter,
    TransactionPage, TransactionRecord, UserId,
};
use super::store::LedgerStore;
use crate::db::timeouts::{DEFAULT_LOCK_TIMEOUT, lock_timeout_setting};

const LOCK_NOT_AVAILABLE: &str = "55P03";

const RECORD_COLUMNS: &str = "id, user_id, kind, amount, balance_after, action_type, \
                              external_reference, metadata, created_at";

/// Ledger store backed by `token_accounts` and `token_transactions`
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: Arc<PgPool>,
    lock_timeout: Duration,
}

impl PgLedgerStore {
    /// Create a new store
    ///
    /// # Arguments
    ///
    /// * `pool` - Database connection pool
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Bound how long a mutation may wait for an account row lock
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    fn map_lock_error(&self, err: sqlx::Error) -> LedgerError {
        match &err {
            sqlx::Error::Database(db_err)
                if db_err.code().as_deref() == Some(LOCK_NOT_AVAILABLE) =>
            {
                LedgerError::Timeout(self.lock_timeout)
            }
            _ => LedgerError::Database(err),
        }
    }

    async fn apply(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        posting: &Posting,
    ) -> LedgerResult<PostOutcome> {
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(lock_timeout_setting(self.lock_timeout))
            .execute(&mut **tx)
            .await?;

        // Explicit get-or-create inside the same transaction as the credit
        if posting.kind.direction() == EntryDirection::Credit {
            sqlx::query(
                "INSERT INTO token_accounts (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING",
            )
            .bind(posting.user_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| self.map_lock_error(e))?;
        }

        let row = sqlx::query(
            r#"
            SELECT user_id, balance, total_purchased, total_consumed, lifetime_purchased,
                   created_at, updated_at
            FROM token_accounts
            WHERE user_id = $1
            FOR UPDATE
            "#,
        )
        .bind(posting.user_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| self.map_lock_error(e))?;

        let current = match row {
            Some(row) => account_from_row(&row)?,
            None => return Err(LedgerError::AccountNotFound(posting.user_id)),
        };

        // Checked after the row lock, so two deliveries for the same user
        // serialize here and the second one sees the first one's record.
        if let Some(reference) = &posting.external_reference {
            let existing = sqlx::query(&format!(
                "SELECT {RECORD_COLUMNS} FROM token_transactions WHERE external_reference = $1"
            ))
            .bind(reference)
            .fetch_optional(&mut **tx)
            .await?;

            if let Some(row) = existing {
                return posting.replay_of(record_from_row(&row)?);
            }
        }

        let next = current.apply(posting, Utc::now())?;

        sqlx::query(
            r#"
            UPDATE token_accounts
            SET balance = $2,
                total_purchased = $3,
                total_consumed = $4,
                lifetime_purchased = $5,
                updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(next.user_id)
        .bind(next.balance)
        .bind(next.total_purchased)
        .bind(next.total_consumed)
        .bind(next.lifetime_purchased)
        .execute(&mut **tx)
        .await?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO token_transactions
                (user_id, kind, amount, balance_after, action_type, external_reference, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(posting.user_id)
        .bind(posting.kind.to_string())
        .bind(posting.amount)
        .bind(next.balance)
        .bind(&posting.action_type)
        .bind(&posting.external_reference)
        .bind(&posting.metadata)
        .fetch_one(&mut **tx)
        .await?;

        Ok(PostOutcome::Applied {
            account: next,
            record: record_from_row(&row)?,
        })
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn account(&self, user_id: UserId) -> LedgerResult<Option<Account>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, balance, total_purchased, total_consumed, lifetime_purchased,
                   created_at, updated_at
            FROM token_accounts
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn post(&self, posting: Posting) -> LedgerResult<PostOutcome> {
        let mut tx = self.pool.begin().await?;

        // Any early return drops `tx`, which rolls the whole unit back
        let outcome = self.apply(&mut tx, &posting).await;

        match outcome {
            Ok(PostOutcome::Applied { account, record }) => match tx.commit().await {
                Ok(()) => Ok(PostOutcome::Applied { account, record }),
                Err(err) => Err(err.into()),
            },
            Ok(duplicate) => Ok(duplicate),
            Err(LedgerError::Database(sqlx::Error::Database(db_err)))
                if db_err.is_unique_violation() =>
            {
                // Same reference raced in under another user's row lock
                drop(tx);
                let reference = posting.external_reference.as_deref().unwrap_or_default();
                match self.find_by_reference(reference).await? {
                    Some(existing) => posting.replay_of(existing),
                    None => Err(LedgerError::Database(sqlx::Error::Database(db_err))),
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn find_by_reference(
        &self,
        reference: &str,
    ) -> LedgerResult<Option<TransactionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM token_transactions WHERE external_reference = $1"
        ))
        .bind(reference)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn transactions(
        &self,
        user_id: UserId,
        filter: &TransactionFilter,
        limit: i64,
        offset: i64,
    ) -> LedgerResult<TransactionPage> {
        let mut query = QueryBuilder::<Postgres>::new(format!(
            "SELECT {RECORD_COLUMNS} FROM token_transactions"
        ));
        push_filter(&mut query, user_id, filter);
        query
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows = query.build().fetch_all(self.pool.as_ref()).await?;
        let records = rows
            .iter()
            .map(record_from_row)
            .collect::<LedgerResult<Vec<_>>>()?;

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) AS total FROM token_transactions");
        push_filter(&mut count, user_id, filter);
        let row = count.build().fetch_one(self.pool.as_ref()).await?;
        let total: i64 = column(&row, "total")?;

        Ok(TransactionPage::new(records, total, limit, offset))
    }

    async fn audit(&self, user_id: UserId) -> LedgerResult<LedgerAudit> {
        // One statement reads one snapshot, so a commit cannot split the
        // balance from the fold
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE((SELECT balance FROM token_accounts WHERE user_id = $1), 0)::BIGINT
                    AS balance,
                COALESCE(SUM(amount) FILTER (WHERE kind <> 'consumption'), 0)::BIGINT AS credits,
                COALESCE(SUM(amount) FILTER (WHERE kind = 'consumption'), 0)::BIGINT AS debits
            FROM token_transactions
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(LedgerAudit {
            user_id,
            balance: column(&row, "balance")?,
            credits: column(&row, "credits")?,
            debits: column(&row, "debits")?,
        })
    }
}

fn push_filter(query: &mut QueryBuilder<'_, Postgres>, user_id: UserId, filter: &TransactionFilter) {
    query.push(" WHERE user_id = ").push_bind(user_id);
    if let Some(kind) = filter.kind {
        query.push(" AND kind = ").push_bind(kind.to_string());
    }
    if let Some(action_type) = &filter.action_type {
        query.push(" AND action_type = ").push_bind(action_type.clone());
    }
    if let Some(from) = filter.from {
        query.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        query.push(" AND created_at <= ").push_bind(to);
    }
}

/// Decode one column; a type mismatch is a corrupt record, never a panic
fn column<'r, T>(row: &'r PgRow, name: &str) -> LedgerResult<T>
where
    T: Decode<'r, Postgres> + Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| LedgerError::CorruptRecord(format!("column {name}: {e}")))
}

fn account_from_row(row: &PgRow) -> LedgerResult<Account> {
    Ok(Account {
        user_id: column(row, "user_id")?,
        balance: column(row, "balance")?,
        total_purchased: column(row, "total_purchased")?,
        total_consumed: column(row, "total_consumed")?,
        lifetime_purchased: column(row, "lifetime_purchased")?,
        created_at: column::<DateTime<Utc>>(row, "created_at")?,
        updated_at: column::<DateTime<Utc>>(row, "updated_at")?,
    })
}

fn record_from_row(row: &PgRow) -> LedgerResult<TransactionRecord> {
    Ok(TransactionRecord {
        id: column(row, "id")?,
        user_id: column(row, "user_id")?,
        kind: column::<String>(row, "kind")?.parse()?,
        amount: column(row, "amount")?,
        balance_after: column(row, "balance_after")?,
        action_type: column(row, "action_type")?,
        external_reference: column(row, "external_reference")?,
        metadata: column(row, "metadata")?,
        created_at: column::<DateTime<Utc>>(row, "created_at")?,
    })
}
