//! Token ledger engine.

use std::sync::Arc;
use std::time::Duration;

use super::{
    errors::{LedgerError, LedgerResult},
    models::{
        Account, ConsumeReceipt, CreditKind, CreditReceipt, LedgerAudit, PostOutcome, Posting,
        TokenSummary, TransactionFilter, TransactionMetadata, TransactionPage, TransactionRecord,
        UserId,
    },
    store::{LedgerStore, MemoryLedgerStore},
};
use crate::db::config::parse_env_or;
use crate::db::timeouts::{DEFAULT_LOCK_TIMEOUT, DEFAULT_QUERY_TIMEOUT, with_timeout};
use crate::telemetry;

/// Default page size for transaction history
pub const DEFAULT_PAGE_LIMIT: i64 = 50;

/// Largest page size for transaction history
pub const MAX_PAGE_LIMIT: i64 = 200;

/// Ledger engine configuration
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Upper bound on a single locked mutation, lock wait included
    pub lock_timeout: Duration,

    /// Upper bound on read-only queries
    pub query_timeout: Duration,
}

impl LedgerConfig {
    /// Create configuration from environment variables
    ///
    /// - `LEDGER_LOCK_TIMEOUT_MS` (default: 5000)
    /// - `LEDGER_QUERY_TIMEOUT_MS` (default: 10000)
    pub fn from_env() -> Self {
        Self {
            lock_timeout: Duration::from_millis(parse_env_or(
                "LEDGER_LOCK_TIMEOUT_MS",
                DEFAULT_LOCK_TIMEOUT.as_millis() as u64,
            )),
            query_timeout: Duration::from_millis(parse_env_or(
                "LEDGER_QUERY_TIMEOUT_MS",
                DEFAULT_QUERY_TIMEOUT.as_millis() as u64,
            )),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

/// Token ledger engine.
///
/// Owns every mutation of accounts and the transaction log. Balances are
/// always read from the store; nothing is cached here.
#[derive(Clone)]
pub struct TokenLedger {
    store: Arc<dyn LedgerStore>,
    config: LedgerConfig,
}

impl TokenLedger {
    /// Create a new ledger over `store`
    pub fn new(store: Arc<dyn LedgerStore>, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    /// Ledger over a fresh in-memory store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryLedgerStore::new()), LedgerConfig::default())
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Credit tokens to a user
    ///
    /// # Arguments
    ///
    /// * `user_id` - User ID
    /// * `amount` - Tokens to add, must be positive
    /// * `kind` - Purchase, bonus or admin adjustment
    /// * `metadata` - Opaque payload; an `external_reference` makes the
    ///   credit idempotent
    ///
    /// # Returns
    ///
    /// * `LedgerResult<CreditReceipt>` - New balance; when the reference was
    ///   already credited, the balance recorded back then and
    ///   `already_recorded = true`
    ///
    /// # Errors
    ///
    /// * `LedgerError::InvalidAmount` - `amount <= 0`
    /// * `LedgerError::ReferenceConflict` - The reference was recorded for
    ///   another user or another credit kind; nothing is written
    /// * `LedgerError::Timeout` - Row lock not acquired in time (retryable)
    pub async fn add_tokens(
        &self,
        user_id: UserId,
        amount: i64,
        kind: CreditKind,
        metadata: TransactionMetadata,
    ) -> LedgerResult<CreditReceipt> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let posting = Posting::credit(user_id, kind, amount, &metadata);
        let outcome = self.post(posting).await?;

        match outcome {
            PostOutcome::Applied { account, record } => {
                tracing::info!(
                    user_id,
                    amount,
                    kind = %record.kind,
                    transaction_id = record.id,
                    new_balance = account.balance,
                    "Tokens credited"
                );
                telemetry::tokens_credited(record.kind, amount);

                Ok(CreditReceipt {
                    new_balance: account.balance,
                    tokens_added: amount,
                    transaction_id: record.id,
                    already_recorded: false,
                })
            }
            PostOutcome::Duplicate(existing) => {
                tracing::info!(
                    user_id,
                    external_reference = existing.external_reference.as_deref(),
                    transaction_id = existing.id,
                    "External reference already credited, skipping"
                );
                telemetry::duplicate_reference();

                Ok(CreditReceipt {
                    new_balance: existing.balance_after,
                    tokens_added: 0,
                    transaction_id: existing.id,
                    already_recorded: true,
                })
            }
        }
    }

    /// Debit tokens for a gated action
    ///
    /// The balance check and the deduction happen under one exclusive lock
    /// on the user's account, so concurrent calls can never spend the same
    /// tokens twice. An `external_reference` in `metadata` is stored in the
    /// payload only; it neither deduplicates the debit nor claims the
    /// reference.
    ///
    /// # Errors
    ///
    /// * `LedgerError::InvalidAmount` - `amount <= 0`
    /// * `LedgerError::InsufficientBalance` - Balance below `amount`; a
    ///   never-credited user reports `available = 0`
    /// * `LedgerError::Timeout` - Row lock not acquired in time (retryable)
    pub async fn consume_tokens(
        &self,
        user_id: UserId,
        amount: i64,
        action_type: &str,
        metadata: TransactionMetadata,
    ) -> LedgerResult<ConsumeReceipt> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let posting = Posting::debit(user_id, amount, action_type, &metadata);
        let outcome = match self.post(posting).await {
            Ok(outcome) => outcome,
            Err(LedgerError::AccountNotFound(_)) => {
                return Err(self.denied(user_id, amount, 0, action_type));
            }
            Err(LedgerError::InsufficientBalance {
                required,
                available,
            }) => {
                return Err(self.denied(user_id, required, available, action_type));
            }
            Err(err) => return Err(err),
        };

        match outcome {
            PostOutcome::Applied { account, record } => {
                tracing::info!(
                    user_id,
                    amount,
                    action_type,
                    transaction_id = record.id,
                    remaining_balance = account.balance,
                    "Tokens consumed"
                );
                telemetry::tokens_consumed(action_type, amount);

                Ok(ConsumeReceipt {
                    remaining_balance: account.balance,
                    tokens_consumed: amount,
                    transaction_id: record.id,
                    action_type: action_type.to_string(),
                })
            }
            // Debits never carry an indexed reference
            PostOutcome::Duplicate(existing) => Err(LedgerError::ReferenceConflict(
                existing.external_reference.unwrap_or_default(),
            )),
        }
    }

    /// Current spendable balance; 0 for a never-credited user
    pub async fn get_balance(&self, user_id: UserId) -> LedgerResult<i64> {
        let balance = self
            .get_account(user_id)
            .await?
            .map(|account| account.balance)
            .unwrap_or(0);
        tracing::debug!(user_id, balance, "Balance read");
        Ok(balance)
    }

    /// Full account with reporting counters, if it exists
    pub async fn get_account(&self, user_id: UserId) -> LedgerResult<Option<Account>> {
        with_timeout(self.config.query_timeout, self.store.account(user_id)).await
    }

    /// Find the record carrying an external payment reference
    pub async fn find_by_reference(
        &self,
        reference: &str,
    ) -> LedgerResult<Option<TransactionRecord>> {
        with_timeout(
            self.config.query_timeout,
            self.store.find_by_reference(reference),
        )
        .await
    }

    /// Transaction history, newest first
    ///
    /// `limit` is clamped to `1..=MAX_PAGE_LIMIT`; negative offsets read as 0.
    pub async fn get_transactions(
        &self,
        user_id: UserId,
        filter: &TransactionFilter,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> LedgerResult<TransactionPage> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
        let offset = offset.unwrap_or(0).max(0);
        with_timeout(
            self.config.query_timeout,
            self.store.transactions(user_id, filter, limit, offset),
        )
        .await
    }

    /// Balance and counters with a utilization ratio
    pub async fn get_summary(&self, user_id: UserId) -> LedgerResult<TokenSummary> {
        let account = self.get_account(user_id).await?;
        Ok(TokenSummary::from_account(user_id, account.as_ref()))
    }

    /// Recompute the balance from the log and compare it with the account.
    ///
    /// A mismatch means the ledger is corrupt. It is reported and logged;
    /// there is no repair path.
    pub async fn audit(&self, user_id: UserId) -> LedgerResult<LedgerAudit> {
        let audit = with_timeout(self.config.query_timeout, self.store.audit(user_id)).await?;

        if !audit.is_consistent() {
            tracing::error!(
                user_id,
                balance = audit.balance,
                derived_balance = audit.derived_balance(),
                "LEDGER INTEGRITY: balance diverges from transaction log"
            );
        }

        Ok(audit)
    }

    async fn post(&self, posting: Posting) -> LedgerResult<PostOutcome> {
        let user_id = posting.user_id;
        let result = with_timeout(self.config.lock_timeout, self.store.post(posting)).await;
        if let Err(err) = &result {
            if err.is_retryable() {
                tracing::warn!(user_id, error = %err, "Ledger mutation failed, rolled back");
            }
        }
        result
    }

    fn denied(&self, user_id: UserId, required: i64, available: i64, action: &str) -> LedgerError {
        // Expected business condition, not a fault
        tracing::debug!(user_id, required, available, action, "Insufficient tokens");
        telemetry::consumption_denied(action);
        LedgerError::InsufficientBalance {
            required,
            available,
        }
    }
}
