//! Ledger data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

use super::errors::{LedgerError, LedgerResult};

/// User ID type
pub type UserId = i64;

/// Transaction log ID type (monotonic)
pub type TransactionId = i64;

/// Per-user token account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: UserId,
    pub balance: i64,
    pub total_purchased: i64,
    pub total_consumed: i64,
    /// High-water statistic; never decreases
    pub lifetime_purchased: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Zero-initialized account
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            balance: 0,
            total_purchased: 0,
            total_consumed: 0,
            lifetime_purchased: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Compute the account state after `posting` is applied.
    ///
    /// This is the only place balance arithmetic happens; every store calls
    /// it while holding the account's exclusive lock, so the balance it sees
    /// is never stale.
    ///
    /// # Errors
    ///
    /// * `LedgerError::InsufficientBalance` - Debit exceeds the balance
    /// * `LedgerError::BalanceOverflow` - A counter would overflow
    pub fn apply(&self, posting: &Posting, now: DateTime<Utc>) -> LedgerResult<Account> {
        let mut next = self.clone();
        let amount = posting.amount;

        match posting.kind.direction() {
            EntryDirection::Credit => {
                next.balance = self
                    .balance
                    .checked_add(amount)
                    .ok_or(LedgerError::BalanceOverflow)?;
                if posting.kind == TransactionKind::Purchase {
                    next.total_purchased = self
                        .total_purchased
                        .checked_add(amount)
                        .ok_or(LedgerError::BalanceOverflow)?;
                    next.lifetime_purchased = self
                        .lifetime_purchased
                        .checked_add(amount)
                        .ok_or(LedgerError::BalanceOverflow)?;
                }
            }
            EntryDirection::Debit => {
                if self.balance < amount {
                    return Err(LedgerError::InsufficientBalance {
                        required: amount,
                        available: self.balance,
                    });
                }
                next.balance = self.balance - amount;
                next.total_consumed = self
                    .total_consumed
                    .checked_add(amount)
                    .ok_or(LedgerError::BalanceOverflow)?;
            }
        }

        next.updated_at = now;
        Ok(next)
    }
}

/// Entry direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryDirection {
    Debit,
    Credit,
}

/// Transaction kind as stored in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Purchase,
    Consumption,
    Bonus,
    AdminAdjustment,
}

impl TransactionKind {
    /// Direction in which this kind moves the balance
    pub fn direction(self) -> EntryDirection {
        match self {
            TransactionKind::Consumption => EntryDirection::Debit,
            _ => EntryDirection::Credit,
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionKind::Purchase => write!(f, "purchase"),
            TransactionKind::Consumption => write!(f, "consumption"),
            TransactionKind::Bonus => write!(f, "bonus"),
            TransactionKind::AdminAdjustment => write!(f, "admin_adjustment"),
        }
    }
}

impl FromStr for TransactionKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase" => Ok(TransactionKind::Purchase),
            "consumption" => Ok(TransactionKind::Consumption),
            "bonus" => Ok(TransactionKind::Bonus),
            "admin_adjustment" => Ok(TransactionKind::AdminAdjustment),
            other => Err(LedgerError::CorruptRecord(format!(
                "unknown transaction kind '{other}'"
            ))),
        }
    }
}

/// Kinds accepted by `add_tokens`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditKind {
    Purchase,
    Bonus,
    AdminAdjustment,
}

impl From<CreditKind> for TransactionKind {
    fn from(kind: CreditKind) -> Self {
        match kind {
            CreditKind::Purchase => TransactionKind::Purchase,
            CreditKind::Bonus => TransactionKind::Bonus,
            CreditKind::AdminAdjustment => TransactionKind::AdminAdjustment,
        }
    }
}

/// Caller-supplied metadata attached to a transaction.
///
/// `external_reference` is lifted into its own indexed column; at most one
/// transaction may carry a given reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl TransactionMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_external_reference(mut self, reference: impl Into<String>) -> Self {
        self.external_reference = Some(reference.into());
        self
    }

    pub fn with_reference_id(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    /// Attach an arbitrary detail field
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Serialize to the opaque JSON payload stored on the record
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Object(Map::new()))
    }
}

/// A single balance mutation waiting to be applied under the account lock
#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    pub user_id: UserId,
    pub kind: TransactionKind,
    /// Always a positive magnitude; `kind` gives the direction
    pub amount: i64,
    pub action_type: Option<String>,
    pub external_reference: Option<String>,
    pub metadata: Value,
}

impl Posting {
    pub fn credit(
        user_id: UserId,
        kind: CreditKind,
        amount: i64,
        metadata: &TransactionMetadata,
    ) -> Self {
        Self {
            user_id,
            kind: kind.into(),
            amount,
            action_type: None,
            external_reference: metadata.external_reference.clone(),
            metadata: metadata.to_value(),
        }
    }

    /// Debits never claim an external reference; a reference passed in the
    /// metadata is kept only in the opaque payload.
    pub fn debit(
        user_id: UserId,
        amount: i64,
        action_type: &str,
        metadata: &TransactionMetadata,
    ) -> Self {
        Self {
            user_id,
            kind: TransactionKind::Consumption,
            amount,
            action_type: Some(action_type.to_string()),
            external_reference: None,
            metadata: metadata.to_value(),
        }
    }

    /// Outcome for this posting when `existing` already carries its reference.
    ///
    /// Only a replay by the same user with the same kind is a duplicate.
    ///
    /// # Errors
    ///
    /// * `LedgerError::ReferenceConflict` - The reference belongs to another
    ///   user or another kind of transaction
    pub fn replay_of(&self, existing: TransactionRecord) -> LedgerResult<PostOutcome> {
        if existing.user_id == self.user_id && existing.kind == self.kind {
            Ok(PostOutcome::Duplicate(existing))
        } else {
            Err(LedgerError::ReferenceConflict(
                existing.external_reference.unwrap_or_default(),
            ))
        }
    }
}

/// Immutable transaction log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub user_id: UserId,
    pub kind: TransactionKind,
    pub amount: i64,
    /// Account balance right after this record was applied
    pub balance_after: i64,
    pub action_type: Option<String>,
    pub external_reference: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// Amount with the sign of its effect on the balance
    pub fn signed_amount(&self) -> i64 {
        match self.kind.direction() {
            EntryDirection::Credit => self.amount,
            EntryDirection::Debit => -self.amount,
        }
    }
}

/// What a store did with a posting
#[derive(Debug, Clone, PartialEq)]
pub enum PostOutcome {
    /// Account updated and record appended in one unit of work
    Applied {
        account: Account,
        record: TransactionRecord,
    },
    /// The external reference was already recorded; nothing was written
    Duplicate(TransactionRecord),
}

/// Result of `add_tokens`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditReceipt {
    pub new_balance: i64,
    pub tokens_added: i64,
    pub transaction_id: TransactionId,
    /// True when the external reference had been credited before
    pub already_recorded: bool,
}

/// Result of `consume_tokens`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeReceipt {
    pub remaining_balance: i64,
    pub tokens_consumed: i64,
    pub transaction_id: TransactionId,
    pub action_type: String,
}

/// Filter for transaction history queries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub kind: Option<TransactionKind>,
    pub action_type: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TransactionFilter {
    /// Whether `record` passes every set condition
    pub fn matches(&self, record: &TransactionRecord) -> bool {
        self.kind.is_none_or(|kind| record.kind == kind)
            && self
                .action_type
                .as_deref()
                .is_none_or(|action| record.action_type.as_deref() == Some(action))
            && self.from.is_none_or(|from| record.created_at >= from)
            && self.to.is_none_or(|to| record.created_at <= to)
    }
}

/// One page of transaction history, newest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionPage {
    pub records: Vec<TransactionRecord>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub has_more: bool,
}

impl TransactionPage {
    pub fn new(records: Vec<TransactionRecord>, total: i64, limit: i64, offset: i64) -> Self {
        Self {
            records,
            total,
            limit,
            offset,
            has_more: offset + limit < total,
        }
    }
}

/// Comparison of the stored balance against the fold of the log, both read
/// from one consistent view of the account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerAudit {
    pub user_id: UserId,
    pub balance: i64,
    pub credits: i64,
    pub debits: i64,
}

impl LedgerAudit {
    pub fn derived_balance(&self) -> i64 {
        self.credits - self.debits
    }

    pub fn is_consistent(&self) -> bool {
        self.balance == self.derived_balance()
    }
}

/// Balance and reporting counters for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSummary {
    pub user_id: UserId,
    pub balance: i64,
    pub total_purchased: i64,
    pub total_consumed: i64,
    pub lifetime_purchased: i64,
    /// Share of purchased tokens already consumed, 0-100
    pub utilization_percent: f64,
}

impl TokenSummary {
    pub fn from_account(user_id: UserId, account: Option<&Account>) -> Self {
        let Some(account) = account else {
            return Self {
                user_id,
                balance: 0,
                total_purchased: 0,
                total_consumed: 0,
                lifetime_purchased: 0,
                utilization_percent: 0.0,
            };
        };

        let utilization_percent = if account.lifetime_purchased > 0 {
            let ratio = account.total_consumed as f64 / account.lifetime_purchased as f64;
            (ratio * 1000.0).round() / 10.0
        } else {
            0.0
        };

        Self {
            user_id,
            balance: account.balance,
            total_purchased: account.total_purchased,
            total_consumed: account.total_consumed,
            lifetime_purchased: account.lifetime_purchased,
            utilization_percent,
        }
    }
}
