//! Storage seam for the account store and transaction log.
//!
//! A store applies each [`Posting`] as one unit of work: lock the account
//! row, resolve a known external reference, compute the new state with
//! [`Account::apply`], write the account and append the record. Either both
//! writes become visible or neither does.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::errors::{LedgerError, LedgerResult};
use super::models::{
    Account, EntryDirection, LedgerAudit, PostOutcome, Posting, TransactionFilter,
    TransactionId, TransactionPage, TransactionRecord, UserId,
};

/// Trait for account store and transaction log operations
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Read an account without creating it
    async fn account(&self, user_id: UserId) -> LedgerResult<Option<Account>>;

    /// Apply a posting atomically under the account's exclusive lock.
    ///
    /// Credits create the account if missing; debits against a missing
    /// account fail with `LedgerError::AccountNotFound`.
    async fn post(&self, posting: Posting) -> LedgerResult<PostOutcome>;

    /// Find the record carrying an external reference
    async fn find_by_reference(&self, reference: &str)
    -> LedgerResult<Option<TransactionRecord>>;

    /// Page through a user's records, newest first
    async fn transactions(
        &self,
        user_id: UserId,
        filter: &TransactionFilter,
        limit: i64,
        offset: i64,
    ) -> LedgerResult<TransactionPage>;

    /// Read the balance and fold the user's log from one consistent view.
    ///
    /// No mutation of the account may land between the two reads.
    async fn audit(&self, user_id: UserId) -> LedgerResult<LedgerAudit>;
}

type AccountSlot = Arc<tokio::sync::Mutex<Option<Account>>>;

#[derive(Default)]
struct TransactionLog {
    records: Vec<TransactionRecord>,
    by_reference: HashMap<String, usize>,
    next_id: TransactionId,
}

impl TransactionLog {
    fn find_reference(&self, reference: &str) -> Option<&TransactionRecord> {
        self.by_reference
            .get(reference)
            .and_then(|index| self.records.get(*index))
    }

    fn append(
        &mut self,
        posting: &Posting,
        balance_after: i64,
        now: DateTime<Utc>,
    ) -> TransactionRecord {
        self.next_id += 1;
        let record = TransactionRecord {
            id: self.next_id,
            user_id: posting.user_id,
            kind: posting.kind,
            amount: posting.amount,
            balance_after,
            action_type: posting.action_type.clone(),
            external_reference: posting.external_reference.clone(),
            metadata: posting.metadata.clone(),
            created_at: now,
        };

        if let Some(reference) = &record.external_reference {
            self.by_reference
                .insert(reference.clone(), self.records.len());
        }
        self.records.push(record.clone());
        record
    }
}

/// In-memory ledger store.
///
/// Each account has its own async mutex acting as the row lock, so distinct
/// users never contend. The log is guarded by a short synchronous mutex that
/// is only taken while a row lock is already held (row, then log).
#[derive(Default)]
pub struct MemoryLedgerStore {
    accounts: Mutex<HashMap<UserId, AccountSlot>>,
    log: Mutex<TransactionLog>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, user_id: UserId) -> AccountSlot {
        let mut accounts = self
            .accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        accounts.entry(user_id).or_default().clone()
    }

    fn existing_slot(&self, user_id: UserId) -> Option<AccountSlot> {
        self.accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user_id)
            .cloned()
    }

    fn log(&self) -> MutexGuard<'_, TransactionLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Synchronous tail of `post`, run with the row guard held
    fn commit(&self, row: &mut Option<Account>, posting: &Posting) -> LedgerResult<PostOutcome> {
        let now = Utc::now();
        let mut log = self.log();

        if let Some(existing) = posting
            .external_reference
            .as_deref()
            .and_then(|reference| log.find_reference(reference))
        {
            return posting.replay_of(existing.clone());
        }

        let current = match (row.as_ref(), posting.kind.direction()) {
            (Some(account), _) => account.clone(),
            (None, EntryDirection::Credit) => Account::new(posting.user_id, now),
            (None, EntryDirection::Debit) => {
                return Err(LedgerError::AccountNotFound(posting.user_id));
            }
        };

        let next = current.apply(posting, now)?;
        let record = log.append(posting, next.balance, now);
        *row = Some(next.clone());

        Ok(PostOutcome::Applied {
            account: next,
            record,
        })
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn account(&self, user_id: UserId) -> LedgerResult<Option<Account>> {
        let Some(slot) = self.existing_slot(user_id) else {
            return Ok(None);
        };
        let row = slot.lock().await;
        Ok(row.clone())
    }

    async fn post(&self, posting: Posting) -> LedgerResult<PostOutcome> {
        // Only credits may create an account slot
        let slot = match posting.kind.direction() {
            EntryDirection::Credit => self.slot(posting.user_id),
            EntryDirection::Debit => self
                .existing_slot(posting.user_id)
                .ok_or(LedgerError::AccountNotFound(posting.user_id))?,
        };
        let mut row = slot.lock().await;
        self.commit(&mut row, &posting)
    }

    async fn find_by_reference(
        &self,
        reference: &str,
    ) -> LedgerResult<Option<TransactionRecord>> {
        Ok(self.log().find_reference(reference).cloned())
    }

    async fn transactions(
        &self,
        user_id: UserId,
        filter: &TransactionFilter,
        limit: i64,
        offset: i64,
    ) -> LedgerResult<TransactionPage> {
        let log = self.log();
        let matching: Vec<&TransactionRecord> = log
            .records
            .iter()
            .rev()
            .filter(|record| record.user_id == user_id && filter.matches(record))
            .collect();

        let total = matching.len() as i64;
        let records = matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();

        Ok(TransactionPage::new(records, total, limit, offset))
    }

    async fn audit(&self, user_id: UserId) -> LedgerResult<LedgerAudit> {
        let slot = self.existing_slot(user_id);
        // Holding the row guard keeps postings out while the log is folded
        let row = match &slot {
            Some(slot) => Some(slot.lock().await),
            None => None,
        };
        let balance = row
            .as_ref()
            .and_then(|row| row.as_ref())
            .map(|account| account.balance)
            .unwrap_or(0);

        let log = self.log();
        let mut audit = LedgerAudit {
            user_id,
            balance,
            credits: 0,
            debits: 0,
        };
        for record in log.records.iter().filter(|record| record.user_id == user_id) {
            match record.kind.direction() {
                EntryDirection::Credit => audit.credits += record.amount,
                EntryDirection::Debit => audit.debits += record.amount,
            }
        }
        Ok(audit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::models::{CreditKind, TransactionKind, TransactionMetadata};

    fn credit(user_id: UserId, amount: i64, reference: Option<&str>) -> Posting {
        let mut metadata = TransactionMetadata::new();
        if let Some(reference) = reference {
            metadata = metadata.with_external_reference(reference);
        }
        Posting::credit(user_id, CreditKind::Purchase, amount, &metadata)
    }

    #[tokio::test]
    async fn test_credit_creates_account() {
        let store = MemoryLedgerStore::new();
        assert!(store.account(1).await.unwrap().is_none());

        let outcome = store.post(credit(1, 10, None)).await.unwrap();
        let PostOutcome::Applied { account, record } = outcome else {
            panic!("expected applied outcome");
        };
        assert_eq!(account.balance, 10);
        assert_eq!(record.id, 1);
        assert_eq!(record.balance_after, 10);
        assert_eq!(record.kind, TransactionKind::Purchase);
    }

    #[tokio::test]
    async fn test_debit_without_account_is_not_found() {
        let store = MemoryLedgerStore::new();
        let posting = Posting::debit(3, 1, "contact_seller", &TransactionMetadata::new());
        let err = store.post(posting).await.unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(3)));
        assert!(store.account(3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_reference_writes_nothing() {
        let store = MemoryLedgerStore::new();
        store.post(credit(1, 10, Some("pi_1"))).await.unwrap();

        let outcome = store.post(credit(1, 10, Some("pi_1"))).await.unwrap();
        let PostOutcome::Duplicate(existing) = outcome else {
            panic!("expected duplicate outcome");
        };
        assert_eq!(existing.balance_after, 10);
        assert_eq!(store.account(1).await.unwrap().unwrap().balance, 10);
        assert_eq!(store.audit(1).await.unwrap().credits, 10);
    }

    #[tokio::test]
    async fn test_reference_of_another_user_conflicts() {
        let store = MemoryLedgerStore::new();
        store.post(credit(1, 10, Some("pi_1"))).await.unwrap();

        let err = store.post(credit(2, 10, Some("pi_1"))).await.unwrap_err();
        assert!(matches!(err, LedgerError::ReferenceConflict(_)));
        assert!(store.account(2).await.unwrap().is_none());
        assert_eq!(store.audit(2).await.unwrap().credits, 0);
    }

    #[tokio::test]
    async fn test_unknown_user_debit_leaves_no_slot() {
        let store = MemoryLedgerStore::new();
        for user_id in 100..110 {
            let posting = Posting::debit(user_id, 1, "contact_seller", &TransactionMetadata::new());
            assert!(store.post(posting).await.is_err());
        }
        assert!(store.accounts.lock().unwrap().is_empty());

        let audit = store.audit(100).await.unwrap();
        assert_eq!(audit.balance, 0);
        assert!(store.accounts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_debit_appends_nothing() {
        let store = MemoryLedgerStore::new();
        store.post(credit(1, 2, None)).await.unwrap();
        let posting = Posting::debit(1, 5, "boost_listing", &TransactionMetadata::new());
        assert!(store.post(posting).await.is_err());

        let page = store
            .transactions(1, &TransactionFilter::default(), 50, 0)
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(store.account(1).await.unwrap().unwrap().balance, 2);
    }

    #[tokio::test]
    async fn test_transactions_newest_first_and_paged() {
        let store = MemoryLedgerStore::new();
        for amount in 1..=5 {
            store.post(credit(1, amount, None)).await.unwrap();
        }
        store.post(credit(2, 100, None)).await.unwrap();

        let page = store
            .transactions(1, &TransactionFilter::default(), 2, 1)
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert!(page.has_more);
        let amounts: Vec<i64> = page.records.iter().map(|r| r.amount).collect();
        assert_eq!(amounts, vec![4, 3]);
    }
}
