//! Entitlement tracker implementation.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use super::{
    errors::{EntitlementError, EntitlementResult},
    models::{
        BusinessId, ContactAttempt, ContactRecord, ContactStanding, Entitlement,
        EntitlementState, free_used_by_user,
    },
    store::{EntitlementStore, MemoryEntitlementStore},
};
use crate::db::config::parse_env_or;
use crate::db::timeouts::{DEFAULT_LOCK_TIMEOUT, with_timeout};
use crate::ledger::UserId;
use crate::telemetry;

/// Entitlement tracker configuration
#[derive(Debug, Clone)]
pub struct EntitlementConfig {
    /// Free contacts a user may take per calendar month, across all businesses
    pub free_contacts_per_month: i64,

    /// Upper bound on one store call, lock wait included
    pub operation_timeout: Duration,
}

impl EntitlementConfig {
    /// Create configuration from environment variables
    ///
    /// - `FREE_CONTACTS_PER_MONTH` (default: 1)
    /// - `ENTITLEMENT_TIMEOUT_MS` (default: 5000)
    pub fn from_env() -> Self {
        Self {
            free_contacts_per_month: parse_env_or("FREE_CONTACTS_PER_MONTH", 1),
            operation_timeout: Duration::from_millis(parse_env_or(
                "ENTITLEMENT_TIMEOUT_MS",
                DEFAULT_LOCK_TIMEOUT.as_millis() as u64,
            )),
        }
    }
}

impl Default for EntitlementConfig {
    fn default() -> Self {
        Self {
            free_contacts_per_month: 1,
            operation_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

/// Tracks the monthly free contact per user and per-business contact history
#[derive(Clone)]
pub struct EntitlementTracker {
    store: Arc<dyn EntitlementStore>,
    config: EntitlementConfig,
}

impl EntitlementTracker {
    pub fn new(store: Arc<dyn EntitlementStore>, config: EntitlementConfig) -> Self {
        Self { store, config }
    }

    /// Tracker over a fresh in-memory store
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryEntitlementStore::new()),
            EntitlementConfig::default(),
        )
    }

    pub fn config(&self) -> &EntitlementConfig {
        &self.config
    }

    /// Whether contacting `business_id` now would be free
    pub async fn can_use_free_contact(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> EntitlementResult<bool> {
        self.can_use_free_contact_at(user_id, business_id, Utc::now())
            .await
    }

    /// Whether contacting `business_id` at `now` would be free.
    ///
    /// True when the user still has free contacts left in `now`'s month and
    /// has not contacted this business during that month. Read-only.
    pub async fn can_use_free_contact_at(
        &self,
        user_id: UserId,
        business_id: BusinessId,
        now: DateTime<Utc>,
    ) -> EntitlementResult<bool> {
        Ok(self
            .standing_at(user_id, business_id, now)
            .await?
            .can_use_free_contact)
    }

    /// Pricing inputs for one pair at `now`
    pub async fn standing_at(
        &self,
        user_id: UserId,
        business_id: BusinessId,
        now: DateTime<Utc>,
    ) -> EntitlementResult<ContactStanding> {
        let entitlements = self.list_entitlements(user_id).await?;
        let free_contacts_used = free_used_by_user(&entitlements, now);
        let pair = entitlements
            .iter()
            .find(|entitlement| entitlement.business_id == business_id);

        let contacted_this_month = pair.is_some_and(|e| e.contacted_in_month(now));
        let contacted_before = pair.is_some_and(|e| e.contact_count > 0);

        Ok(ContactStanding {
            can_use_free_contact: free_contacts_used < self.config.free_contacts_per_month
                && !contacted_this_month,
            contacted_this_month,
            contacted_before,
            free_contacts_used,
        })
    }

    /// Record a contact attempt at the current time
    pub async fn record_contact_attempt(
        &self,
        user_id: UserId,
        business_id: BusinessId,
        tokens_spent: i64,
        was_free: bool,
    ) -> EntitlementResult<ContactRecord> {
        self.record_contact_attempt_at(user_id, business_id, tokens_spent, was_free, Utc::now())
            .await
    }

    /// Record a contact attempt at `now`
    ///
    /// # Errors
    ///
    /// * `EntitlementError::InvalidTokens` - `tokens_spent < 0`
    /// * `EntitlementError::FreeAllowanceExhausted` - `was_free` but the
    ///   month's allowance was already taken (possibly by a concurrent
    ///   request); nothing is written
    pub async fn record_contact_attempt_at(
        &self,
        user_id: UserId,
        business_id: BusinessId,
        tokens_spent: i64,
        was_free: bool,
        now: DateTime<Utc>,
    ) -> EntitlementResult<ContactRecord> {
        if tokens_spent < 0 {
            return Err(EntitlementError::InvalidTokens(tokens_spent));
        }

        let attempt = ContactAttempt {
            user_id,
            business_id,
            tokens_spent,
            was_free,
            free_allowance: self.config.free_contacts_per_month,
            at: now,
        };

        let entitlement = with_timeout(
            self.config.operation_timeout,
            self.store.record_contact(attempt),
        )
        .await?;

        tracing::info!(
            user_id,
            business_id,
            tokens_spent,
            was_free,
            contact_count = entitlement.contact_count,
            "Contact attempt recorded"
        );
        telemetry::contact_recorded(was_free);

        Ok(ContactRecord {
            contact_count: entitlement.contact_count,
            total_tokens_spent: entitlement.tokens_spent,
            was_free,
        })
    }

    /// Entitlement for one pair, if any contact happened
    pub async fn get_entitlement(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> EntitlementResult<Option<Entitlement>> {
        with_timeout(
            self.config.operation_timeout,
            self.store.entitlement(user_id, business_id),
        )
        .await
    }

    /// All entitlements for a user, ordered by business
    pub async fn list_entitlements(&self, user_id: UserId) -> EntitlementResult<Vec<Entitlement>> {
        with_timeout(
            self.config.operation_timeout,
            self.store.entitlements_for_user(user_id),
        )
        .await
    }

    /// Cycle state of one pair at `now`
    pub async fn state_at(
        &self,
        user_id: UserId,
        business_id: BusinessId,
        now: DateTime<Utc>,
    ) -> EntitlementResult<EntitlementState> {
        Ok(self
            .get_entitlement(user_id, business_id)
            .await?
            .map(|entitlement| entitlement.state(now))
            .unwrap_or(EntitlementState::NoHistory))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, month, day, 9, 30, 0).unwrap()
    }

    #[tokio::test]
    async fn test_first_contact_is_free() {
        let tracker = EntitlementTracker::in_memory();
        assert!(tracker.can_use_free_contact_at(1, 10, at(3, 1)).await.unwrap());
        assert_eq!(
            tracker.state_at(1, 10, at(3, 1)).await.unwrap(),
            EntitlementState::NoHistory
        );
    }

    #[tokio::test]
    async fn test_free_contact_used_blocks_other_businesses_this_month() {
        let tracker = EntitlementTracker::in_memory();
        tracker
            .record_contact_attempt_at(1, 10, 0, true, at(3, 2))
            .await
            .unwrap();

        assert!(!tracker.can_use_free_contact_at(1, 10, at(3, 3)).await.unwrap());
        assert!(!tracker.can_use_free_contact_at(1, 11, at(3, 3)).await.unwrap());
        assert_eq!(
            tracker.state_at(1, 10, at(3, 3)).await.unwrap(),
            EntitlementState::FreeUsedThisMonth
        );
        // Other users are unaffected
        assert!(tracker.can_use_free_contact_at(2, 10, at(3, 3)).await.unwrap());
    }

    #[tokio::test]
    async fn test_monthly_reset() {
        let tracker = EntitlementTracker::in_memory();
        tracker
            .record_contact_attempt_at(1, 10, 0, true, at(3, 30))
            .await
            .unwrap();

        assert!(tracker.can_use_free_contact_at(1, 10, at(4, 1)).await.unwrap());
        assert_eq!(
            tracker.state_at(1, 10, at(4, 1)).await.unwrap(),
            EntitlementState::FreeAvailable
        );
    }

    #[tokio::test]
    async fn test_record_accumulates() {
        let tracker = EntitlementTracker::in_memory();
        tracker
            .record_contact_attempt_at(1, 10, 0, true, at(3, 2))
            .await
            .unwrap();
        let record = tracker
            .record_contact_attempt_at(1, 10, 1, false, at(3, 4))
            .await
            .unwrap();
        assert_eq!(record.contact_count, 2);
        assert_eq!(record.total_tokens_spent, 1);
        assert!(!record.was_free);
    }

    #[tokio::test]
    async fn test_negative_tokens_rejected() {
        let tracker = EntitlementTracker::in_memory();
        let err = tracker
            .record_contact_attempt(1, 10, -1, false)
            .await
            .unwrap_err();
        assert!(matches!(err, EntitlementError::InvalidTokens(-1)));
        assert!(tracker.get_entitlement(1, 10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_larger_allowance() {
        let tracker = EntitlementTracker::new(
            Arc::new(MemoryEntitlementStore::new()),
            EntitlementConfig {
                free_contacts_per_month: 2,
                ..Default::default()
            },
        );
        tracker
            .record_contact_attempt_at(1, 10, 0, true, at(6, 1))
            .await
            .unwrap();
        assert!(tracker.can_use_free_contact_at(1, 11, at(6, 2)).await.unwrap());
        tracker
            .record_contact_attempt_at(1, 11, 0, true, at(6, 2))
            .await
            .unwrap();
        assert!(!tracker.can_use_free_contact_at(1, 12, at(6, 3)).await.unwrap());
    }
}
