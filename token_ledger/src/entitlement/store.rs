//! Storage seam for contact entitlements.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use super::errors::{EntitlementError, EntitlementResult};
use super::models::{BusinessId, ContactAttempt, Entitlement, free_used_by_user};
use crate::ledger::UserId;

/// Trait for entitlement repository operations
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Get the entitlement for one pair
    async fn entitlement(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> EntitlementResult<Option<Entitlement>>;

    /// Get every entitlement a user holds
    async fn entitlements_for_user(&self, user_id: UserId) -> EntitlementResult<Vec<Entitlement>>;

    /// Upsert one contact attempt, lazy month reset included, atomically.
    ///
    /// The whole update runs in a user-scoped exclusive section. A free
    /// attempt is re-checked against the user's allowance inside that
    /// section and fails with `FreeAllowanceExhausted` without writing.
    async fn record_contact(&self, attempt: ContactAttempt) -> EntitlementResult<Entitlement>;
}

type UserSlot = Arc<tokio::sync::Mutex<HashMap<BusinessId, Entitlement>>>;

/// In-memory entitlement store with one lock per user
#[derive(Default)]
pub struct MemoryEntitlementStore {
    users: Mutex<HashMap<UserId, UserSlot>>,
}

impl MemoryEntitlementStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, user_id: UserId) -> UserSlot {
        self.users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(user_id)
            .or_default()
            .clone()
    }

    /// Slot of a user that has recorded a contact; reads never create one
    fn existing_slot(&self, user_id: UserId) -> Option<UserSlot> {
        self.users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user_id)
            .cloned()
    }
}

#[async_trait]
impl EntitlementStore for MemoryEntitlementStore {
    async fn entitlement(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> EntitlementResult<Option<Entitlement>> {
        let Some(slot) = self.existing_slot(user_id) else {
            return Ok(None);
        };
        let rows = slot.lock().await;
        Ok(rows.get(&business_id).cloned())
    }

    async fn entitlements_for_user(&self, user_id: UserId) -> EntitlementResult<Vec<Entitlement>> {
        let Some(slot) = self.existing_slot(user_id) else {
            return Ok(Vec::new());
        };
        let rows = slot.lock().await;
        let mut entitlements: Vec<Entitlement> = rows.values().cloned().collect();
        entitlements.sort_by_key(|entitlement| entitlement.business_id);
        Ok(entitlements)
    }

    async fn record_contact(&self, attempt: ContactAttempt) -> EntitlementResult<Entitlement> {
        let slot = self.slot(attempt.user_id);
        let mut rows = slot.lock().await;

        if attempt.was_free {
            let current: Vec<Entitlement> = rows.values().cloned().collect();
            if free_used_by_user(&current, attempt.at) >= attempt.free_allowance {
                return Err(EntitlementError::FreeAllowanceExhausted {
                    user_id: attempt.user_id,
                });
            }
        }

        let existing = rows
            .get(&attempt.business_id)
            .cloned()
            .unwrap_or_else(|| Entitlement::new(attempt.user_id, attempt.business_id));
        let next = existing.record(attempt.tokens_spent, attempt.was_free, attempt.at);
        rows.insert(attempt.business_id, next.clone());

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn attempt(business_id: BusinessId, was_free: bool) -> ContactAttempt {
        ContactAttempt {
            user_id: 1,
            business_id,
            tokens_spent: if was_free { 0 } else { 2 },
            was_free,
            free_allowance: 1,
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_record_creates_row() {
        let store = MemoryEntitlementStore::new();
        assert!(store.entitlement(1, 10).await.unwrap().is_none());

        let entitlement = store.record_contact(attempt(10, true)).await.unwrap();
        assert_eq!(entitlement.contact_count, 1);
        assert_eq!(store.entitlement(1, 10).await.unwrap(), Some(entitlement));
    }

    #[tokio::test]
    async fn test_second_free_contact_in_month_is_refused() {
        let store = MemoryEntitlementStore::new();
        store.record_contact(attempt(10, true)).await.unwrap();

        let err = store.record_contact(attempt(11, true)).await.unwrap_err();
        assert!(matches!(
            err,
            EntitlementError::FreeAllowanceExhausted { user_id: 1 }
        ));
        assert!(store.entitlement(1, 11).await.unwrap().is_none());

        store.record_contact(attempt(11, false)).await.unwrap();
        assert_eq!(store.entitlements_for_user(1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reads_do_not_create_user_slots() {
        let store = MemoryEntitlementStore::new();
        for user_id in 1..=20 {
            assert!(store.entitlement(user_id, 10).await.unwrap().is_none());
            assert!(store.entitlements_for_user(user_id).await.unwrap().is_empty());
        }
        assert!(store.users.lock().unwrap().is_empty());

        store.record_contact(attempt(10, true)).await.unwrap();
        assert_eq!(store.users.lock().unwrap().len(), 1);
    }
}
