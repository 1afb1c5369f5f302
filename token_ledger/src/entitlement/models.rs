//! Entitlement data models.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::UserId;

/// Business ID type
pub type BusinessId = i64;

/// Whether two instants fall in the same UTC calendar month
pub fn same_month(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.year() == b.year() && a.month() == b.month()
}

/// Free-contact state for one (user, business) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    pub user_id: UserId,
    pub business_id: BusinessId,
    pub contact_count: i64,
    pub tokens_spent: i64,
    pub is_free_contact_used_this_cycle: bool,
    /// Free uses counted since `last_free_reset_at`; reset lazily per month
    pub monthly_free_used: i64,
    pub last_free_reset_at: Option<DateTime<Utc>>,
    pub first_contact_at: Option<DateTime<Utc>>,
    pub last_contact_at: Option<DateTime<Utc>>,
}

impl Entitlement {
    pub fn new(user_id: UserId, business_id: BusinessId) -> Self {
        Self {
            user_id,
            business_id,
            contact_count: 0,
            tokens_spent: 0,
            is_free_contact_used_this_cycle: false,
            monthly_free_used: 0,
            last_free_reset_at: None,
            first_contact_at: None,
            last_contact_at: None,
        }
    }

    /// Free uses that count against the month containing `now`
    pub fn free_used_in_month(&self, now: DateTime<Utc>) -> i64 {
        match self.last_free_reset_at {
            Some(reset) if same_month(reset, now) => self.monthly_free_used,
            _ => 0,
        }
    }

    /// Whether this business was contacted in the month containing `now`
    pub fn contacted_in_month(&self, now: DateTime<Utc>) -> bool {
        self.last_contact_at
            .is_some_and(|last| same_month(last, now))
    }

    /// State of this pair in the cycle containing `now`
    pub fn state(&self, now: DateTime<Utc>) -> EntitlementState {
        if self.contact_count == 0 {
            EntitlementState::NoHistory
        } else if self.free_used_in_month(now) > 0 {
            EntitlementState::FreeUsedThisMonth
        } else {
            EntitlementState::FreeAvailable
        }
    }

    /// State after recording one contact attempt at `now`.
    ///
    /// The month reset happens first, inside the same update as the
    /// increment, so a stale counter from an earlier month is never carried
    /// forward.
    pub fn record(&self, tokens_spent: i64, was_free: bool, now: DateTime<Utc>) -> Entitlement {
        let mut next = self.clone();

        let new_cycle = self
            .last_free_reset_at
            .is_none_or(|reset| !same_month(reset, now));
        if new_cycle {
            next.monthly_free_used = 0;
            next.is_free_contact_used_this_cycle = false;
            next.last_free_reset_at = Some(now);
        }

        next.contact_count += 1;
        next.tokens_spent += tokens_spent;
        next.first_contact_at.get_or_insert(now);
        next.last_contact_at = Some(now);

        if was_free {
            next.monthly_free_used += 1;
            next.is_free_contact_used_this_cycle = true;
        }

        next
    }
}

/// Cycle state of a (user, business) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementState {
    NoHistory,
    FreeAvailable,
    FreeUsedThisMonth,
}

/// A contact attempt to be recorded atomically
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactAttempt {
    pub user_id: UserId,
    pub business_id: BusinessId,
    pub tokens_spent: i64,
    pub was_free: bool,
    /// Free contacts the user may take per calendar month
    pub free_allowance: i64,
    pub at: DateTime<Utc>,
}

/// Result of `record_contact_attempt`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub contact_count: i64,
    pub total_tokens_spent: i64,
    pub was_free: bool,
}

/// Everything a pricing policy needs to know about one pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactStanding {
    pub can_use_free_contact: bool,
    pub contacted_this_month: bool,
    pub contacted_before: bool,
    pub free_contacts_used: i64,
}

/// Free uses by one user across every business in the month containing `now`
pub fn free_used_by_user(entitlements: &[Entitlement], now: DateTime<Utc>) -> i64 {
    entitlements
        .iter()
        .map(|entitlement| entitlement.free_used_in_month(now))
        .sum()
}
