//! Freemium contact entitlements.
//!
//! One row per (user, business) pair records contact history and free uses.
//! The monthly allowance resets lazily: the month of `last_free_reset_at` is
//! compared with the current month whenever a contact is evaluated or
//! recorded, so no scheduler is involved.

pub mod errors;
pub mod manager;
pub mod models;
pub mod postgres;
pub mod store;

pub use errors::{EntitlementError, EntitlementResult};
pub use manager::{EntitlementConfig, EntitlementTracker};
pub use models::{
    BusinessId, ContactAttempt, ContactRecord, ContactStanding, Entitlement, EntitlementState,
    same_month,
};
pub use postgres::PgEntitlementStore;
pub use store::{EntitlementStore, MemoryEntitlementStore};
