//! # Token Ledger
//!
//! Per-user token balances with an append-only transaction log, a monthly
//! free-contact allowance, and idempotent crediting of confirmed purchases.
//!
//! ## Architecture
//!
//! - **Ledger Engine** ([`ledger`]): credits and debits applied under an
//!   exclusive per-account lock, each together with its log record
//! - **Entitlement Tracker** ([`entitlement`]): one row per user and
//!   business, free contacts counted per calendar month with a lazy reset
//! - **Purchase Reconciler** ([`purchase`]): turns each confirmed payment
//!   into exactly one purchase credit
//! - **Contact Gate** ([`gate`]): prices a gated action, debits it, and
//!   records the contact
//!
//! Every component reaches storage through an `async_trait` store with an
//! in-memory and a PostgreSQL implementation.
//!
//! ## Example
//!
//! ```no_run
//! use token_ledger::{ContactGate, EntitlementTracker, GateConfig, PurchaseReconciler, TokenLedger};
//! use token_ledger::ledger::TransactionMetadata;
//! use token_ledger::purchase::PackageCatalog;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ledger = TokenLedger::in_memory();
//! let reconciler = PurchaseReconciler::new(ledger.clone(), PackageCatalog::in_memory());
//! reconciler.reconcile_purchase("pi_123", 1, 10, 2, 999).await?;
//!
//! let gate = ContactGate::new(ledger, EntitlementTracker::in_memory(), GateConfig::default());
//! let outcome = gate.contact(1, 42, TransactionMetadata::new()).await?;
//! println!("paid {} tokens", outcome.tokens_spent);
//! # Ok(())
//! # }
//! ```

/// Connection pool, configuration, migrations and timeouts.
pub mod db;

/// Freemium contact entitlements.
pub mod entitlement;
pub use entitlement::{EntitlementConfig, EntitlementError, EntitlementTracker};

/// Pricing and charging of gated actions.
pub mod gate;
pub use gate::{ContactGate, ContactPricing, GateConfig, GateError, GatedAction};

/// Balances and the transaction log.
pub mod ledger;
pub use ledger::{CreditKind, LedgerConfig, LedgerError, TokenLedger};

/// Confirmed payment reconciliation.
pub mod purchase;
pub use purchase::{ConfirmedPurchase, PackageCatalog, PurchaseError, PurchaseReconciler};

/// Metric counters.
pub mod telemetry;
