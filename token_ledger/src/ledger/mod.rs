//! Token ledger: per-user balances plus an append-only transaction log.
//!
//! This module implements:
//! - Atomic credit and debit with an exclusive per-account lock
//! - Transaction log written in the same unit of work as the balance
//! - Idempotent crediting keyed by external payment reference
//! - History, summary and audit reads
//!
//! ## Example
//!
//! ```no_run
//! use token_ledger::ledger::{CreditKind, TokenLedger, TransactionMetadata};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ledger = TokenLedger::in_memory();
//!
//!     ledger
//!         .add_tokens(1, 10, CreditKind::Purchase, TransactionMetadata::new())
//!         .await?;
//!     let receipt = ledger
//!         .consume_tokens(1, 2, "contact_seller", TransactionMetadata::new())
//!         .await?;
//!     println!("{} tokens left", receipt.remaining_balance);
//!
//!     Ok(())
//! }
//! ```

pub mod errors;
pub mod manager;
pub mod models;
pub mod postgres;
pub mod store;

pub use errors::{LedgerError, LedgerResult};
pub use manager::{DEFAULT_PAGE_LIMIT, LedgerConfig, MAX_PAGE_LIMIT, TokenLedger};
pub use models::{
    Account, ConsumeReceipt, CreditKind, CreditReceipt, EntryDirection, LedgerAudit,
    PostOutcome, Posting, TokenSummary, TransactionFilter, TransactionId,
    TransactionKind, TransactionMetadata, TransactionPage, TransactionRecord, UserId,
};
pub use postgres::PgLedgerStore;
pub use store::{LedgerStore, MemoryLedgerStore};
