//! Purchase reconciliation.
//!
//! Payment providers redeliver confirmation webhooks. The reconciler looks
//! the payment reference up first and otherwise credits through the ledger,
//! whose unique reference index settles concurrent deliveries. Events that
//! name a package are credited with the catalog's token counts.

pub mod catalog;
pub mod errors;
pub mod models;
pub mod postgres;
pub mod reconciler;

pub use catalog::{MemoryPackageStore, PackageCatalog, PackageListing, PackageStore, TokenPackage};
pub use errors::{PurchaseError, PurchaseResult};
pub use models::{ConfirmedPurchase, PackageId, PurchaseTokens, ReconcileOutcome};
pub use postgres::PgPackageStore;
pub use reconciler::PurchaseReconciler;
