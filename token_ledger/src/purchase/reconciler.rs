//! Idempotent bridge from confirmed payments to ledger credits.

use super::{
    catalog::PackageCatalog,
    errors::{PurchaseError, PurchaseResult},
    models::{ConfirmedPurchase, PurchaseTokens, ReconcileOutcome},
};
use crate::ledger::{CreditKind, LedgerError, TokenLedger, TransactionKind, UserId};

/// Turns each confirmed payment into exactly one purchase credit.
///
/// Stateless: idempotency lives in the ledger's unique external reference,
/// so redelivered and concurrently delivered events credit once.
#[derive(Clone)]
pub struct PurchaseReconciler {
    ledger: TokenLedger,
    catalog: PackageCatalog,
}

impl PurchaseReconciler {
    pub fn new(ledger: TokenLedger, catalog: PackageCatalog) -> Self {
        Self { ledger, catalog }
    }

    /// Credit a confirmed purchase unless its reference was seen before
    ///
    /// # Arguments
    ///
    /// * `external_reference` - Payment intent id from the provider
    /// * `user_id` - Buyer
    /// * `base_tokens` - Tokens of the package, must be positive
    /// * `bonus_tokens` - Promotional extra, may be zero
    /// * `amount_paid` - Raw paid amount in minor units, stored as metadata
    ///
    /// # Errors
    ///
    /// * `PurchaseError::InvalidPurchase` - Empty reference or bad token counts
    /// * `PurchaseError::Ledger` - Storage failure or timeout; safe to redeliver
    pub async fn reconcile_purchase(
        &self,
        external_reference: &str,
        user_id: UserId,
        base_tokens: i64,
        bonus_tokens: i64,
        amount_paid: i64,
    ) -> PurchaseResult<ReconcileOutcome> {
        self.reconcile(&ConfirmedPurchase {
            external_reference: external_reference.to_string(),
            user_id,
            base_tokens,
            bonus_tokens,
            amount_paid_minor_units: amount_paid,
            package_id: None,
        })
        .await
    }

    /// Credit a confirmed purchase event
    ///
    /// # Errors
    ///
    /// * `PurchaseError::InvalidPurchase` - Bad counts, unknown package, or
    ///   a token total that overflows
    /// * `PurchaseError::Ledger(LedgerError::ReferenceConflict)` - The
    ///   reference was recorded for another user or another kind of credit
    pub async fn reconcile(&self, event: &ConfirmedPurchase) -> PurchaseResult<ReconcileOutcome> {
        event.validate()?;

        if let Some(existing) = self
            .ledger
            .find_by_reference(&event.external_reference)
            .await?
        {
            if existing.user_id != event.user_id || existing.kind != TransactionKind::Purchase {
                tracing::warn!(
                    external_reference = %event.external_reference,
                    recorded_user_id = existing.user_id,
                    recorded_kind = %existing.kind,
                    event_user_id = event.user_id,
                    "Purchase reference already used by another transaction"
                );
                return Err(LedgerError::ReferenceConflict(event.external_reference.clone()).into());
            }
            tracing::info!(
                external_reference = %event.external_reference,
                user_id = existing.user_id,
                transaction_id = existing.id,
                "Purchase already processed"
            );

            return Ok(ReconcileOutcome {
                already_processed: true,
                new_balance: existing.balance_after,
                tokens_added: 0,
                transaction_id: existing.id,
            });
        }

        let tokens = self.resolve_tokens(event).await?;
        let total = tokens.total()?;

        // Two deliveries can both miss the lookup above; the unique
        // reference turns the loser into a duplicate inside the ledger.
        let receipt = self
            .ledger
            .add_tokens(
                event.user_id,
                total,
                CreditKind::Purchase,
                event.metadata(tokens),
            )
            .await?;

        if !receipt.already_recorded {
            tracing::info!(
                external_reference = %event.external_reference,
                user_id = event.user_id,
                tokens = receipt.tokens_added,
                amount_paid = event.amount_paid_minor_units,
                package_id = event.package_id,
                new_balance = receipt.new_balance,
                "Purchase credited"
            );
        }

        Ok(ReconcileOutcome {
            already_processed: receipt.already_recorded,
            new_balance: receipt.new_balance,
            tokens_added: receipt.tokens_added,
            transaction_id: receipt.transaction_id,
        })
    }

    /// Token counts to credit: the catalog's when a package is named
    async fn resolve_tokens(&self, event: &ConfirmedPurchase) -> PurchaseResult<PurchaseTokens> {
        let declared = event.declared_tokens();
        let Some(package_id) = event.package_id else {
            return Ok(declared);
        };

        let package = self.catalog.get_package(package_id).await?.ok_or_else(|| {
            PurchaseError::InvalidPurchase(format!("unknown package {package_id}"))
        })?;
        let tokens = package.tokens();

        if declared.base != 0 && declared != tokens {
            tracing::warn!(
                external_reference = %event.external_reference,
                package_id,
                declared_base = declared.base,
                declared_bonus = declared.bonus,
                package_base = tokens.base,
                package_bonus = tokens.bonus,
                "Purchase token counts differ from the package, using the package"
            );
        }
        if !package.is_active {
            // Paid before the package was retired; still owed.
            tracing::info!(package_id, "Crediting purchase of an inactive package");
        }
        if tokens.total()? <= 0 {
            return Err(PurchaseError::InvalidPurchase(format!(
                "package {package_id} carries no tokens"
            )));
        }

        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{TransactionKind, TransactionMetadata};
    use crate::purchase::{MemoryPackageStore, PurchaseError};
    use crate::purchase::catalog::default_packages;
    use std::sync::Arc;

    fn reconciler(ledger: &TokenLedger) -> PurchaseReconciler {
        PurchaseReconciler::new(ledger.clone(), PackageCatalog::in_memory())
    }

    fn package_event(reference: &str, user_id: UserId, package_id: i64) -> ConfirmedPurchase {
        ConfirmedPurchase {
            external_reference: reference.to_string(),
            user_id,
            base_tokens: 0,
            bonus_tokens: 0,
            amount_paid_minor_units: 1000,
            package_id: Some(package_id),
        }
    }

    #[tokio::test]
    async fn test_reconcile_credits_once() {
        let ledger = TokenLedger::in_memory();
        let reconciler = reconciler(&ledger);

        let first = reconciler
            .reconcile_purchase("pi_1", 1, 10, 2, 999)
            .await
            .unwrap();
        assert!(!first.already_processed);
        assert_eq!(first.new_balance, 12);
        assert_eq!(first.tokens_added, 12);

        let second = reconciler
            .reconcile_purchase("pi_1", 1, 10, 2, 999)
            .await
            .unwrap();
        assert!(second.already_processed);
        assert_eq!(second.new_balance, 12);
        assert_eq!(second.tokens_added, 0);
        assert_eq!(second.transaction_id, first.transaction_id);

        assert_eq!(ledger.get_balance(1).await.unwrap(), 12);
    }

    #[tokio::test]
    async fn test_redelivery_reports_balance_at_the_time() {
        let ledger = TokenLedger::in_memory();
        let reconciler = reconciler(&ledger);

        reconciler.reconcile_purchase("pi_1", 1, 10, 0, 999).await.unwrap();
        reconciler.reconcile_purchase("pi_2", 1, 5, 0, 499).await.unwrap();

        let replay = reconciler
            .reconcile_purchase("pi_1", 1, 10, 0, 999)
            .await
            .unwrap();
        assert!(replay.already_processed);
        assert_eq!(replay.new_balance, 10);
        assert_eq!(ledger.get_balance(1).await.unwrap(), 15);
    }

    #[tokio::test]
    async fn test_package_decides_token_counts() {
        let ledger = TokenLedger::in_memory();
        let reconciler = reconciler(&ledger);

        let mut event = package_event("pi_9", 4, 2);
        // Declared counts lose to the catalog
        event.base_tokens = 500;
        let outcome = reconciler.reconcile(&event).await.unwrap();
        assert_eq!(outcome.tokens_added, 30);

        let record = ledger.find_by_reference("pi_9").await.unwrap().unwrap();
        assert_eq!(record.kind, TransactionKind::Purchase);
        assert_eq!(record.amount, 30);
        assert_eq!(record.metadata["amount_paid"], 1000);
        assert_eq!(record.metadata["package_id"], 2);
        assert_eq!(record.metadata["base_tokens"], 25);
        assert_eq!(record.metadata["bonus_tokens"], 5);

        let account = ledger.get_account(4).await.unwrap().unwrap();
        assert_eq!(account.total_purchased, 30);
        assert_eq!(account.lifetime_purchased, 30);
    }

    #[tokio::test]
    async fn test_unknown_package_writes_nothing() {
        let ledger = TokenLedger::in_memory();
        let reconciler = reconciler(&ledger);

        let err = reconciler
            .reconcile(&package_event("pi_1", 1, 77))
            .await
            .unwrap_err();
        assert!(matches!(err, PurchaseError::InvalidPurchase(_)));
        assert!(ledger.get_account(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_inactive_package_still_credits() {
        let store = Arc::new(MemoryPackageStore::default());
        let mut retired = default_packages()[0].clone();
        retired.is_active = false;
        store.upsert(retired);

        let ledger = TokenLedger::in_memory();
        let reconciler = PurchaseReconciler::new(ledger.clone(), PackageCatalog::new(store));

        let outcome = reconciler.reconcile(&package_event("pi_1", 1, 1)).await.unwrap();
        assert_eq!(outcome.tokens_added, 10);
    }

    #[tokio::test]
    async fn test_overflowing_total_is_invalid() {
        let ledger = TokenLedger::in_memory();
        let reconciler = reconciler(&ledger);

        let err = reconciler
            .reconcile_purchase("pi_1", 1, i64::MAX, 1, 999)
            .await
            .unwrap_err();
        assert!(matches!(err, PurchaseError::InvalidPurchase(_)));
        assert!(!err.is_retryable());
        assert!(ledger.get_account(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reference_of_another_user_conflicts() {
        let ledger = TokenLedger::in_memory();
        let reconciler = reconciler(&ledger);

        reconciler.reconcile_purchase("pi_1", 1, 10, 0, 999).await.unwrap();

        let err = reconciler
            .reconcile_purchase("pi_1", 2, 10, 0, 999)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PurchaseError::Ledger(LedgerError::ReferenceConflict(_))
        ));
        assert!(ledger.get_account(2).await.unwrap().is_none());
        assert_eq!(ledger.get_balance(1).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_reference_of_a_bonus_conflicts() {
        let ledger = TokenLedger::in_memory();
        ledger
            .add_tokens(
                1,
                5,
                CreditKind::Bonus,
                TransactionMetadata::new().with_external_reference("promo_1"),
            )
            .await
            .unwrap();

        let err = reconciler(&ledger)
            .reconcile_purchase("promo_1", 1, 10, 0, 999)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PurchaseError::Ledger(LedgerError::ReferenceConflict(_))
        ));
        assert_eq!(ledger.get_balance(1).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_invalid_purchase_writes_nothing() {
        let ledger = TokenLedger::in_memory();
        let reconciler = reconciler(&ledger);

        let err = reconciler
            .reconcile_purchase("", 1, 10, 0, 999)
            .await
            .unwrap_err();
        assert!(matches!(err, PurchaseError::InvalidPurchase(_)));
        assert!(!err.is_retryable());

        let err = reconciler
            .reconcile_purchase("pi_1", 1, 0, 3, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, PurchaseError::InvalidPurchase(_)));

        assert!(ledger.get_account(1).await.unwrap().is_none());
    }
}
