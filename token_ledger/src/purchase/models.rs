//! Purchase event and outcome models.

use serde::{Deserialize, Serialize};

use super::errors::{PurchaseError, PurchaseResult};
use crate::ledger::{TransactionId, TransactionMetadata, UserId};

/// Token package ID type
pub type PackageId = i64;

/// Base and bonus tokens credited by one purchase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseTokens {
    pub base: i64,
    pub bonus: i64,
}

impl PurchaseTokens {
    /// Tokens to credit
    ///
    /// # Errors
    ///
    /// * `PurchaseError::InvalidPurchase` - The sum does not fit in an `i64`
    pub fn total(self) -> PurchaseResult<i64> {
        self.base.checked_add(self.bonus).ok_or_else(|| {
            PurchaseError::InvalidPurchase(format!(
                "token total overflows: {} + {}",
                self.base, self.bonus
            ))
        })
    }
}

/// Confirmed payment as delivered by the payment collaborator.
///
/// The same event may arrive more than once; `external_reference` is the
/// idempotency key. When `package_id` is set the catalog decides the token
/// counts and `base_tokens`/`bonus_tokens` may be omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmedPurchase {
    pub external_reference: String,
    pub user_id: UserId,
    #[serde(default)]
    pub base_tokens: i64,
    #[serde(default)]
    pub bonus_tokens: i64,
    pub amount_paid_minor_units: i64,
    #[serde(default)]
    pub package_id: Option<PackageId>,
}

impl ConfirmedPurchase {
    /// Token counts carried by the event itself
    pub fn declared_tokens(&self) -> PurchaseTokens {
        PurchaseTokens {
            base: self.base_tokens,
            bonus: self.bonus_tokens,
        }
    }

    /// Tokens the event declares, checked for overflow
    pub fn total_tokens(&self) -> PurchaseResult<i64> {
        self.declared_tokens().total()
    }

    pub fn validate(&self) -> PurchaseResult<()> {
        if self.external_reference.trim().is_empty() {
            return Err(PurchaseError::InvalidPurchase(
                "external reference is empty".to_string(),
            ));
        }
        match self.package_id {
            None if self.base_tokens <= 0 => {
                return Err(PurchaseError::InvalidPurchase(format!(
                    "base tokens must be positive, got {}",
                    self.base_tokens
                )));
            }
            Some(_) if self.base_tokens < 0 => {
                return Err(PurchaseError::InvalidPurchase(format!(
                    "base tokens must not be negative, got {}",
                    self.base_tokens
                )));
            }
            Some(package_id) if package_id <= 0 => {
                return Err(PurchaseError::InvalidPurchase(format!(
                    "invalid package id {package_id}"
                )));
            }
            _ => {}
        }
        if self.bonus_tokens < 0 {
            return Err(PurchaseError::InvalidPurchase(format!(
                "bonus tokens must not be negative, got {}",
                self.bonus_tokens
            )));
        }
        Ok(())
    }

    /// Metadata stored on the purchase record, with the counts actually credited
    pub fn metadata(&self, tokens: PurchaseTokens) -> TransactionMetadata {
        TransactionMetadata::new()
            .with_external_reference(self.external_reference.clone())
            .with("amount_paid", self.amount_paid_minor_units)
            .with("base_tokens", tokens.base)
            .with("bonus_tokens", tokens.bonus)
            .with("package_id", self.package_id)
    }
}

/// Result of `reconcile_purchase`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    /// True when this reference had already been credited
    pub already_processed: bool,
    pub new_balance: i64,
    pub tokens_added: i64,
    pub transaction_id: TransactionId,
}
