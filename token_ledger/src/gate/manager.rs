//! Contact gate: free check, debit, then entitlement record.

use chrono::{DateTime, Utc};

use super::{
    errors::GateResult,
    models::{
        CONTACT_ACTION, ContactOutcome, ContactPricing, ContactQuote, GateConfig, GatedAction,
    },
};
use crate::entitlement::{BusinessId, EntitlementError, EntitlementTracker};
use crate::ledger::{ConsumeReceipt, TokenLedger, TransactionMetadata, UserId};

/// Orchestrates a gated action across the tracker and the ledger.
///
/// Neither component reaches into the other's storage: the gate asks the
/// tracker for the price, debits through the ledger, then records the
/// contact.
#[derive(Clone)]
pub struct ContactGate {
    ledger: TokenLedger,
    tracker: EntitlementTracker,
    config: GateConfig,
}

impl ContactGate {
    pub fn new(ledger: TokenLedger, tracker: EntitlementTracker, config: GateConfig) -> Self {
        Self {
            ledger,
            tracker,
            config,
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub async fn quote(&self, user_id: UserId, business_id: BusinessId) -> GateResult<ContactQuote> {
        self.quote_at(user_id, business_id, Utc::now()).await
    }

    /// Price a contact without changing anything
    pub async fn quote_at(
        &self,
        user_id: UserId,
        business_id: BusinessId,
        now: DateTime<Utc>,
    ) -> GateResult<ContactQuote> {
        let standing = self.tracker.standing_at(user_id, business_id, now).await?;
        let pricing = if standing.can_use_free_contact {
            ContactPricing::Free
        } else if standing.contacted_this_month {
            ContactPricing::RepeatContact
        } else {
            ContactPricing::NewBusiness
        };

        let tokens_required = pricing.cost(&self.config);
        let balance = self.ledger.get_balance(user_id).await?;

        Ok(ContactQuote {
            pricing,
            tokens_required,
            balance,
            affordable: balance >= tokens_required,
        })
    }

    pub async fn contact(
        &self,
        user_id: UserId,
        business_id: BusinessId,
        metadata: TransactionMetadata,
    ) -> GateResult<ContactOutcome> {
        self.contact_at(user_id, business_id, metadata, Utc::now())
            .await
    }

    /// Run a full gated contact at `now`
    ///
    /// A free quote that loses the allowance to a concurrent request is
    /// priced again once; the second quote is never free.
    ///
    /// # Errors
    ///
    /// * `GateError::Ledger` - `InsufficientBalance` when the price cannot be
    ///   paid; nothing is recorded
    /// * `GateError::Entitlement` - Tracker failure
    pub async fn contact_at(
        &self,
        user_id: UserId,
        business_id: BusinessId,
        metadata: TransactionMetadata,
        now: DateTime<Utc>,
    ) -> GateResult<ContactOutcome> {
        let mut requoted = false;

        loop {
            let quote = self.quote_at(user_id, business_id, now).await?;
            let was_free = quote.pricing == ContactPricing::Free;

            let receipt = if was_free {
                None
            } else {
                let metadata = metadata
                    .clone()
                    .with("business_id", business_id)
                    .with("pricing", quote.pricing.as_str());
                Some(
                    self.ledger
                        .consume_tokens(user_id, quote.tokens_required, CONTACT_ACTION, metadata)
                        .await?,
                )
            };

            let recorded = self
                .tracker
                .record_contact_attempt_at(user_id, business_id, quote.tokens_required, was_free, now)
                .await;

            match recorded {
                Ok(contact) => {
                    return Ok(ContactOutcome {
                        pricing: quote.pricing,
                        tokens_spent: quote.tokens_required,
                        remaining_balance: receipt
                            .as_ref()
                            .map(|r| r.remaining_balance)
                            .unwrap_or(quote.balance),
                        transaction_id: receipt.as_ref().map(|r| r.transaction_id),
                        contact,
                    });
                }
                Err(EntitlementError::FreeAllowanceExhausted { .. }) if !requoted => {
                    tracing::debug!(user_id, business_id, "Free contact taken concurrently, re-pricing");
                    requoted = true;
                }
                Err(err) => {
                    if let Some(receipt) = &receipt {
                        tracing::error!(
                            user_id,
                            business_id,
                            transaction_id = receipt.transaction_id,
                            error = %err,
                            "Contact paid but not recorded"
                        );
                    }
                    return Err(err.into());
                }
            }
        }
    }

    /// Debit the cost of a non-contact gated action
    pub async fn charge(
        &self,
        user_id: UserId,
        action: &GatedAction,
        metadata: TransactionMetadata,
    ) -> GateResult<ConsumeReceipt> {
        let cost = action.cost(&self.config)?;
        let receipt = self
            .ledger
            .consume_tokens(user_id, cost, action.action_type(), metadata)
            .await?;
        Ok(receipt)
    }
}
