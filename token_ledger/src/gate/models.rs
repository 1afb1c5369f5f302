//! Pricing models for gated actions.

use serde::{Deserialize, Serialize};

use super::errors::{GateError, GateResult};
use crate::db::config::parse_env_or;
use crate::entitlement::ContactRecord;
use crate::ledger::TransactionId;

/// Action label recorded on contact debits
pub const CONTACT_ACTION: &str = "contact_seller";

/// Token costs of gated actions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Cost of contacting a business already contacted this month
    pub repeat_contact_cost: i64,
    /// Cost of contacting a business not contacted this month
    pub new_business_cost: i64,
    /// Boost listing cost for levels 1, 2 and 3
    pub boost_costs: [i64; 3],
    pub analytics_cost: i64,
}

impl GateConfig {
    /// Create configuration from environment variables
    ///
    /// - `CONTACT_REPEAT_COST` (default: 1)
    /// - `CONTACT_NEW_BUSINESS_COST` (default: 2)
    /// - `BOOST_COST_LEVEL_1`, `BOOST_COST_LEVEL_2`, `BOOST_COST_LEVEL_3`
    ///   (default: 5, 10, 20)
    /// - `ANALYTICS_COST` (default: 3)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            repeat_contact_cost: parse_env_or("CONTACT_REPEAT_COST", defaults.repeat_contact_cost),
            new_business_cost: parse_env_or(
                "CONTACT_NEW_BUSINESS_COST",
                defaults.new_business_cost,
            ),
            boost_costs: [
                parse_env_or("BOOST_COST_LEVEL_1", defaults.boost_costs[0]),
                parse_env_or("BOOST_COST_LEVEL_2", defaults.boost_costs[1]),
                parse_env_or("BOOST_COST_LEVEL_3", defaults.boost_costs[2]),
            ],
            analytics_cost: parse_env_or("ANALYTICS_COST", defaults.analytics_cost),
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            repeat_contact_cost: 1,
            new_business_cost: 2,
            boost_costs: [5, 10, 20],
            analytics_cost: 3,
        }
    }
}

/// Price tier of a contact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactPricing {
    /// Monthly free contact
    Free,
    /// Business already contacted this month
    RepeatContact,
    /// Business not contacted this month, free allowance spent
    NewBusiness,
}

impl ContactPricing {
    pub fn cost(self, config: &GateConfig) -> i64 {
        match self {
            Self::Free => 0,
            Self::RepeatContact => config.repeat_contact_cost,
            Self::NewBusiness => config.new_business_cost,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::RepeatContact => "repeat_contact",
            Self::NewBusiness => "new_business",
        }
    }
}

/// Non-contact actions that cost tokens.
///
/// Only the configured actions deserialize; the price of a request body is
/// always looked up in [`GateConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GatedAction {
    BoostListing { level: u8 },
    PremiumAnalytics,
    /// Caller-priced action for in-process callers
    #[serde(skip_deserializing)]
    Custom { action_type: String, cost: i64 },
}

impl GatedAction {
    /// Label stored as the debit's action type
    pub fn action_type(&self) -> &str {
        match self {
            Self::BoostListing { .. } => "boost_listing",
            Self::PremiumAnalytics => "premium_analytics",
            Self::Custom { action_type, .. } => action_type,
        }
    }

    pub fn cost(&self, config: &GateConfig) -> GateResult<i64> {
        match self {
            Self::BoostListing { level } => match level {
                1..=3 => Ok(config.boost_costs[usize::from(*level) - 1]),
                _ => Err(GateError::InvalidAction(format!(
                    "boost level must be 1, 2 or 3, got {level}"
                ))),
            },
            Self::PremiumAnalytics => Ok(config.analytics_cost),
            Self::Custom { action_type, cost } => {
                if action_type.trim().is_empty() {
                    Err(GateError::InvalidAction("action type is empty".to_string()))
                } else {
                    Ok(*cost)
                }
            }
        }
    }
}

/// Price of contacting a business right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactQuote {
    pub pricing: ContactPricing,
    pub tokens_required: i64,
    pub balance: i64,
    pub affordable: bool,
}

/// Result of a completed gated contact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactOutcome {
    pub pricing: ContactPricing,
    pub tokens_spent: i64,
    pub remaining_balance: i64,
    /// Debit record, absent for a free contact
    pub transaction_id: Option<TransactionId>,
    pub contact: ContactRecord,
}
