//! Gating policy for token-priced actions.
//!
//! Contacts cost 0, 1 or 2 tokens depending on the monthly free allowance
//! and whether the business was contacted this month. Other actions carry
//! a flat cost from [`GateConfig`].

pub mod errors;
pub mod manager;
pub mod models;

pub use errors::{GateError, GateResult};
pub use manager::ContactGate;
pub use models::{
    CONTACT_ACTION, ContactOutcome, ContactPricing, ContactQuote, GateConfig, GatedAction,
};
