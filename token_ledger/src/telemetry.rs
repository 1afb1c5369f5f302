//! Ledger metrics.
//!
//! Counters are recorded through the `metrics` facade; the server decides
//! whether an exporter is installed.

use crate::ledger::TransactionKind;

/// Tokens credited, labelled by transaction kind
pub fn tokens_credited(kind: TransactionKind, amount: i64) {
    metrics::counter!("ledger_tokens_credited_total", "kind" => kind.to_string())
        .increment(amount.unsigned_abs());
}

/// Tokens consumed, labelled by action type
pub fn tokens_consumed(action_type: &str, amount: i64) {
    metrics::counter!("ledger_tokens_consumed_total", "action" => action_type.to_string())
        .increment(amount.unsigned_abs());
}

/// Debits refused for lack of balance
pub fn consumption_denied(action_type: &str) {
    metrics::counter!("ledger_consumption_denied_total", "action" => action_type.to_string())
        .increment(1);
}

/// Credits skipped because their external reference was already recorded
pub fn duplicate_reference() {
    metrics::counter!("ledger_duplicate_references_total").increment(1);
}

/// Contacts recorded, labelled free or paid
pub fn contact_recorded(was_free: bool) {
    let pricing = if was_free { "free" } else { "paid" };
    metrics::counter!("entitlement_contacts_total", "pricing" => pricing).increment(1);
}
