//! Booking-level payment ledger.
//!
//! Every mutation of a [`PaymentLedger`] goes through the functions here. They are
//! idempotent: applying the same update twice leaves the ledger as the first
//! application did, and only a real status change reports `Transitioned`.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::models::{AttemptStatus, Payment, PaymentLedger, PaymentStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOutcome {
    Transitioned { from: PaymentStatus, to: PaymentStatus },
    Refreshed,
    Unchanged,
    Rejected { from: PaymentStatus, to: PaymentStatus },
}

impl LedgerOutcome {
    pub fn is_transition(&self) -> bool {
        matches!(self, LedgerOutcome::Transitioned { .. })
    }

    pub fn changed(&self) -> bool {
        matches!(self, LedgerOutcome::Transitioned { .. } | LedgerOutcome::Refreshed)
    }
}

/// Fields an incoming update may carry. `None` means "not provided".
#[derive(Debug, Clone, Default)]
pub struct LedgerUpdate {
    pub status: PaymentStatus,
    pub gateway: Option<String>,
    pub reference: Option<String>,
    pub intent_id: Option<String>,
    pub error_message: Option<String>,
    pub refund_amount: Option<Decimal>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

/// Pure merge of an update into the current ledger.
pub fn merge_ledger_update(
    current: &PaymentLedger,
    incoming: &LedgerUpdate,
    now: NaiveDateTime,
) -> PaymentLedger {
    let mut merged = current.clone();
    merged.status = incoming.status;

    if let Some(gateway) = non_empty(&incoming.gateway) {
        merged.gateway = Some(gateway);
    }
    if merged.reference.as_deref().map_or(true, str::is_empty) {
        if let Some(reference) = non_empty(&incoming.reference) {
            merged.reference = Some(reference);
        }
    }
    if merged.intent_id.as_deref().map_or(true, str::is_empty) {
        if let Some(intent_id) = non_empty(&incoming.intent_id) {
            merged.intent_id = Some(intent_id);
        }
    }
    if incoming.status == PaymentStatus::Paid && merged.paid_at.is_none() {
        merged.paid_at = Some(now);
    }
    if let Some(message) = non_empty(&incoming.error_message) {
        merged.error_message = Some(message);
    }
    if incoming.refund_amount.is_some() {
        merged.refund_amount = incoming.refund_amount;
    }

    merged
}

fn apply(ledger: &mut PaymentLedger, update: LedgerUpdate, now: NaiveDateTime) -> LedgerOutcome {
    let from = ledger.status;
    let to = update.status;

    if !from.can_transition_to(to) {
        tracing::warn!(
            from = from.as_str(),
            to = to.as_str(),
            "rejected invalid payment status transition"
        );
        return LedgerOutcome::Rejected { from, to };
    }

    let merged = merge_ledger_update(ledger, &update, now);
    if merged == *ledger {
        return LedgerOutcome::Unchanged;
    }
    *ledger = merged;

    if from == to {
        LedgerOutcome::Refreshed
    } else {
        LedgerOutcome::Transitioned { from, to }
    }
}

pub fn mark_successful(
    ledger: &mut PaymentLedger,
    gateway: &str,
    reference: Option<&str>,
    intent_id: Option<&str>,
    now: NaiveDateTime,
) -> LedgerOutcome {
    apply(
        ledger,
        LedgerUpdate {
            status: PaymentStatus::Paid,
            gateway: Some(gateway.to_string()),
            reference: reference.map(str::to_string),
            intent_id: intent_id.map(str::to_string),
            ..Default::default()
        },
        now,
    )
}

pub fn mark_failed(
    ledger: &mut PaymentLedger,
    reference: Option<&str>,
    error_message: &str,
    now: NaiveDateTime,
) -> LedgerOutcome {
    apply(
        ledger,
        LedgerUpdate {
            status: PaymentStatus::Failed,
            reference: reference.map(str::to_string),
            error_message: Some(error_message.to_string()),
            ..Default::default()
        },
        now,
    )
}

pub fn mark_refunded(
    ledger: &mut PaymentLedger,
    reference: Option<&str>,
    refund_amount: Option<Decimal>,
    now: NaiveDateTime,
) -> LedgerOutcome {
    apply(
        ledger,
        LedgerUpdate {
            status: PaymentStatus::Refunded,
            reference: reference.map(str::to_string),
            refund_amount,
            ..Default::default()
        },
        now,
    )
}

pub fn mark_cancelled(ledger: &mut PaymentLedger, now: NaiveDateTime) -> LedgerOutcome {
    apply(
        ledger,
        LedgerUpdate {
            status: PaymentStatus::Cancelled,
            ..Default::default()
        },
        now,
    )
}

/// Confirms a booking that needs no gateway payment: free bookings (no gateway)
/// and staff offline bookings.
pub fn mark_settled(
    ledger: &mut PaymentLedger,
    gateway: Option<&str>,
    reference: Option<&str>,
    now: NaiveDateTime,
) -> LedgerOutcome {
    apply(
        ledger,
        LedgerUpdate {
            status: PaymentStatus::Paid,
            gateway: gateway.map(str::to_string),
            reference: reference.map(str::to_string),
            ..Default::default()
        },
        now,
    )
}

/// Records the gateway intent on the booking if none is recorded yet.
pub fn record_intent_id(ledger: &mut PaymentLedger, intent_id: &str) -> bool {
    if intent_id.is_empty() || ledger.intent_id.as_deref().is_some_and(|id| !id.is_empty()) {
        return false;
    }
    ledger.intent_id = Some(intent_id.to_string());
    true
}

/// Replay marker for the most recently accepted webhook event.
pub fn record_webhook(ledger: &mut PaymentLedger, event_id: &str, event_ts: i64) {
    ledger.last_webhook_event_id = Some(event_id.to_string());
    ledger.last_webhook_timestamp = Some(event_ts);
}

/// Charge id from a gateway intent payload: `charges.data[0].id`, then `latest_charge`.
pub fn extract_charge_id(data: &Value) -> Option<String> {
    let from_charges = data
        .get("charges")
        .and_then(|c| c.get("data"))
        .and_then(Value::as_array)
        .and_then(|list| list.first())
        .and_then(|charge| charge.get("id"))
        .and_then(Value::as_str);

    from_charges
        .or_else(|| data.get("latest_charge").and_then(Value::as_str))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Records identifiers on a payment row without overwriting existing ones.
/// Returns true when anything was written.
pub fn merge_payment_references(
    payment: &mut Payment,
    intent_id: Option<&str>,
    charge_id: Option<&str>,
) -> bool {
    let mut changed = false;
    if payment.payment_intent_id.is_none() {
        if let Some(id) = intent_id.filter(|id| !id.is_empty()) {
            payment.payment_intent_id = Some(id.to_string());
            changed = true;
        }
    }
    if payment.transaction_reference.is_none() {
        if let Some(id) = charge_id.filter(|id| !id.is_empty()) {
            payment.transaction_reference = Some(id.to_string());
            changed = true;
        }
    }
    changed
}

/// Moves a payment row forward. Successful rows are never downgraded.
pub fn advance_payment(payment: &mut Payment, next: AttemptStatus) -> bool {
    if !payment.status.can_advance_to(next) {
        return false;
    }
    payment.status = next;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GATEWAY_OFFLINE, GATEWAY_STRIPE};
    use chrono::Utc;
    use serde_json::json;

    fn now() -> NaiveDateTime {
        Utc::now().naive_utc()
    }

    #[test]
    fn test_mark_successful_is_idempotent() {
        let mut ledger = PaymentLedger::default();
        let t = now();

        let first = mark_successful(&mut ledger, GATEWAY_STRIPE, Some("ch_1"), Some("pi_1"), t);
        assert_eq!(
            first,
            LedgerOutcome::Transitioned {
                from: PaymentStatus::Pending,
                to: PaymentStatus::Paid
            }
        );
        let snapshot = ledger.clone();

        let second = mark_successful(&mut ledger, GATEWAY_STRIPE, Some("ch_1"), Some("pi_1"), t);
        assert_eq!(second, LedgerOutcome::Unchanged);
        assert_eq!(ledger, snapshot);
    }

    #[test]
    fn test_identifiers_are_first_write_wins() {
        let mut ledger = PaymentLedger::default();
        mark_successful(&mut ledger, GATEWAY_STRIPE, Some("ch_1"), Some("pi_1"), now());
        let outcome = mark_successful(&mut ledger, GATEWAY_STRIPE, Some("ch_2"), Some("pi_2"), now());

        assert_eq!(outcome, LedgerOutcome::Unchanged);
        assert_eq!(ledger.reference.as_deref(), Some("ch_1"));
        assert_eq!(ledger.intent_id.as_deref(), Some("pi_1"));
    }

    #[test]
    fn test_same_status_fills_missing_reference() {
        let mut ledger = PaymentLedger::default();
        mark_successful(&mut ledger, GATEWAY_STRIPE, None, Some("pi_1"), now());
        let outcome = mark_successful(&mut ledger, GATEWAY_STRIPE, Some("ch_1"), None, now());

        assert_eq!(outcome, LedgerOutcome::Refreshed);
        assert_eq!(ledger.reference.as_deref(), Some("ch_1"));
    }

    #[test]
    fn test_paid_at_set_once() {
        let mut ledger = PaymentLedger::default();
        let first = now();
        mark_successful(&mut ledger, GATEWAY_STRIPE, None, Some("pi_1"), first);
        let later = first + chrono::Duration::minutes(5);
        mark_successful(&mut ledger, GATEWAY_STRIPE, Some("ch_1"), None, later);
        assert_eq!(ledger.paid_at, Some(first));
    }

    #[test]
    fn test_failure_after_success_is_rejected() {
        let mut ledger = PaymentLedger::default();
        mark_successful(&mut ledger, GATEWAY_STRIPE, Some("ch_1"), Some("pi_1"), now());
        let snapshot = ledger.clone();

        let outcome = mark_failed(&mut ledger, None, "card declined", now());
        assert_eq!(
            outcome,
            LedgerOutcome::Rejected {
                from: PaymentStatus::Paid,
                to: PaymentStatus::Failed
            }
        );
        assert_eq!(ledger, snapshot);
    }

    #[test]
    fn test_refund_requires_paid() {
        let mut ledger = PaymentLedger::default();
        let outcome = mark_refunded(&mut ledger, None, None, now());
        assert!(matches!(outcome, LedgerOutcome::Rejected { .. }));

        mark_successful(&mut ledger, GATEWAY_STRIPE, Some("ch_1"), Some("pi_1"), now());
        let amount: Decimal = "40.00".parse().unwrap();
        let outcome = mark_refunded(&mut ledger, Some("ch_1"), Some(amount), now());
        assert!(outcome.is_transition());
        assert_eq!(ledger.refund_amount, Some(amount));
        assert_eq!(mark_refunded(&mut ledger, Some("ch_1"), Some(amount), now()), LedgerOutcome::Unchanged);
    }

    #[test]
    fn test_mark_settled_offline() {
        let mut ledger = PaymentLedger::default();
        let outcome = mark_settled(&mut ledger, Some(GATEWAY_OFFLINE), Some("staff@example.com"), now());
        assert!(outcome.is_transition());
        assert_eq!(ledger.status_label(), "Offline");
        assert_eq!(ledger.reference.as_deref(), Some("staff@example.com"));
    }

    #[test]
    fn test_merge_ledger_update_gateway_last_write_wins() {
        let current = PaymentLedger {
            gateway: Some(GATEWAY_OFFLINE.to_string()),
            reference: Some("ref".to_string()),
            ..Default::default()
        };
        let merged = merge_ledger_update(
            &current,
            &LedgerUpdate {
                status: PaymentStatus::Paid,
                gateway: Some(GATEWAY_STRIPE.to_string()),
                reference: Some("other".to_string()),
                ..Default::default()
            },
            now(),
        );
        assert_eq!(merged.gateway.as_deref(), Some(GATEWAY_STRIPE));
        assert_eq!(merged.reference.as_deref(), Some("ref"));
    }

    #[test]
    fn test_extract_charge_id() {
        assert_eq!(
            extract_charge_id(&json!({"charges": {"data": [{"id": "ch_a"}]}, "latest_charge": "ch_b"})),
            Some("ch_a".to_string())
        );
        assert_eq!(extract_charge_id(&json!({"latest_charge": "ch_b"})), Some("ch_b".to_string()));
        assert_eq!(extract_charge_id(&json!({"latest_charge": {"id": "ch_c"}})), None);
        assert_eq!(extract_charge_id(&json!({"charges": "oops"})), None);
        assert_eq!(extract_charge_id(&json!(null)), None);
    }

    #[test]
    fn test_merge_payment_references_first_write_wins() {
        let t = now();
        let mut payment = Payment {
            id: 1,
            identifier: "p".to_string(),
            booking_id: 1,
            amount: Decimal::ONE,
            currency: "NZD".to_string(),
            gateway: GATEWAY_STRIPE.to_string(),
            status: AttemptStatus::Created,
            transaction_reference: None,
            payment_intent_id: Some("pi_1".to_string()),
            error_message: None,
            created_at: t,
            updated_at: t,
        };
        assert!(merge_payment_references(&mut payment, Some("pi_2"), Some("ch_1")));
        assert!(!merge_payment_references(&mut payment, Some("pi_3"), Some("ch_2")));
        assert_eq!(payment.payment_intent_id.as_deref(), Some("pi_1"));
        assert_eq!(payment.transaction_reference.as_deref(), Some("ch_1"));

        payment.status = AttemptStatus::Captured;
        assert!(!advance_payment(&mut payment, AttemptStatus::Failed));
        assert_eq!(payment.status, AttemptStatus::Captured);
    }
}
