use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sha2::Sha256;

use crate::db::queries;
use crate::errors::{WebhookError, WebhookRejection};
use crate::models::{
    AttemptStatus, Booking, PaymentEvent, PaymentEventKind, PaymentLedger, WebhookEvent,
    GATEWAY_STRIPE,
};
use crate::services::audit::AuditLog;
use crate::services::ledger::LedgerOutcome;
use crate::services::{events, ledger, payments};
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

const REQUIRED_FIELDS: [&str; 5] = ["id", "object", "created", "data", "type"];

#[derive(Debug, Clone, Copy)]
pub struct ReplayTolerances {
    pub max_age_secs: i64,
    pub future_secs: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayDecision {
    Accept,
    Duplicate,
    Stale,
    Future,
    OutOfOrder,
}

impl ReplayDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplayDecision::Accept => "accept",
            ReplayDecision::Duplicate => "duplicate",
            ReplayDecision::Stale => "stale",
            ReplayDecision::Future => "future",
            ReplayDecision::OutOfOrder => "out_of_order",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingOutcome {
    Processed,
    Ignored,
    Replay(ReplayDecision),
    NoChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    Succeeded,
    Failed,
    Cancelled,
    Refunded,
    RequiresAction,
}

impl EventAction {
    pub fn from_type(event_type: &str) -> Option<Self> {
        match event_type {
            "payment_intent.succeeded" => Some(EventAction::Succeeded),
            "payment_intent.payment_failed" => Some(EventAction::Failed),
            "payment_intent.canceled" => Some(EventAction::Cancelled),
            "charge.refunded" => Some(EventAction::Refunded),
            "payment_intent.requires_action" => Some(EventAction::RequiresAction),
            _ => None,
        }
    }
}

/// Decides whether an event may change a booking's ledger.
pub fn should_process_event(
    ledger: &PaymentLedger,
    event_id: &str,
    event_ts: i64,
    now: i64,
    tolerances: &ReplayTolerances,
) -> ReplayDecision {
    if ledger.last_webhook_event_id.as_deref() == Some(event_id) {
        return ReplayDecision::Duplicate;
    }
    if event_ts <= now - tolerances.max_age_secs {
        return ReplayDecision::Stale;
    }
    if event_ts > now + tolerances.future_secs {
        return ReplayDecision::Future;
    }
    if let Some(last) = ledger.last_webhook_timestamp {
        if event_ts < last {
            return ReplayDecision::OutOfOrder;
        }
    }
    ReplayDecision::Accept
}

/// Checks a `t=<unix>,v1=<hex>` signature header against the raw payload.
pub fn verify_signature(
    secret: &str,
    header: &str,
    payload: &[u8],
    now: i64,
    tolerance_secs: i64,
) -> Result<(), WebhookRejection> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<Vec<u8>> = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(WebhookRejection::MalformedSignature)?;
    if signatures.is_empty() {
        return Err(WebhookRejection::MalformedSignature);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookRejection::MissingSecret)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    let matched = signatures
        .iter()
        .any(|candidate| mac.clone().verify_slice(candidate).is_ok());
    if !matched {
        return Err(WebhookRejection::SignatureMismatch);
    }

    if now - timestamp > tolerance_secs {
        return Err(WebhookRejection::SignatureExpired);
    }

    Ok(())
}

/// Structural checks on the payload after the signature has been verified.
pub fn parse_event(content_type: Option<&str>, payload: &[u8]) -> Result<WebhookEvent, WebhookRejection> {
    if !content_type
        .map(|ct| ct.to_ascii_lowercase().contains("application/json"))
        .unwrap_or(false)
    {
        return Err(WebhookRejection::UnsupportedContentType);
    }
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Err(WebhookRejection::EmptyBody);
    }

    let value: Value =
        serde_json::from_slice(payload).map_err(|_| WebhookRejection::InvalidJson)?;
    if !value.is_object() {
        return Err(WebhookRejection::InvalidJson);
    }
    if REQUIRED_FIELDS.iter().any(|field| value.get(field).is_none())
        || value.get("data").and_then(|d| d.get("object")).is_none()
    {
        return Err(WebhookRejection::MissingFields);
    }
    if value.get("object").and_then(Value::as_str) != Some("event") {
        return Err(WebhookRejection::NotAnEvent);
    }

    serde_json::from_value(value).map_err(|_| WebhookRejection::MissingFields)
}

/// Runs the full validation gate and applies the event.
pub async fn handle_webhook_event(
    state: &AppState,
    payload: &[u8],
    content_type: Option<&str>,
    signature_header: Option<&str>,
    now: DateTime<Utc>,
) -> Result<ProcessingOutcome, WebhookError> {
    let config = &state.config;
    let unix_now = now.timestamp();

    if config.stripe_webhook_secret.is_empty() {
        tracing::error!("webhook received but STRIPE_WEBHOOK_SECRET is not configured");
        return Err(WebhookError::Rejected(WebhookRejection::MissingSecret));
    }
    let signature_header = signature_header
        .filter(|h| !h.trim().is_empty())
        .ok_or(WebhookError::Rejected(WebhookRejection::MissingSignature))?;
    verify_signature(
        &config.stripe_webhook_secret,
        signature_header,
        payload,
        unix_now,
        config.webhook_replay_tolerance_secs,
    )
    .map_err(WebhookError::Rejected)?;

    let event = parse_event(content_type, payload).map_err(WebhookError::Rejected)?;

    let Some(action) = EventAction::from_type(&event.event_type) else {
        tracing::info!(event_type = %event.event_type, event_id = %event.id, "webhook event type not handled");
        state.audit.info(
            "webhook.unhandled_type",
            json!({ "event_id": event.id, "type": event.event_type }),
        );
        return Ok(ProcessingOutcome::Ignored);
    };

    if action == EventAction::RequiresAction {
        state.audit.info(
            "webhook.requires_action",
            json!({ "event_id": event.id, "payment_intent_id": event.payment_intent_id() }),
        );
        return Ok(ProcessingOutcome::Ignored);
    }

    let tolerances = ReplayTolerances {
        max_age_secs: config.webhook_replay_tolerance_secs,
        future_secs: config.webhook_future_tolerance_secs,
    };

    let (outcome, published) = {
        let conn = state.conn();
        let tx = conn.unchecked_transaction().map_err(anyhow::Error::from)?;
        let result = apply_event(&tx, &state.audit, &event, action, now, &tolerances)?;
        tx.commit().map_err(anyhow::Error::from)?;
        result
    };

    events::publish(state, published).await;

    Ok(outcome)
}

fn find_booking(conn: &Connection, event: &WebhookEvent) -> anyhow::Result<Option<Booking>> {
    if let Some(intent_id) = event.payment_intent_id() {
        if let Some(booking) = queries::get_booking_by_intent_id(conn, intent_id)? {
            return Ok(Some(booking));
        }
    }
    match event.metadata_booking_code() {
        Some(code) => queries::get_booking_by_code(conn, code),
        None => Ok(None),
    }
}

fn apply_event(
    conn: &Connection,
    audit: &AuditLog,
    event: &WebhookEvent,
    action: EventAction,
    now: DateTime<Utc>,
    tolerances: &ReplayTolerances,
) -> Result<(ProcessingOutcome, Vec<PaymentEvent>), WebhookError> {
    let intent_id = event.payment_intent_id();
    let Some(mut booking) = find_booking(conn, event)? else {
        // 5xx so the gateway retries once the booking has recorded the intent.
        return Err(WebhookError::Internal(anyhow::anyhow!(
            "no booking found for payment intent {}",
            intent_id.unwrap_or("<none>")
        )));
    };

    let decision = should_process_event(
        &booking.ledger,
        &event.id,
        event.created,
        now.timestamp(),
        tolerances,
    );
    if decision != ReplayDecision::Accept {
        tracing::info!(
            booking_code = %booking.code,
            event_id = %event.id,
            decision = decision.as_str(),
            "webhook replay detected"
        );
        audit.info(
            "webhook.replay",
            json!({ "booking_code": booking.code, "event_id": event.id, "decision": decision.as_str() }),
        );
        return Ok((ProcessingOutcome::Replay(decision), vec![]));
    }

    let now_naive = now.naive_utc();
    let data = &event.data.object;
    let mut payment = match intent_id {
        Some(id) => queries::get_payment_by_intent_id(conn, id)?,
        None => None,
    };

    let mut review = None;
    let (outcome, kind, reference, amount) = match action {
        EventAction::Succeeded => {
            let charge_id = ledger::extract_charge_id(data);
            let reference = charge_id.clone().or_else(|| intent_id.map(str::to_string));
            let outcome = ledger::mark_successful(
                &mut booking.ledger,
                GATEWAY_STRIPE,
                reference.as_deref(),
                intent_id,
                now_naive,
            );
            if let Some(payment) = payment.as_mut() {
                let newly_captured = !payment.status.is_successful();
                let moved = ledger::advance_payment(payment, AttemptStatus::Captured);
                let merged = ledger::merge_payment_references(payment, intent_id, charge_id.as_deref());
                if moved || merged {
                    queries::update_payment(conn, payment)?;
                }
                if newly_captured && moved {
                    if matches!(outcome, LedgerOutcome::Rejected { .. }) {
                        review = Some(payments::CAPTURED_ON_TERMINAL_BOOKING);
                    } else if payments::capture_is_surplus(conn, &booking, payment)? {
                        review = Some(payments::CAPTURED_ON_COVERED_BOOKING);
                    }
                }
            }
            let amount = payment.as_ref().map(|p| p.amount);
            (outcome, PaymentEventKind::PaymentCaptured, reference, amount)
        }
        EventAction::Failed => {
            let message = data
                .get("last_payment_error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("Payment failed via webhook")
                .to_string();
            let outcome = ledger::mark_failed(&mut booking.ledger, intent_id, &message, now_naive);
            if let Some(payment) = payment.as_mut() {
                if ledger::advance_payment(payment, AttemptStatus::Failed) {
                    payment.error_message = Some(message.clone());
                    queries::update_payment(conn, payment)?;
                }
            }
            (outcome, PaymentEventKind::PaymentFailed, intent_id.map(str::to_string), None)
        }
        EventAction::Cancelled => {
            let outcome = ledger::mark_cancelled(&mut booking.ledger, now_naive);
            if let Some(payment) = payment.as_mut() {
                if ledger::advance_payment(payment, AttemptStatus::Cancelled) {
                    queries::update_payment(conn, payment)?;
                }
            }
            (outcome, PaymentEventKind::PaymentCancelled, intent_id.map(str::to_string), None)
        }
        EventAction::Refunded => {
            let charge_id = event.object_id().map(str::to_string);
            let refunded = data
                .get("amount_refunded")
                .and_then(Value::as_i64)
                .map(|minor| Decimal::new(minor, 2));
            let outcome =
                ledger::mark_refunded(&mut booking.ledger, charge_id.as_deref(), refunded, now_naive);
            (outcome, PaymentEventKind::PaymentRefunded, charge_id, refunded)
        }
        EventAction::RequiresAction => return Ok((ProcessingOutcome::Ignored, vec![])),
    };

    if let Some(id) = intent_id {
        ledger::record_intent_id(&mut booking.ledger, id);
    }
    ledger::record_webhook(&mut booking.ledger, &event.id, event.created);

    if !queries::save_booking(conn, &mut booking)? {
        return Err(WebhookError::Internal(anyhow::anyhow!(
            "booking {} was modified concurrently",
            booking.code
        )));
    }

    let mut published = vec![];
    if outcome.is_transition() {
        published.push(events::record(conn, &booking.code, kind, reference.as_deref(), amount)?);
    }
    if let (Some(stage), Some(payment)) = (review, payment.as_ref()) {
        published.push(payments::flag_unreconciled_capture(conn, audit, &booking, payment, stage)?);
    }

    tracing::info!(
        booking_code = %booking.code,
        event_id = %event.id,
        event_type = %event.event_type,
        outcome = ?outcome,
        "webhook processed"
    );
    audit.info(
        "webhook.processed",
        json!({
            "booking_code": booking.code,
            "event_id": event.id,
            "type": event.event_type,
            "status": booking.ledger.status.as_str(),
        }),
    );

    let processing = if outcome.changed() || review.is_some() {
        ProcessingOutcome::Processed
    } else {
        ProcessingOutcome::NoChange
    };
    Ok((processing, published))
}
