use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;

use crate::config::AppConfig;
use crate::db::queries;
use crate::errors::PaymentError;
use crate::models::{
    AttemptStatus, Booking, Payment, PaymentEvent, PaymentEventKind, TicketSelection,
    GATEWAY_OFFLINE, GATEWAY_STRIPE,
};
use crate::services::amount::{self, ActingUser};
use crate::services::audit::AuditLog;
use crate::services::gateway::{GatewayRequest, GatewayResult, GatewayStatus};
use crate::services::ledger::LedgerOutcome;
use crate::services::{events, ledger};
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PaymentInitiationResult {
    NotRequired,
    Confirmed,
    Redirect { url: String },
}

/// What the customer submitted alongside the booking.
#[derive(Debug, Clone, Default)]
pub struct PaymentDetails {
    pub token: Option<String>,
    pub currency: Option<String>,
    pub submitted_amount: Option<Decimal>,
}

fn unexpected(e: anyhow::Error) -> PaymentError {
    PaymentError::Unexpected(format!("{e:#}"))
}

/// Amount still owed for `selections`, taking captured payments and the offline
/// exemption into account.
pub fn compute_owed_amount(
    conn: &Connection,
    booking: &Booking,
    selections: &[TicketSelection],
    acting_user: Option<&ActingUser>,
    config: &AppConfig,
) -> anyhow::Result<Decimal> {
    let payments = if booking.is_persisted() {
        queries::get_payments_for_booking(conn, booking.id)?
    } else {
        vec![]
    };
    let exempt = amount::is_offline_payment_user(acting_user, &config.offline_payment_group);
    Ok(amount::amount_owed(booking, selections, &payments, exempt))
}

pub fn validate_submitted_amount(expected: Decimal, submitted: Option<Decimal>) -> Result<(), PaymentError> {
    match submitted {
        Some(submitted) if !amount::validate_submitted_amount(expected, submitted) => Err(
            PaymentError::Validation(amount::amount_mismatch_message(expected, submitted)),
        ),
        _ => Ok(()),
    }
}

pub fn validate_currency(configured: &str, requested: Option<&str>) -> Result<(), PaymentError> {
    match requested.map(str::trim).filter(|c| !c.is_empty()) {
        Some(currency) if !currency.eq_ignore_ascii_case(configured) => Err(PaymentError::Validation(
            format!("Payments are only accepted in {configured}."),
        )),
        _ => Ok(()),
    }
}

/// Marks a booking that owes nothing as paid. Staff in the offline payment group are
/// recorded against the `Offline` gateway with their email as the reference.
pub fn settle_without_payment(
    conn: &Connection,
    booking: &mut Booking,
    acting_user: Option<&ActingUser>,
    config: &AppConfig,
    now: NaiveDateTime,
) -> anyhow::Result<Option<PaymentEvent>> {
    let offline = amount::is_offline_payment_user(acting_user, &config.offline_payment_group);
    let outcome = if offline {
        ledger::mark_settled(
            &mut booking.ledger,
            Some(GATEWAY_OFFLINE),
            acting_user.map(|u| u.email.as_str()),
            now,
        )
    } else {
        ledger::mark_settled(&mut booking.ledger, None, None, now)
    };

    if !outcome.changed() {
        return Ok(None);
    }
    anyhow::ensure!(
        queries::save_booking(conn, booking)?,
        "booking {} was modified concurrently",
        booking.code
    );
    if !outcome.is_transition() {
        return Ok(None);
    }

    let event = events::record(
        conn,
        &booking.code,
        PaymentEventKind::PaymentSettled,
        booking.ledger.reference.as_deref(),
        None,
    )?;
    Ok(Some(event))
}

fn open_payment(conn: &Connection, booking: &Booking, owed: Decimal, currency: &str) -> anyhow::Result<Payment> {
    let now = Utc::now().naive_utc();
    let mut payment = Payment {
        id: 0,
        identifier: uuid::Uuid::new_v4().to_string(),
        booking_id: booking.id,
        amount: owed,
        currency: currency.to_string(),
        gateway: GATEWAY_STRIPE.to_string(),
        status: AttemptStatus::Created,
        transaction_reference: None,
        payment_intent_id: None,
        error_message: None,
        created_at: now,
        updated_at: now,
    };
    payment.id = queries::insert_payment(conn, &payment)?;
    Ok(payment)
}

/// Charges `owed` for a persisted booking.
pub async fn begin_payment(
    state: &AppState,
    booking: &Booking,
    owed: Decimal,
    details: &PaymentDetails,
) -> Result<PaymentInitiationResult, PaymentError> {
    let config = &state.config;

    validate_submitted_amount(owed, details.submitted_amount)?;
    validate_currency(&config.currency, details.currency.as_deref())?;

    if owed <= Decimal::ZERO {
        return Ok(PaymentInitiationResult::NotRequired);
    }

    let token = details
        .token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            PaymentError::Validation(
                "Please enter your payment details to complete the booking.".to_string(),
            )
        })?;

    let payment = {
        let conn = state.conn();
        open_payment(&conn, booking, owed, &config.currency).map_err(unexpected)?
    };

    tracing::info!(
        booking_code = %booking.code,
        payment_id = payment.id,
        amount = %amount::format_money(owed),
        "initiating payment"
    );
    state.audit.info(
        "payment.initiate",
        json!({
            "booking_code": booking.code,
            "payment_identifier": payment.identifier,
            "amount": amount::format_money(owed),
            "currency": config.currency,
        }),
    );

    let request = GatewayRequest {
        amount: owed,
        currency: config.currency.clone(),
        token: token.to_string(),
        description: format!("Booking: {}", booking.code),
        receipt_email: Some(booking.contact.email.clone()),
        metadata: BTreeMap::from([
            ("booking_id".to_string(), booking.id.to_string()),
            ("booking_code".to_string(), booking.code.clone()),
        ]),
        confirm: true,
    };

    let timeout = Duration::from_secs(config.gateway_timeout_secs);
    let result = match tokio::time::timeout(timeout, state.gateway.initiate(&request)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => return Err(record_transport_failure(state, &payment, &format!("{e:#}"))),
        Err(_) => {
            let message = format!("gateway did not respond within {}s", config.gateway_timeout_secs);
            return Err(record_transport_failure(state, &payment, &message));
        }
    };

    handle_synchronous_result(state, booking.id, payment.id, result).await
}

/// The call never produced a gateway answer. Only the attempt is failed; the
/// booking ledger is left as it was.
fn record_transport_failure(state: &AppState, payment: &Payment, message: &str) -> PaymentError {
    tracing::error!(payment_id = payment.id, error = %message, "payment gateway call failed");
    state.audit.error(
        "payment.gateway.exception",
        json!({ "payment_identifier": payment.identifier, "message": message }),
    );

    let conn = state.conn();
    let mut payment = payment.clone();
    if ledger::advance_payment(&mut payment, AttemptStatus::Failed) {
        payment.error_message = Some(message.to_string());
        if let Err(e) = queries::update_payment(&conn, &payment) {
            tracing::error!(error = %e, payment_id = payment.id, "failed to record payment failure");
        }
    }
    PaymentError::Gateway(message.to_string())
}

/// Applies a synchronous gateway answer to the payment row and the booking ledger.
pub async fn handle_synchronous_result(
    state: &AppState,
    booking_id: i64,
    payment_id: i64,
    result: GatewayResult,
) -> Result<PaymentInitiationResult, PaymentError> {
    let now = Utc::now().naive_utc();

    let (outcome, published) = {
        let conn = state.conn();
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| unexpected(e.into()))?;
        let applied =
            apply_synchronous_result(&tx, &state.audit, booking_id, payment_id, &result, now)
                .map_err(unexpected)?;
        tx.commit().map_err(|e| unexpected(e.into()))?;
        applied
    };

    events::publish(state, published).await;

    match &outcome {
        Ok(initiation) => {
            state.audit.info(
                "payment.gateway.result",
                json!({ "booking_id": booking_id, "payment_id": payment_id, "result": initiation }),
            );
        }
        Err(e) => {
            tracing::warn!(booking_id, payment_id, error = %e, "payment was not completed");
            state.audit.error(
                "payment.gateway.error",
                json!({ "booking_id": booking_id, "payment_id": payment_id, "message": e.to_string() }),
            );
        }
    }
    outcome
}

type SyncOutcome = (Result<PaymentInitiationResult, PaymentError>, Vec<PaymentEvent>);

fn apply_synchronous_result(
    conn: &Connection,
    audit: &AuditLog,
    booking_id: i64,
    payment_id: i64,
    result: &GatewayResult,
    now: NaiveDateTime,
) -> anyhow::Result<SyncOutcome> {
    let mut booking = queries::get_booking_by_id(conn, booking_id)?
        .ok_or_else(|| anyhow::anyhow!("booking {booking_id} disappeared during payment"))?;
    let mut payment = queries::get_payment(conn, payment_id)?
        .ok_or_else(|| anyhow::anyhow!("payment {payment_id} disappeared during payment"))?;

    let intent_id = result.payment_intent_id.as_deref();
    let charge_id = result.transaction_reference.as_deref();
    ledger::merge_payment_references(&mut payment, intent_id, charge_id);

    let mut published = vec![];
    let initiation = match result.status {
        GatewayStatus::Success => {
            let next = if result.authorized_only {
                AttemptStatus::Authorized
            } else {
                AttemptStatus::Captured
            };
            let newly_successful = !payment.status.is_successful();
            let moved = ledger::advance_payment(&mut payment, next);
            queries::update_payment(conn, &payment)?;

            let reference = charge_id.or(intent_id);
            let outcome =
                ledger::mark_successful(&mut booking.ledger, GATEWAY_STRIPE, reference, intent_id, now);
            if let LedgerOutcome::Rejected { from, .. } = outcome {
                if newly_successful && moved {
                    published.push(flag_unreconciled_capture(
                        conn,
                        audit,
                        &booking,
                        &payment,
                        CAPTURED_ON_TERMINAL_BOOKING,
                    )?);
                }
                return Ok((
                    Err(PaymentError::Processing(format!(
                        "payment {} was captured but booking {} is {}",
                        payment.identifier,
                        booking.code,
                        from.as_str()
                    ))),
                    published,
                ));
            }
            if outcome.changed() {
                anyhow::ensure!(
                    queries::save_booking(conn, &mut booking)?,
                    "booking {} was modified concurrently",
                    booking.code
                );
            }
            if outcome.is_transition() {
                published.push(events::record(
                    conn,
                    &booking.code,
                    PaymentEventKind::PaymentCaptured,
                    booking.ledger.reference.as_deref(),
                    Some(payment.amount),
                )?);
            }
            Ok(PaymentInitiationResult::Confirmed)
        }
        GatewayStatus::RedirectRequired => match result.redirect_url.as_deref() {
            Some(url) => {
                ledger::advance_payment(&mut payment, AttemptStatus::PendingAuthorization);
                queries::update_payment(conn, &payment)?;
                if let Some(id) = intent_id {
                    if ledger::record_intent_id(&mut booking.ledger, id) {
                        anyhow::ensure!(
                            queries::save_booking(conn, &mut booking)?,
                            "booking {} was modified concurrently",
                            booking.code
                        );
                    }
                }
                Ok(PaymentInitiationResult::Redirect { url: url.to_string() })
            }
            None => {
                let message = "gateway asked for a redirect without a URL".to_string();
                fail_attempt(conn, &mut booking, &mut payment, &message, now, &mut published)?;
                Err(PaymentError::Processing(message))
            }
        },
        GatewayStatus::Error => {
            let message = result
                .error_message
                .clone()
                .unwrap_or_else(|| "Unknown gateway error".to_string());
            fail_attempt(conn, &mut booking, &mut payment, &message, now, &mut published)?;
            Err(PaymentError::Gateway(format!("Payment failed: {message}")))
        }
    };

    Ok((initiation, published))
}

fn fail_attempt(
    conn: &Connection,
    booking: &mut Booking,
    payment: &mut Payment,
    message: &str,
    now: NaiveDateTime,
    published: &mut Vec<PaymentEvent>,
) -> anyhow::Result<()> {
    if ledger::advance_payment(payment, AttemptStatus::Failed) {
        payment.error_message = Some(message.to_string());
    }
    queries::update_payment(conn, payment)?;

    let reference = payment.payment_intent_id.clone();
    let outcome = ledger::mark_failed(&mut booking.ledger, reference.as_deref(), message, now);
    if outcome.changed() {
        anyhow::ensure!(
            queries::save_booking(conn, booking)?,
            "booking {} was modified concurrently",
            booking.code
        );
    }
    if outcome.is_transition() {
        published.push(events::record(
            conn,
            &booking.code,
            PaymentEventKind::PaymentFailed,
            reference.as_deref(),
            Some(payment.amount),
        )?);
    }
    Ok(())
}

pub(crate) const CAPTURED_ON_TERMINAL_BOOKING: &str = "payment.captured_on_terminal_booking";
pub(crate) const CAPTURED_ON_COVERED_BOOKING: &str = "payment.captured_on_covered_booking";

/// Records money the gateway took that the booking ledger does not account for.
/// The capture stays on the payment row; staff reconcile it from the review event.
pub(crate) fn flag_unreconciled_capture(
    conn: &Connection,
    audit: &AuditLog,
    booking: &Booking,
    payment: &Payment,
    stage: &str,
) -> anyhow::Result<PaymentEvent> {
    tracing::error!(
        booking_code = %booking.code,
        payment_id = payment.id,
        ledger_status = booking.ledger.status.as_str(),
        stage,
        "captured payment needs review"
    );
    audit.error(
        stage,
        json!({
            "booking_code": booking.code,
            "payment_identifier": payment.identifier,
            "payment_intent_id": payment.payment_intent_id,
            "amount": amount::format_money(payment.amount),
            "ledger_status": booking.ledger.status.as_str(),
        }),
    );
    events::record(
        conn,
        &booking.code,
        PaymentEventKind::PaymentNeedsReview,
        payment.payment_intent_id.as_deref(),
        Some(payment.amount),
    )
}

/// True when successful attempts other than `payment` already cover the booking total.
pub(crate) fn capture_is_surplus(
    conn: &Connection,
    booking: &Booking,
    payment: &Payment,
) -> anyhow::Result<bool> {
    let selections = queries::get_selections(conn, booking.id)?;
    let total = amount::total_price(&selections, booking.legacy_total);
    let others: Vec<Payment> = queries::get_payments_for_booking(conn, booking.id)?
        .into_iter()
        .filter(|p| p.id != payment.id)
        .collect();
    let covered = amount::captured_total(&others);
    Ok(covered > Decimal::ZERO && covered >= total)
}

#[derive(Debug)]
pub struct RedirectCompletion {
    pub booking_code: String,
    pub outcome: Result<PaymentInitiationResult, PaymentError>,
}

/// Customer returned from a 3-D Secure challenge. Fetches the intent and applies the
/// same handling as a synchronous answer; a webhook may already have done so.
pub async fn complete_redirect(
    state: &AppState,
    payment_intent_id: &str,
) -> Result<Option<RedirectCompletion>, PaymentError> {
    let found = {
        let conn = state.conn();
        match queries::get_payment_by_intent_id(&conn, payment_intent_id).map_err(unexpected)? {
            Some(payment) => queries::get_booking_by_id(&conn, payment.booking_id)
                .map_err(unexpected)?
                .map(|booking| (payment, booking)),
            None => None,
        }
    };
    let Some((payment, booking)) = found else {
        return Ok(None);
    };

    let timeout = Duration::from_secs(state.config.gateway_timeout_secs);
    let result = match tokio::time::timeout(timeout, state.gateway.retrieve(payment_intent_id)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => return Err(PaymentError::Gateway(format!("{e:#}"))),
        Err(_) => return Err(PaymentError::Gateway("gateway did not respond".to_string())),
    };

    let outcome = handle_synchronous_result(state, booking.id, payment.id, result).await;
    Ok(Some(RedirectCompletion {
        booking_code: booking.code,
        outcome,
    }))
}
