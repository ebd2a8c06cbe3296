//! Removal of bookings orphaned by a failed or abandoned payment.
//!
//! The payment-lookup and session strategies match on contact details only. Two
//! customers sharing an email and phone (or email and tour) inside the lookup
//! window can be confused; the deletion gate below is what keeps that safe.

use chrono::{Duration, NaiveDateTime};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;

use crate::config::AppConfig;
use crate::db::queries;
use crate::models::{Booking, PaymentEvent, PaymentEventKind, PaymentStatus, GATEWAY_STRIPE};
use crate::services::events;
use crate::state::AppState;

const PAYMENT_LOOKUP_LIMIT: i64 = 10;

/// Contact details the booking form kept for the current visitor.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct SessionIdentity {
    pub email: String,
    #[serde(default)]
    pub phone: String,
    pub tour_id: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct IdentificationContext {
    pub booking_code: Option<String>,
    pub session: Option<SessionIdentity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentificationMethod {
    ExplicitCode,
    PaymentLookup,
    SessionData,
    None,
}

impl IdentificationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentificationMethod::ExplicitCode => "explicit_code",
            IdentificationMethod::PaymentLookup => "payment_lookup",
            IdentificationMethod::SessionData => "session_data",
            IdentificationMethod::None => "none",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DeletionBlock {
    SuccessfulPayment,
    MarkedPaid,
    TooOld { age_minutes: i64 },
    AlreadyCancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CleanupResult {
    Deleted { payments_deleted: usize },
    Blocked(DeletionBlock),
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupOutcome {
    pub method: IdentificationMethod,
    pub booking_code: Option<String>,
    #[serde(flatten)]
    pub result: CleanupResult,
}

fn contact_matches(booking: &Booking, session: &SessionIdentity) -> bool {
    !session.email.is_empty()
        && booking.contact.email == session.email
        && booking.contact.phone == session.phone
}

/// Finds the booking a failure report refers to.
pub fn identify_booking(
    conn: &Connection,
    ctx: &IdentificationContext,
    config: &AppConfig,
    now: NaiveDateTime,
) -> anyhow::Result<Option<(Booking, IdentificationMethod)>> {
    if let Some(code) = ctx.booking_code.as_deref().filter(|c| !c.is_empty()) {
        if let Some(booking) = queries::get_booking_by_code(conn, code)? {
            return Ok(Some((booking, IdentificationMethod::ExplicitCode)));
        }
        tracing::info!(booking_code = %code, "failure report names an unknown booking");
    }

    let Some(session) = ctx.session.as_ref() else {
        return Ok(None);
    };

    let since = now - Duration::minutes(config.payment_lookup_window_minutes);
    let payments = queries::recent_open_payments(conn, GATEWAY_STRIPE, &since, PAYMENT_LOOKUP_LIMIT)?;
    for payment in payments {
        if let Some(booking) = queries::get_booking_by_id(conn, payment.booking_id)? {
            if contact_matches(&booking, session) {
                return Ok(Some((booking, IdentificationMethod::PaymentLookup)));
            }
        }
    }

    if let Some(tour_id) = session.tour_id.filter(|_| !session.email.is_empty()) {
        let since = now - Duration::minutes(config.session_lookup_window_minutes);
        let bookings =
            queries::find_recent_bookings_by_email_and_tour(conn, &session.email, tour_id, &since)?;
        if let Some(booking) = bookings.into_iter().next() {
            return Ok(Some((booking, IdentificationMethod::SessionData)));
        }
    }

    Ok(None)
}

/// Deletion gate. `None` means the booking may be removed.
pub fn deletion_block(
    conn: &Connection,
    booking: &Booking,
    max_age_minutes: i64,
    now: NaiveDateTime,
) -> anyhow::Result<Option<DeletionBlock>> {
    let payments = queries::get_payments_for_booking(conn, booking.id)?;
    if payments.iter().any(|p| p.status.is_successful()) {
        return Ok(Some(DeletionBlock::SuccessfulPayment));
    }
    if matches!(booking.ledger.status, PaymentStatus::Paid | PaymentStatus::Refunded) {
        return Ok(Some(DeletionBlock::MarkedPaid));
    }
    let age = now - booking.created_at;
    if age.num_seconds() > max_age_minutes * 60 {
        return Ok(Some(DeletionBlock::TooOld {
            age_minutes: age.num_minutes(),
        }));
    }
    if booking.cancelled {
        return Ok(Some(DeletionBlock::AlreadyCancelled));
    }
    Ok(None)
}

/// Identifies, checks, and deletes in one transaction. Returns the outcome and the
/// `booking_deleted` event to publish, if any.
pub fn cleanup_in_transaction(
    conn: &Connection,
    ctx: &IdentificationContext,
    config: &AppConfig,
    now: NaiveDateTime,
) -> anyhow::Result<(CleanupOutcome, Option<PaymentEvent>)> {
    let tx = conn.unchecked_transaction()?;

    let Some((booking, method)) = identify_booking(&tx, ctx, config, now)? else {
        return Ok((
            CleanupOutcome {
                method: IdentificationMethod::None,
                booking_code: None,
                result: CleanupResult::NotFound,
            },
            None,
        ));
    };

    if let Some(block) = deletion_block(&tx, &booking, config.orphan_booking_max_age_minutes, now)? {
        return Ok((
            CleanupOutcome {
                method,
                booking_code: Some(booking.code),
                result: CleanupResult::Blocked(block),
            },
            None,
        ));
    }

    let payments_deleted = queries::delete_unsettled_payments(&tx, booking.id)?;
    queries::replace_selections(&tx, booking.id, &[])?;
    queries::delete_booking(&tx, booking.id)?;
    let event = events::record(&tx, &booking.code, PaymentEventKind::BookingDeleted, None, None)?;
    tx.commit()?;

    Ok((
        CleanupOutcome {
            method,
            booking_code: Some(booking.code),
            result: CleanupResult::Deleted { payments_deleted },
        },
        Some(event),
    ))
}

pub async fn attempt_cleanup_on_failure(
    state: &AppState,
    ctx: IdentificationContext,
    now: NaiveDateTime,
) -> anyhow::Result<CleanupOutcome> {
    let (outcome, event) = {
        let conn = state.conn();
        cleanup_in_transaction(&conn, &ctx, &state.config, now)?
    };

    match &outcome.result {
        CleanupResult::Deleted { payments_deleted } => tracing::info!(
            booking_code = outcome.booking_code.as_deref().unwrap_or(""),
            method = outcome.method.as_str(),
            payments_deleted,
            "deleted orphaned booking"
        ),
        CleanupResult::Blocked(block) => tracing::warn!(
            booking_code = outcome.booking_code.as_deref().unwrap_or(""),
            method = outcome.method.as_str(),
            block = ?block,
            "orphaned booking kept"
        ),
        CleanupResult::NotFound => tracing::info!("no booking identified for failed payment"),
    }
    state.audit.info(
        "payment.failure_cleanup",
        json!({
            "method": outcome.method.as_str(),
            "booking_code": outcome.booking_code,
            "outcome": outcome,
        }),
    );

    if let Some(event) = event {
        events::publish(state, vec![event]).await;
    }

    Ok(outcome)
}
