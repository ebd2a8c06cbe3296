use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;

use crate::db::queries;
use crate::errors::{AppError, PaymentError};
use crate::models::ticket_type::guest_counts;
use crate::models::{Booking, Contact, PaymentEventKind, PaymentStatus, TicketSelection, TicketType};
use crate::services::amount::ActingUser;
use crate::services::cleanup::{self, IdentificationContext};
use crate::services::ledger::{self, LedgerOutcome};
use crate::services::events;
use crate::services::payments::{self, PaymentDetails, PaymentInitiationResult};
use crate::state::AppState;

#[derive(Debug, Clone, Copy)]
pub struct TicketQuantity {
    pub ticket_type_id: i64,
    pub quantity: i32,
}

#[derive(Debug, Serialize)]
pub struct BookingOutcome {
    pub booking: Booking,
    pub amount_charged: Decimal,
    pub payment: PaymentInitiationResult,
}

fn validation(message: impl Into<String>) -> AppError {
    AppError::Validation(message.into())
}

pub fn validate_contact(contact: &Contact) -> Result<(), AppError> {
    let email = contact.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(validation("Please enter a valid email address."));
    }
    Ok(())
}

/// Resolves requested quantities against active ticket types, capturing their current
/// prices.
pub fn build_selections(
    conn: &Connection,
    tickets: &[TicketQuantity],
) -> Result<Vec<TicketSelection>, AppError> {
    let mut quantities: BTreeMap<i64, i32> = BTreeMap::new();
    for ticket in tickets {
        if ticket.quantity < 0 {
            return Err(validation("Ticket quantities cannot be negative."));
        }
        *quantities.entry(ticket.ticket_type_id).or_default() += ticket.quantity;
    }

    let mut selections = vec![];
    for (ticket_type_id, quantity) in quantities.into_iter().filter(|(_, q)| *q > 0) {
        let ticket_type = queries::get_ticket_type(conn, ticket_type_id)?
            .filter(|t| t.active)
            .ok_or_else(|| validation(format!("Ticket type {ticket_type_id} is not available.")))?;
        selections.push(TicketSelection::from_ticket_type(&ticket_type, quantity));
    }

    let (total, kids) = guest_counts(&selections);
    if total == 0 {
        return Err(validation("Please select at least one ticket."));
    }
    if kids > 0 && total == kids {
        return Err(validation("Children must be with an adult."));
    }
    Ok(selections)
}

fn apply_guest_counts(booking: &mut Booking, selections: &[TicketSelection]) {
    let (total, kids) = guest_counts(selections);
    if !booking.total_guests_admin_override {
        booking.total_guests = total;
    }
    booking.number_of_children = kids;
}

/// Checks what can be checked before anything is written, so a rejected
/// submission never leaves a booking behind.
fn prevalidate_payment(owed: Decimal, details: &PaymentDetails, currency: &str) -> Result<(), PaymentError> {
    payments::validate_submitted_amount(owed, details.submitted_amount)?;
    payments::validate_currency(currency, details.currency.as_deref())?;
    if owed > Decimal::ZERO && details.token.as_deref().map_or(true, |t| t.trim().is_empty()) {
        return Err(PaymentError::Validation(
            "Please enter your payment details to complete the booking.".to_string(),
        ));
    }
    Ok(())
}

fn reload(state: &AppState, id: i64) -> Result<Booking, AppError> {
    let conn = state.conn();
    queries::get_booking_by_id(&conn, id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {id}")))
}

pub async fn create_booking(
    state: &AppState,
    tour_id: i64,
    contact: Contact,
    tickets: &[TicketQuantity],
    details: PaymentDetails,
    acting_user: Option<&ActingUser>,
) -> Result<BookingOutcome, AppError> {
    if tour_id <= 0 {
        return Err(validation("Please choose a tour."));
    }
    validate_contact(&contact)?;

    let now = Utc::now().naive_utc();
    let (booking, owed, settled) = {
        let conn = state.conn();
        let selections = build_selections(&conn, tickets)?;

        let mut booking = Booking::new(tour_id, contact, now);
        apply_guest_counts(&mut booking, &selections);
        let owed = payments::compute_owed_amount(&conn, &booking, &selections, acting_user, &state.config)?;
        prevalidate_payment(owed, &details, &state.config.currency)?;

        let tx = conn.unchecked_transaction()?;
        booking.id = queries::insert_booking(&tx, &booking)?;
        queries::replace_selections(&tx, booking.id, &selections)?;
        let settled = if owed <= Decimal::ZERO {
            payments::settle_without_payment(&tx, &mut booking, acting_user, &state.config, now)?
        } else {
            None
        };
        tx.commit()?;
        (booking, owed, settled)
    };

    tracing::info!(
        booking_code = %booking.code,
        tour_id,
        total_guests = booking.total_guests,
        owed = %owed,
        "booking created"
    );
    state.audit.info(
        "booking.saved",
        json!({ "booking_code": booking.code, "owed": owed.to_string() }),
    );

    if let Some(event) = settled {
        events::publish(state, vec![event]).await;
        return Ok(BookingOutcome {
            booking,
            amount_charged: Decimal::ZERO,
            payment: PaymentInitiationResult::NotRequired,
        });
    }

    match payments::begin_payment(state, &booking, owed, &details).await {
        Ok(payment) => {
            let booking = reload(state, booking.id)?;
            Ok(BookingOutcome {
                booking,
                amount_charged: owed,
                payment,
            })
        }
        Err(e) => {
            tracing::warn!(booking_code = %booking.code, error = %e, "payment failed for new booking");
            let ctx = IdentificationContext {
                booking_code: Some(booking.code.clone()),
                session: None,
            };
            if let Err(cleanup_err) =
                cleanup::attempt_cleanup_on_failure(state, ctx, Utc::now().naive_utc()).await
            {
                tracing::error!(error = %cleanup_err, booking_code = %booking.code, "cleanup after failed payment errored");
            }
            Err(AppError::Payment(e))
        }
    }
}

/// Replaces a booking's ticket selections and charges any difference. The booking is
/// only changed once the payment step has succeeded, been skipped, or redirected.
pub async fn update_booking(
    state: &AppState,
    code: &str,
    contact: Option<Contact>,
    tickets: &[TicketQuantity],
    details: PaymentDetails,
    acting_user: Option<&ActingUser>,
) -> Result<BookingOutcome, AppError> {
    if let Some(contact) = contact.as_ref() {
        validate_contact(contact)?;
    }

    let (booking, selections, owed) = {
        let conn = state.conn();
        let booking = queries::get_booking_by_code(&conn, code)?
            .ok_or_else(|| AppError::NotFound(format!("booking {code}")))?;
        if booking.cancelled {
            return Err(validation("This booking has been cancelled."));
        }
        let attempts = queries::get_payments_for_booking(&conn, booking.id)?;
        if attempts.iter().any(|p| p.status.is_open()) {
            return Err(validation(
                "A payment for this booking is still being processed. Please finish it before changing the booking.",
            ));
        }
        let selections = build_selections(&conn, tickets)?;
        let owed = payments::compute_owed_amount(&conn, &booking, &selections, acting_user, &state.config)?;
        if owed > Decimal::ZERO
            && !matches!(booking.ledger.status, PaymentStatus::Pending | PaymentStatus::Paid)
        {
            return Err(validation(
                "This booking can no longer take payments. Please contact us to change it.",
            ));
        }
        (booking, selections, owed)
    };
    prevalidate_payment(owed, &details, &state.config.currency)?;

    let payment = if owed > Decimal::ZERO {
        payments::begin_payment(state, &booking, owed, &details).await?
    } else {
        PaymentInitiationResult::NotRequired
    };

    let now = Utc::now().naive_utc();
    let (booking, settled) = {
        let conn = state.conn();
        let tx = conn.unchecked_transaction()?;
        let mut current = queries::get_booking_by_id(&tx, booking.id)?
            .ok_or_else(|| AppError::NotFound(format!("booking {code}")))?;
        if let Some(contact) = contact {
            current.contact = contact;
        }
        apply_guest_counts(&mut current, &selections);
        if !queries::save_booking(&tx, &mut current)? {
            return Err(AppError::Conflict);
        }
        queries::replace_selections(&tx, current.id, &selections)?;

        let settled = if payment == PaymentInitiationResult::NotRequired
            && current.ledger.status != PaymentStatus::Paid
        {
            payments::settle_without_payment(&tx, &mut current, acting_user, &state.config, now)?
        } else {
            None
        };
        tx.commit()?;
        (current, settled)
    };

    if let Some(event) = settled {
        events::publish(state, vec![event]).await;
    }

    tracing::info!(booking_code = %booking.code, owed = %owed, "booking updated");
    Ok(BookingOutcome {
        booking,
        amount_charged: owed.max(Decimal::ZERO),
        payment,
    })
}

pub fn create_ticket_type(
    state: &AppState,
    name: &str,
    price: Decimal,
    spots_adults: i32,
    spots_kids: i32,
) -> Result<TicketType, AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(validation("Ticket type name is required."));
    }
    if price < Decimal::ZERO {
        return Err(validation("Ticket price cannot be negative."));
    }
    if spots_adults < 0 || spots_kids < 0 || spots_adults + spots_kids < 1 {
        return Err(validation("A ticket must cover at least one spot."));
    }

    let mut ticket_type = TicketType {
        id: 0,
        name: name.to_string(),
        price: price.round_dp(2),
        currency: state.config.currency.clone(),
        spots_adults,
        spots_kids,
        active: true,
        created_at: Utc::now().naive_utc(),
    };
    let conn = state.conn();
    ticket_type.id = queries::create_ticket_type(&conn, &ticket_type)?;
    Ok(ticket_type)
}

pub async fn cancel_booking(state: &AppState, code: &str) -> Result<Booking, AppError> {
    let now = Utc::now().naive_utc();
    let (booking, published) = {
        let conn = state.conn();
        let tx = conn.unchecked_transaction()?;
        let mut booking = queries::get_booking_by_code(&tx, code)?
            .ok_or_else(|| AppError::NotFound(format!("booking {code}")))?;

        let outcome = ledger::mark_cancelled(&mut booking.ledger, now);
        booking.cancelled = true;
        if !queries::save_booking(&tx, &mut booking)? {
            return Err(AppError::Conflict);
        }
        let mut published = vec![];
        if outcome.is_transition() {
            published.push(events::record(&tx, &booking.code, PaymentEventKind::PaymentCancelled, None, None)?);
        }
        tx.commit()?;
        (booking, published)
    };

    tracing::info!(booking_code = %booking.code, status = booking.ledger.status.as_str(), "booking cancelled");
    events::publish(state, published).await;
    Ok(booking)
}

pub async fn record_refund(
    state: &AppState,
    code: &str,
    amount: Option<Decimal>,
    reference: Option<&str>,
) -> Result<Booking, AppError> {
    let now = Utc::now().naive_utc();
    let (booking, published) = {
        let conn = state.conn();
        let tx = conn.unchecked_transaction()?;
        let mut booking = queries::get_booking_by_code(&tx, code)?
            .ok_or_else(|| AppError::NotFound(format!("booking {code}")))?;

        let outcome = ledger::mark_refunded(&mut booking.ledger, reference, amount, now);
        if let LedgerOutcome::Rejected { .. } = outcome {
            return Err(validation("Only paid bookings can be refunded."));
        }
        let mut published = vec![];
        if outcome.changed() && !queries::save_booking(&tx, &mut booking)? {
            return Err(AppError::Conflict);
        }
        if outcome.is_transition() {
            published.push(events::record(
                &tx,
                &booking.code,
                PaymentEventKind::PaymentRefunded,
                booking.ledger.reference.as_deref(),
                amount,
            )?);
        }
        tx.commit()?;
        (booking, published)
    };

    tracing::info!(booking_code = %booking.code, "refund recorded");
    events::publish(state, published).await;
    Ok(booking)
}
