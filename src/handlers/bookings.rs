use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::{AppError, PaymentError};
use crate::models::ticket_type::summary;
use crate::models::{Booking, Contact, TicketSelection};
use crate::services::amount;
use crate::services::bookings::{self, BookingOutcome, TicketQuantity};
use crate::services::payments::{self, PaymentDetails, PaymentInitiationResult};
use crate::state::AppState;

use super::acting_user;

#[derive(Serialize)]
pub struct TicketTypeResponse {
    id: i64,
    name: String,
    price: Decimal,
    price_formatted: String,
    currency: String,
    spots_adults: i32,
    spots_kids: i32,
}

// GET /api/ticket-types
pub async fn list_ticket_types(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<TicketTypeResponse>>, AppError> {
    let ticket_types = {
        let conn = state.conn();
        queries::list_active_ticket_types(&conn)?
    };

    let response = ticket_types
        .into_iter()
        .map(|t| TicketTypeResponse {
            price_formatted: t.price_formatted(),
            id: t.id,
            name: t.name,
            price: t.price,
            currency: t.currency,
            spots_adults: t.spots_adults,
            spots_kids: t.spots_kids,
        })
        .collect();
    Ok(Json(response))
}

#[derive(Deserialize)]
pub struct TicketRequest {
    pub ticket_type_id: i64,
    pub quantity: i32,
}

#[derive(Deserialize, Default)]
pub struct PaymentRequest {
    pub token: Option<String>,
    pub currency: Option<String>,
    pub amount: Option<Decimal>,
}

impl From<PaymentRequest> for PaymentDetails {
    fn from(p: PaymentRequest) -> Self {
        PaymentDetails {
            token: p.token,
            currency: p.currency,
            submitted_amount: p.amount,
        }
    }
}

fn quantities(tickets: &[TicketRequest]) -> Vec<TicketQuantity> {
    tickets
        .iter()
        .map(|t| TicketQuantity {
            ticket_type_id: t.ticket_type_id,
            quantity: t.quantity,
        })
        .collect()
}

#[derive(Serialize)]
pub struct BookingStatusResponse {
    booking_code: String,
    tour_id: i64,
    first_name: String,
    surname: String,
    total_guests: i32,
    number_of_children: i32,
    cancelled: bool,
    payment_status: String,
    payment_status_label: String,
    confirmed: bool,
    total: Decimal,
    amount_owed: Decimal,
    paid_at: Option<String>,
    tickets: Vec<TicketSelection>,
    summary: String,
}

fn status_response(conn: &Connection, booking: &Booking) -> anyhow::Result<BookingStatusResponse> {
    let selections = queries::get_selections(conn, booking.id)?;
    let payments = queries::get_payments_for_booking(conn, booking.id)?;
    let owed = amount::amount_owed(booking, &selections, &payments, false);

    Ok(BookingStatusResponse {
        booking_code: booking.code.clone(),
        tour_id: booking.tour_id,
        first_name: booking.contact.first_name.clone(),
        surname: booking.contact.surname.clone(),
        total_guests: booking.total_guests,
        number_of_children: booking.number_of_children,
        cancelled: booking.cancelled,
        payment_status: booking.ledger.status.as_str().to_string(),
        payment_status_label: booking.ledger.status_label().to_string(),
        confirmed: amount::is_confirmed(booking.ledger.status, owed),
        total: amount::total_price(&selections, booking.legacy_total),
        amount_owed: owed,
        paid_at: booking.ledger.paid_at.map(|t| queries::format_ts(&t)),
        summary: summary(&selections),
        tickets: selections,
    })
}

fn booking_response(state: &AppState, outcome: BookingOutcome, created: bool) -> Result<Response, AppError> {
    let booking = {
        let conn = state.conn();
        status_response(&conn, &outcome.booking)?
    };

    let (status, redirect_url) = match &outcome.payment {
        PaymentInitiationResult::Redirect { url } => (StatusCode::ACCEPTED, Some(url.clone())),
        _ if created => (StatusCode::CREATED, None),
        _ => (StatusCode::OK, None),
    };

    let body = serde_json::json!({
        "booking": booking,
        "payment": outcome.payment,
        "amount_charged": outcome.amount_charged,
        "redirect_url": redirect_url,
    });
    Ok((status, Json(body)).into_response())
}

// POST /api/bookings
#[derive(Deserialize)]
pub struct CreateBookingRequest {
    pub tour_id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub surname: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    pub tickets: Vec<TicketRequest>,
    #[serde(default)]
    pub payment: PaymentRequest,
}

pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateBookingRequest>,
) -> Result<Response, AppError> {
    let staff = acting_user(&headers, &state.config.admin_token);
    let contact = Contact {
        first_name: body.first_name.trim().to_string(),
        surname: body.surname.trim().to_string(),
        email: body.email.trim().to_string(),
        phone: body.phone.trim().to_string(),
    };

    let outcome = bookings::create_booking(
        &state,
        body.tour_id,
        contact,
        &quantities(&body.tickets),
        body.payment.into(),
        staff.as_ref(),
    )
    .await?;

    booking_response(&state, outcome, true)
}

// GET /api/bookings/:code
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<BookingStatusResponse>, AppError> {
    let conn = state.conn();
    let booking = queries::get_booking_by_code(&conn, &code)?
        .ok_or_else(|| AppError::NotFound(format!("booking {code}")))?;
    Ok(Json(status_response(&conn, &booking)?))
}

// PUT /api/bookings/:code
#[derive(Deserialize)]
pub struct UpdateBookingRequest {
    pub contact: Option<Contact>,
    pub tickets: Vec<TicketRequest>,
    #[serde(default)]
    pub payment: PaymentRequest,
}

pub async fn update_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(code): Path<String>,
    Json(body): Json<UpdateBookingRequest>,
) -> Result<Response, AppError> {
    let staff = acting_user(&headers, &state.config.admin_token);

    let outcome = bookings::update_booking(
        &state,
        &code,
        body.contact,
        &quantities(&body.tickets),
        body.payment.into(),
        staff.as_ref(),
    )
    .await?;

    booking_response(&state, outcome, false)
}

// POST /api/bookings/:code/validate-amount
#[derive(Deserialize)]
pub struct ValidateAmountRequest {
    pub amount: Decimal,
}

pub async fn validate_amount(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(code): Path<String>,
    Json(body): Json<ValidateAmountRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let staff = acting_user(&headers, &state.config.admin_token);

    let owed = {
        let conn = state.conn();
        let booking = queries::get_booking_by_code(&conn, &code)?
            .ok_or_else(|| AppError::NotFound(format!("booking {code}")))?;
        let selections = queries::get_selections(&conn, booking.id)?;
        payments::compute_owed_amount(&conn, &booking, &selections, staff.as_ref(), &state.config)?
    };

    payments::validate_submitted_amount(owed, Some(body.amount)).map_err(|e: PaymentError| {
        tracing::warn!(booking_code = %code, submitted = %body.amount, expected = %owed, "submitted amount mismatch");
        AppError::Payment(e)
    })?;

    Ok(Json(serde_json::json!({
        "valid": true,
        "amount_owed": amount::format_money(owed),
    })))
}
