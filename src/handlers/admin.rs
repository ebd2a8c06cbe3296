use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Booking, Payment, PaymentEvent, TicketSelection};
use crate::services::bookings;
use crate::state::AppState;

use super::check_auth;

fn app_error(e: impl Into<AppError>) -> Response {
    e.into().into_response()
}

// GET /api/admin/bookings
#[derive(Deserialize)]
pub struct BookingsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

pub async fn get_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<BookingsQuery>,
) -> Result<Json<Vec<Booking>>, Response> {
    check_auth(&headers, &state.config.admin_token)?;

    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let status_filter = query.status.as_deref().filter(|s| !s.is_empty());

    let bookings = {
        let conn = state.conn();
        queries::list_bookings(&conn, status_filter, limit).map_err(app_error)?
    };

    Ok(Json(bookings))
}

// GET /api/admin/bookings/:code
#[derive(Serialize)]
pub struct BookingDetailResponse {
    booking: Booking,
    payment_status_label: &'static str,
    tickets: Vec<TicketSelection>,
    payments: Vec<Payment>,
    events: Vec<PaymentEvent>,
}

pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Result<Json<BookingDetailResponse>, Response> {
    check_auth(&headers, &state.config.admin_token)?;

    let conn = state.conn();
    let booking = queries::get_booking_by_code(&conn, &code)
        .map_err(app_error)?
        .ok_or_else(|| app_error(AppError::NotFound(format!("booking {code}"))))?;
    let tickets = queries::get_selections(&conn, booking.id).map_err(app_error)?;
    let payments = queries::get_payments_for_booking(&conn, booking.id).map_err(app_error)?;
    let events = queries::get_payment_events_for_booking(&conn, &booking.code).map_err(app_error)?;

    Ok(Json(BookingDetailResponse {
        payment_status_label: booking.ledger.status_label(),
        booking,
        tickets,
        payments,
        events,
    }))
}

// POST /api/admin/bookings/:code/cancel
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Result<Json<Booking>, Response> {
    check_auth(&headers, &state.config.admin_token)?;

    let booking = bookings::cancel_booking(&state, &code).await.map_err(app_error)?;
    Ok(Json(booking))
}

// POST /api/admin/bookings/:code/refund
#[derive(Deserialize, Default)]
pub struct RefundRequest {
    pub amount: Option<Decimal>,
    pub reference: Option<String>,
}

pub async fn refund_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(code): Path<String>,
    body: Option<Json<RefundRequest>>,
) -> Result<Json<Booking>, Response> {
    check_auth(&headers, &state.config.admin_token)?;

    let body = body.map(|Json(b)| b).unwrap_or_default();
    if body.amount.is_some_and(|a| a <= Decimal::ZERO) {
        return Err(app_error(AppError::Validation(
            "Refund amount must be positive.".to_string(),
        )));
    }
    let reference = body.reference.as_deref().map(str::trim).filter(|r| !r.is_empty());

    let booking = bookings::record_refund(&state, &code, body.amount, reference)
        .await
        .map_err(app_error)?;
    Ok(Json(booking))
}

// POST /api/admin/ticket-types
#[derive(Deserialize)]
pub struct CreateTicketTypeRequest {
    pub name: String,
    pub price: Decimal,
    #[serde(default = "default_adult_spots")]
    pub spots_adults: i32,
    #[serde(default)]
    pub spots_kids: i32,
}

fn default_adult_spots() -> i32 {
    1
}

pub async fn create_ticket_type(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateTicketTypeRequest>,
) -> Result<Response, Response> {
    check_auth(&headers, &state.config.admin_token)?;

    let ticket_type = bookings::create_ticket_type(
        &state,
        &body.name,
        body.price,
        body.spots_adults,
        body.spots_kids,
    )
    .map_err(app_error)?;

    tracing::info!(ticket_type_id = ticket_type.id, name = %ticket_type.name, "ticket type created");
    Ok((StatusCode::CREATED, Json(ticket_type)).into_response())
}
