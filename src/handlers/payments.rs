use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::PaymentEvent;
use crate::services::cleanup::{self, IdentificationContext, SessionIdentity};
use crate::services::payments;
use crate::state::AppState;

// GET /api/payments/config
#[derive(Serialize)]
pub struct ClientConfig {
    pub publishable_key: String,
    pub currency: String,
}

/// Values the checkout page needs to tokenize a card.
pub async fn client_config(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ClientConfig>, AppError> {
    if state.config.stripe_publishable_key.is_empty() {
        return Err(AppError::NotFound("card payments are not configured".to_string()));
    }
    Ok(Json(ClientConfig {
        publishable_key: state.config.stripe_publishable_key.clone(),
        currency: state.config.currency.clone(),
    }))
}

// GET /api/payments/complete?payment_intent=
#[derive(Deserialize)]
pub struct CompleteQuery {
    pub payment_intent: Option<String>,
}

pub async fn complete_payment(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CompleteQuery>,
) -> Result<Response, AppError> {
    let intent_id = query
        .payment_intent
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::Validation("payment_intent is required".to_string()))?;

    let completion = payments::complete_redirect(&state, &intent_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("payment {intent_id}")))?;

    let response = match completion.outcome {
        Ok(result) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "booking_code": completion.booking_code,
                "payment": result,
            })),
        ),
        Err(e) => (
            e.status_code(),
            Json(serde_json::json!({
                "booking_code": completion.booking_code,
                "error": e.user_message(),
            })),
        ),
    };
    Ok(response.into_response())
}

// POST /api/payments/failure
#[derive(Deserialize)]
pub struct FailureReport {
    pub booking_code: Option<String>,
    pub session: Option<SessionIdentity>,
}

pub async fn payment_failure(
    State(state): State<Arc<AppState>>,
    Json(body): Json<FailureReport>,
) -> Result<Json<cleanup::CleanupOutcome>, AppError> {
    let ctx = IdentificationContext {
        booking_code: body.booking_code,
        session: body.session,
    };
    let outcome = cleanup::attempt_cleanup_on_failure(&state, ctx, Utc::now().naive_utc()).await?;
    Ok(Json(outcome))
}

// GET /api/payments/events (SSE stream)
#[derive(Deserialize)]
pub struct SseQuery {
    pub token: Option<String>,
    pub last_id: Option<i64>,
}

fn sse_event(event: &PaymentEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_default();
    Event::default()
        .id(event.id.to_string())
        .data(data)
        .event("payment_event")
}

pub async fn events_stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SseQuery>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, Response> {
    // EventSource can't set headers
    let token = query.token.as_deref().unwrap_or("");
    if state.config.admin_token.is_empty() || token != state.config.admin_token {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "unauthorized"})),
        )
            .into_response());
    }

    let last_id = query.last_id.unwrap_or(0);

    // Subscribe first so nothing committed after the catch-up query is missed.
    let rx = state.events_tx.subscribe();
    let catchup_events = {
        let conn = state.conn();
        queries::get_payment_events_since(&conn, last_id).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load payment events for catch-up");
            vec![]
        })
    };
    let newest_sent = catchup_events.last().map_or(last_id, |e| e.id);

    let catchup_stream = tokio_stream::iter(
        catchup_events
            .into_iter()
            .map(|event| Ok::<_, Infallible>(sse_event(&event))),
    );

    let live_stream = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(event) if event.id > newest_sent => Some(Ok(sse_event(&event))),
        Ok(_) => None,
        Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "payment event subscriber lagged");
            None
        }
    });

    let keepalive_stream = tokio_stream::StreamExt::map(
        tokio_stream::wrappers::IntervalStream::new(tokio::time::interval(Duration::from_secs(30))),
        |_| Ok(Event::default().comment("keepalive")),
    );

    let combined = catchup_stream.chain(live_stream);
    let merged = StreamExt::merge(combined, keepalive_stream);

    Ok(Sse::new(merged))
}
