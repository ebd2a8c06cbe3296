use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, Method};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Deserialize;

use crate::errors::{WebhookError, WebhookRejection};
use crate::services::webhook;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ProbeQuery {
    pub test: Option<String>,
}

fn text(body: &'static str) -> Response {
    ([(header::CONTENT_TYPE, "text/plain")], body).into_response()
}

// ANY /webhook/stripe
pub async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    method: Method,
    Query(query): Query<ProbeQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if method == Method::GET && query.test.as_deref() == Some("1") {
        return text("Stripe webhook endpoint reachable");
    }
    if method != Method::POST {
        return WebhookError::Rejected(WebhookRejection::MethodNotAllowed).into_response();
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok());

    match webhook::handle_webhook_event(&state, &body, content_type, signature, Utc::now()).await {
        Ok(outcome) => {
            tracing::info!(outcome = ?outcome, "webhook handled");
            text("ok")
        }
        Err(e) => e.into_response(),
    }
}
