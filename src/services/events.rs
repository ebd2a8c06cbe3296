use rusqlite::Connection;
use rust_decimal::Decimal;

use crate::db::queries;
use crate::models::{PaymentEvent, PaymentEventKind};
use crate::state::AppState;

/// Persists a domain event. Call inside the transaction that made the change, then
/// hand the returned event to [`publish`] once the lock is released.
pub fn record(
    conn: &Connection,
    booking_code: &str,
    kind: PaymentEventKind,
    reference: Option<&str>,
    amount: Option<Decimal>,
) -> anyhow::Result<PaymentEvent> {
    queries::insert_payment_event(conn, booking_code, kind, reference, amount)
}

/// Broadcasts to SSE subscribers and notifies the booking application.
/// Delivery failures are logged and never fail the caller.
pub async fn publish(state: &AppState, events: Vec<PaymentEvent>) {
    for event in events {
        // No receivers is fine.
        let _ = state.events_tx.send(event.clone());

        if let Err(e) = state.notifier.notify(&event).await {
            tracing::warn!(
                error = %e,
                booking_code = %event.booking_code,
                kind = event.kind.as_str(),
                "failed to deliver payment notification"
            );
        }
    }
}
