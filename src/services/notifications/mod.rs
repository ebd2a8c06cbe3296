pub mod callback;

use async_trait::async_trait;

use crate::models::PaymentEvent;

/// Receives payment lifecycle events for the booking application
/// (confirmation emails, staff alerts).
#[async_trait]
pub trait PaymentNotifier: Send + Sync {
    async fn notify(&self, event: &PaymentEvent) -> anyhow::Result<()>;
}

/// Default notifier when no callback URL is configured.
pub struct LogNotifier;

#[async_trait]
impl PaymentNotifier for LogNotifier {
    async fn notify(&self, event: &PaymentEvent) -> anyhow::Result<()> {
        tracing::info!(
            booking_code = %event.booking_code,
            kind = event.kind.as_str(),
            reference = event.reference.as_deref().unwrap_or(""),
            "payment event"
        );
        Ok(())
    }
}
