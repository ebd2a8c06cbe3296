use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEventKind {
    PaymentCaptured,
    PaymentFailed,
    PaymentRefunded,
    PaymentCancelled,
    PaymentSettled,
    /// Money was taken that the booking ledger could not accept.
    PaymentNeedsReview,
    BookingDeleted,
}

impl PaymentEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentEventKind::PaymentCaptured => "payment_captured",
            PaymentEventKind::PaymentFailed => "payment_failed",
            PaymentEventKind::PaymentRefunded => "payment_refunded",
            PaymentEventKind::PaymentCancelled => "payment_cancelled",
            PaymentEventKind::PaymentSettled => "payment_settled",
            PaymentEventKind::PaymentNeedsReview => "payment_needs_review",
            PaymentEventKind::BookingDeleted => "booking_deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "payment_captured" => Some(PaymentEventKind::PaymentCaptured),
            "payment_failed" => Some(PaymentEventKind::PaymentFailed),
            "payment_refunded" => Some(PaymentEventKind::PaymentRefunded),
            "payment_cancelled" => Some(PaymentEventKind::PaymentCancelled),
            "payment_settled" => Some(PaymentEventKind::PaymentSettled),
            "payment_needs_review" => Some(PaymentEventKind::PaymentNeedsReview),
            "booking_deleted" => Some(PaymentEventKind::BookingDeleted),
            _ => None,
        }
    }
}

/// Downstream-facing record of a booking's payment lifecycle change.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub id: i64,
    pub booking_code: String,
    pub kind: PaymentEventKind,
    pub reference: Option<String>,
    pub amount: Option<Decimal>,
    pub created_at: String,
}
