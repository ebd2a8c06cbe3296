use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: i64,
    pub code: String,
    pub tour_id: i64,
    pub contact: Contact,
    pub total_guests: i32,
    pub number_of_children: i32,
    pub cancelled: bool,
    pub total_guests_admin_override: bool,
    /// Flat per-booking total for bookings made before ticket types existed.
    pub legacy_total: Option<Decimal>,
    pub ledger: PaymentLedger,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub version: i64,
}

impl Booking {
    pub fn new(tour_id: i64, contact: Contact, now: NaiveDateTime) -> Self {
        Self {
            id: 0,
            code: uuid::Uuid::new_v4().simple().to_string(),
            tour_id,
            contact,
            total_guests: 0,
            number_of_children: 0,
            cancelled: false,
            total_guests_admin_override: false,
            legacy_total: None,
            ledger: PaymentLedger::default(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id > 0
    }

    pub fn age_minutes(&self, now: NaiveDateTime) -> i64 {
        (now - self.created_at).num_minutes()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Contact {
    pub first_name: String,
    pub surname: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
    Refunded,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Paid => "Paid",
            PaymentStatus::Failed => "Failed",
            PaymentStatus::Refunded => "Refunded",
            PaymentStatus::Cancelled => "Cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "Paid" => PaymentStatus::Paid,
            "Failed" => PaymentStatus::Failed,
            "Refunded" => PaymentStatus::Refunded,
            "Cancelled" => PaymentStatus::Cancelled,
            _ => PaymentStatus::Pending,
        }
    }

    /// Pending moves to any terminal state; Paid may only be refunded.
    /// Same-status moves are allowed so repeated deliveries can merge fields.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Paid)
                | (PaymentStatus::Pending, PaymentStatus::Failed)
                | (PaymentStatus::Pending, PaymentStatus::Cancelled)
                | (PaymentStatus::Paid, PaymentStatus::Refunded)
        )
    }
}

/// Payment fields owned by a booking. Mutated only through `services::ledger`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PaymentLedger {
    pub status: PaymentStatus,
    pub gateway: Option<String>,
    pub reference: Option<String>,
    pub intent_id: Option<String>,
    pub paid_at: Option<NaiveDateTime>,
    pub error_message: Option<String>,
    pub refund_amount: Option<Decimal>,
    pub last_webhook_event_id: Option<String>,
    pub last_webhook_timestamp: Option<i64>,
}

impl PaymentLedger {
    pub fn status_label(&self) -> &'static str {
        if self.status == PaymentStatus::Paid && self.gateway.as_deref() == Some(GATEWAY_OFFLINE) {
            return "Offline";
        }
        match self.status {
            PaymentStatus::Pending => "Awaiting Payment",
            PaymentStatus::Paid => "Payment Complete",
            PaymentStatus::Failed => "Payment Failed",
            PaymentStatus::Refunded => "Payment Refunded",
            PaymentStatus::Cancelled => "Payment Cancelled",
        }
    }
}

pub const GATEWAY_STRIPE: &str = "Stripe";
pub const GATEWAY_OFFLINE: &str = "Offline";
