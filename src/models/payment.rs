use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One attempt to collect money for a booking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub identifier: String,
    pub booking_id: i64,
    pub amount: Decimal,
    pub currency: String,
    pub gateway: String,
    pub status: AttemptStatus,
    pub transaction_reference: Option<String>,
    pub payment_intent_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AttemptStatus {
    Created,
    PendingAuthorization,
    Authorized,
    Captured,
    Failed,
    Cancelled,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Created => "Created",
            AttemptStatus::PendingAuthorization => "PendingAuthorization",
            AttemptStatus::Authorized => "Authorized",
            AttemptStatus::Captured => "Captured",
            AttemptStatus::Failed => "Failed",
            AttemptStatus::Cancelled => "Cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "PendingAuthorization" => AttemptStatus::PendingAuthorization,
            "Authorized" => AttemptStatus::Authorized,
            "Captured" => AttemptStatus::Captured,
            "Failed" => AttemptStatus::Failed,
            "Cancelled" => AttemptStatus::Cancelled,
            _ => AttemptStatus::Created,
        }
    }

    /// Money is reserved or collected.
    pub fn is_successful(&self) -> bool {
        matches!(self, AttemptStatus::Authorized | AttemptStatus::Captured)
    }

    pub fn is_open(&self) -> bool {
        matches!(self, AttemptStatus::Created | AttemptStatus::PendingAuthorization)
    }

    /// A successful attempt is never downgraded; an authorization may still be captured.
    pub fn can_advance_to(&self, next: AttemptStatus) -> bool {
        if *self == next || next == AttemptStatus::Created {
            return false;
        }
        if self.is_successful() {
            return *self == AttemptStatus::Authorized && next == AttemptStatus::Captured;
        }
        true
    }
}
