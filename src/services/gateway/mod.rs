pub mod stripe;

use std::collections::BTreeMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub amount: Decimal,
    pub currency: String,
    /// Card token produced by the client-side payment form.
    pub token: String,
    pub description: String,
    pub receipt_email: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub confirm: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    Success,
    RedirectRequired,
    Error,
}

#[derive(Debug, Clone)]
pub struct GatewayResult {
    pub status: GatewayStatus,
    /// Money is reserved but not yet captured.
    pub authorized_only: bool,
    pub payment_intent_id: Option<String>,
    pub transaction_reference: Option<String>,
    pub redirect_url: Option<String>,
    pub error_message: Option<String>,
    pub data: Value,
}

impl GatewayResult {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: GatewayStatus::Error,
            authorized_only: false,
            payment_intent_id: None,
            transaction_reference: None,
            redirect_url: None,
            error_message: Some(message.into()),
            data: Value::Null,
        }
    }
}

/// Remote payment provider. `Err` means the call itself failed (transport, timeout,
/// unreadable response); a declined payment is an `Ok` with `GatewayStatus::Error`.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate(&self, request: &GatewayRequest) -> anyhow::Result<GatewayResult>;
    async fn retrieve(&self, payment_intent_id: &str) -> anyhow::Result<GatewayResult>;
}
