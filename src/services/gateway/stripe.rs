use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;

use super::{GatewayRequest, GatewayResult, GatewayStatus, PaymentGateway};
use crate::services::amount::to_minor_units;
use crate::services::ledger::extract_charge_id;

/// Stripe Payment Intents over the REST API.
pub struct StripeGateway {
    secret_key: String,
    api_base: String,
    return_url: String,
    client: reqwest::Client,
}

impl StripeGateway {
    pub fn new(secret_key: String, api_base: String, return_url: String) -> Self {
        Self {
            secret_key,
            api_base: api_base.trim_end_matches('/').to_string(),
            return_url,
            client: reqwest::Client::new(),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> anyhow::Result<GatewayResult> {
        let resp = request
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .context("failed to call Stripe API")?;

        let status = resp.status();
        let data: Value = resp
            .json()
            .await
            .context("failed to parse Stripe response")?;

        if let Some(error) = data.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("payment was declined")
                .to_string();
            tracing::warn!(status = %status, message = %message, "Stripe returned an error");
            let mut result = GatewayResult::error(message);
            result.payment_intent_id = error
                .get("payment_intent")
                .and_then(|pi| pi.get("id"))
                .and_then(Value::as_str)
                .map(str::to_string);
            result.data = data;
            return Ok(result);
        }

        if status.is_server_error() {
            anyhow::bail!("Stripe API error ({status})");
        }

        Ok(map_intent(data))
    }
}

/// Maps a payment intent object onto the gateway result.
pub fn map_intent(data: Value) -> GatewayResult {
    let intent_id = data.get("id").and_then(Value::as_str).map(str::to_string);
    let intent_status = data.get("status").and_then(Value::as_str).unwrap_or("");
    let redirect_url = data
        .get("next_action")
        .and_then(|a| a.get("redirect_to_url"))
        .and_then(|r| r.get("url"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut result = GatewayResult {
        status: GatewayStatus::Error,
        authorized_only: false,
        payment_intent_id: intent_id,
        transaction_reference: extract_charge_id(&data),
        redirect_url: None,
        error_message: None,
        data: Value::Null,
    };

    match intent_status {
        "succeeded" => result.status = GatewayStatus::Success,
        "requires_capture" => {
            result.status = GatewayStatus::Success;
            result.authorized_only = true;
        }
        "requires_action" if redirect_url.is_some() => {
            result.status = GatewayStatus::RedirectRequired;
            result.redirect_url = redirect_url;
        }
        other => {
            let message = data
                .get("last_payment_error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("unexpected payment intent status: {other}"));
            result.error_message = Some(message);
        }
    }

    result.data = data;
    result
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn initiate(&self, request: &GatewayRequest) -> anyhow::Result<GatewayResult> {
        let amount = to_minor_units(request.amount)
            .context("payment amount out of range")?
            .to_string();
        let currency = request.currency.to_lowercase();
        let confirm = request.confirm.to_string();

        let mut form: Vec<(String, String)> = vec![
            ("amount".to_string(), amount),
            ("currency".to_string(), currency),
            ("confirm".to_string(), confirm),
            ("payment_method_data[type]".to_string(), "card".to_string()),
            ("payment_method_data[card][token]".to_string(), request.token.clone()),
            ("return_url".to_string(), self.return_url.clone()),
            ("description".to_string(), request.description.clone()),
        ];
        if let Some(email) = request.receipt_email.as_ref().filter(|e| !e.is_empty()) {
            form.push(("receipt_email".to_string(), email.clone()));
        }
        for (key, value) in &request.metadata {
            form.push((format!("metadata[{key}]"), value.clone()));
        }

        let url = format!("{}/v1/payment_intents", self.api_base);
        self.send(self.client.post(&url).form(&form)).await
    }

    async fn retrieve(&self, payment_intent_id: &str) -> anyhow::Result<GatewayResult> {
        let url = format!("{}/v1/payment_intents/{}", self.api_base, payment_intent_id);
        self.send(self.client.get(&url)).await
    }
}
