use serde::Deserialize;

/// Envelope of a gateway notification. Only the fields the processor reads are typed.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    pub object: String,
    pub created: i64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: serde_json::Value,
}

impl WebhookEvent {
    /// Payment intent the event refers to. Charge events carry it as a field.
    pub fn payment_intent_id(&self) -> Option<&str> {
        let object = &self.data.object;
        match object.get("object").and_then(|v| v.as_str()) {
            Some("charge") => object.get("payment_intent").and_then(|v| v.as_str()),
            _ => object.get("id").and_then(|v| v.as_str()),
        }
        .filter(|id| !id.is_empty())
    }

    pub fn metadata_booking_code(&self) -> Option<&str> {
        self.data
            .object
            .get("metadata")
            .and_then(|m| m.get("booking_code"))
            .and_then(|v| v.as_str())
            .filter(|code| !code.is_empty())
    }

    pub fn object_id(&self) -> Option<&str> {
        self.data.object.get("id").and_then(|v| v.as_str())
    }
}
