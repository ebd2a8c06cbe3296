use serde_json::Value;

/// Payment audit trail. Emits structured `tracing` events on the `payment_audit`
/// target so they can be routed separately from application logs.
#[derive(Debug, Clone, Copy)]
pub struct AuditLog {
    enabled: bool,
}

impl AuditLog {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn info(&self, stage: &str, context: Value) {
        if self.enabled {
            tracing::info!(target: "payment_audit", stage, context = %context, "payment audit");
        }
    }

    pub fn error(&self, stage: &str, context: Value) {
        if self.enabled {
            tracing::error!(target: "payment_audit", stage, context = %context, "payment audit");
        }
    }
}
