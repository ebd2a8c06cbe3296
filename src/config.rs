use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    pub stripe_secret_key: String,
    pub stripe_publishable_key: String,
    pub stripe_webhook_secret: String,
    pub stripe_api_base: String,
    pub return_url: String,
    pub offline_payment_group: String,
    pub currency: String,
    pub webhook_replay_tolerance_secs: i64,
    pub webhook_future_tolerance_secs: i64,
    pub orphan_booking_max_age_minutes: i64,
    pub payment_lookup_window_minutes: i64,
    pub session_lookup_window_minutes: i64,
    pub gateway_timeout_secs: u64,
    pub payment_audit_log: bool,
    pub payment_callback_url: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: parse_var("PORT", 3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "tourpay.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            stripe_secret_key: env::var("STRIPE_SECRET_KEY").unwrap_or_default(),
            stripe_publishable_key: env::var("STRIPE_PUBLISHABLE_KEY").unwrap_or_default(),
            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),
            stripe_api_base: env::var("STRIPE_API_BASE")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            return_url: env::var("PAYMENT_RETURN_URL")
                .unwrap_or_else(|_| "http://localhost:3000/api/payments/complete".to_string()),
            offline_payment_group: env::var("OFFLINE_PAYMENT_GROUP").unwrap_or_default(),
            currency: env::var("PAYMENT_CURRENCY")
                .map(|c| c.trim().to_uppercase())
                .unwrap_or_else(|_| "NZD".to_string()),
            webhook_replay_tolerance_secs: parse_var("WEBHOOK_REPLAY_TOLERANCE_SECS", 300),
            webhook_future_tolerance_secs: parse_var("WEBHOOK_FUTURE_TOLERANCE_SECS", 60),
            orphan_booking_max_age_minutes: parse_var("ORPHAN_BOOKING_MAX_AGE_MINUTES", 60),
            payment_lookup_window_minutes: parse_var("PAYMENT_LOOKUP_WINDOW_MINUTES", 60),
            session_lookup_window_minutes: parse_var("SESSION_LOOKUP_WINDOW_MINUTES", 120),
            gateway_timeout_secs: parse_var("GATEWAY_TIMEOUT_SECS", 30),
            payment_audit_log: env::var("PAYMENT_AUDIT_LOG")
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            payment_callback_url: env::var("PAYMENT_CALLBACK_URL").unwrap_or_default(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
