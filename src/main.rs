use std::sync::{Arc, Mutex};

use axum::routing::{any, get, post};
use axum::Router;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use tourpay::config::AppConfig;
use tourpay::db;
use tourpay::handlers;
use tourpay::services::audit::AuditLog;
use tourpay::services::gateway::stripe::StripeGateway;
use tourpay::services::notifications::callback::CallbackNotifier;
use tourpay::services::notifications::{LogNotifier, PaymentNotifier};
use tourpay::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;

    if config.stripe_secret_key.is_empty() {
        tracing::warn!("STRIPE_SECRET_KEY is not set; card payments will fail");
    }
    if config.stripe_webhook_secret.is_empty() {
        tracing::warn!("STRIPE_WEBHOOK_SECRET is not set; all webhooks will be rejected");
    }
    let gateway = StripeGateway::new(
        config.stripe_secret_key.clone(),
        config.stripe_api_base.clone(),
        config.return_url.clone(),
    );

    let notifier: Box<dyn PaymentNotifier> = if config.payment_callback_url.is_empty() {
        Box::new(LogNotifier)
    } else {
        tracing::info!("payment events will be posted to {}", config.payment_callback_url);
        Box::new(CallbackNotifier::new(config.payment_callback_url.clone()))
    };

    let (events_tx, _) = broadcast::channel(256);

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        gateway: Box::new(gateway),
        notifier,
        audit: AuditLog::new(config.payment_audit_log),
        events_tx,
    });

    let app = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/webhook/stripe", any(handlers::webhook::stripe_webhook))
        .route("/api/ticket-types", get(handlers::bookings::list_ticket_types))
        .route("/api/bookings", post(handlers::bookings::create_booking))
        .route(
            "/api/bookings/:code",
            get(handlers::bookings::get_booking).put(handlers::bookings::update_booking),
        )
        .route(
            "/api/bookings/:code/validate-amount",
            post(handlers::bookings::validate_amount),
        )
        .route("/api/payments/config", get(handlers::payments::client_config))
        .route("/api/payments/complete", get(handlers::payments::complete_payment))
        .route("/api/payments/failure", post(handlers::payments::payment_failure))
        .route("/api/payments/events", get(handlers::payments::events_stream))
        .route("/api/admin/bookings", get(handlers::admin::get_bookings))
        .route("/api/admin/bookings/:code", get(handlers::admin::get_booking))
        .route(
            "/api/admin/bookings/:code/cancel",
            post(handlers::admin::cancel_booking),
        )
        .route(
            "/api/admin/bookings/:code/refund",
            post(handlers::admin::refund_booking),
        )
        .route("/api/admin/ticket-types", post(handlers::admin::create_ticket_type))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
