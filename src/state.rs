use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::models::PaymentEvent;
use crate::services::audit::AuditLog;
use crate::services::gateway::PaymentGateway;
use crate::services::notifications::PaymentNotifier;

pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: AppConfig,
    pub gateway: Box<dyn PaymentGateway>,
    pub notifier: Box<dyn PaymentNotifier>,
    pub audit: AuditLog,
    pub events_tx: broadcast::Sender<PaymentEvent>,
}

impl AppState {
    /// Locks the connection. A panic in another holder does not corrupt SQLite state,
    /// so a poisoned lock is recovered rather than propagated.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
