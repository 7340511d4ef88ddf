//! Application state management.

use std::sync::Arc;

use crate::domain::{AccountingService, DatabaseClient, IdempotencyStore, LockStore};

use super::idempotency::IdempotencyMiddleware;
use super::scheduler::EventScheduler;
use super::service::{AppService, ServiceConfig};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AppService>,
    pub scheduler: Arc<EventScheduler>,
}

impl AppState {
    /// Create a new application state with default service settings
    #[must_use]
    pub fn new(
        db_client: Arc<dyn DatabaseClient>,
        accounting: Arc<dyn AccountingService>,
        lock_store: Arc<dyn LockStore>,
        idempotency_store: Arc<dyn IdempotencyStore>,
    ) -> Self {
        Self::with_config(
            db_client,
            accounting,
            lock_store,
            idempotency_store,
            ServiceConfig::default(),
        )
    }

    #[must_use]
    pub fn with_config(
        db_client: Arc<dyn DatabaseClient>,
        accounting: Arc<dyn AccountingService>,
        lock_store: Arc<dyn LockStore>,
        idempotency_store: Arc<dyn IdempotencyStore>,
        config: ServiceConfig,
    ) -> Self {
        let idempotency = IdempotencyMiddleware::new(lock_store, idempotency_store);
        let service = Arc::new(AppService::new(db_client, accounting, idempotency, config));
        let scheduler = service.scheduler();
        Self { service, scheduler }
    }
}
