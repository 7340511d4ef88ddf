//! Application layer containing business logic and shared state.

pub mod idempotency;
pub mod pagination;
pub mod poll;
pub mod scheduler;
pub mod service;
pub mod state;
pub mod threshold;
pub mod worker;

pub use idempotency::IdempotencyMiddleware;
pub use pagination::{get_page, paginate, resolve_page_info};
pub use poll::poll;
pub use scheduler::EventScheduler;
pub use service::{AppService, ServiceConfig};
pub use state::AppState;
pub use threshold::ThresholdTrigger;
pub use worker::{SchedulerConfig, SchedulerWorker, spawn_scheduler};
