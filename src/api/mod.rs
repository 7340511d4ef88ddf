//! The API layer, containing web handlers and routing.

pub mod handlers;
pub mod router;

pub use handlers::{ApiDoc, IDEMPOTENCY_KEY_HEADER};
pub use router::{RouterConfig, create_router, create_router_with_config};
