//! API layer
//!
//! HTTP handlers for:
//! - The index listing (session-scoped)
//! - Federation endpoints: actor documents and inboxes
//! - The OAuth2 callback
//! - Metrics (Prometheus)

mod actors;
pub mod metrics;
mod oauth;

pub use actors::{federation_router, frontend_router};
pub use metrics::metrics_router;
pub use oauth::oauth_router;
