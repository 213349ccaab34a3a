//! identity-core: Shared infrastructure for the user directory services.
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
pub mod www_authenticate;

pub use async_trait;
pub use axum;
pub use http;
pub use serde;
pub use serde_json;
pub use tokio;
pub use tower;
pub use tower_http;
pub use tracing;
