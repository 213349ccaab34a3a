pub mod auth;
pub mod scope;

pub use auth::{auth_middleware, CallerIdentity, TokenVerifier};
pub use scope::require_users_scope;
