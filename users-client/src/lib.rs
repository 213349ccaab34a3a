//! users-client: Typed HTTP client for the users-api service.
//!
//! Wraps the user lookup, group membership and invitation endpoints in
//! async methods that attach a bearer token from an injected
//! [`TokenSource`] and decode the JSON replies into typed results. A
//! 401 carrying an admin-consent challenge is rewritten into a consent
//! URI the caller can redirect an administrator to.
pub mod client;
pub mod error;
pub mod models;

pub use client::{StaticTokenSource, TokenSource, UsersClient, UsersClientConfig};
pub use error::ClientError;
pub use models::{
    AddToGroupStatus, InviteUserResult, ProfilePhoto, RemoveFromGroupStatus, UserProfile,
    UserStatus,
};
