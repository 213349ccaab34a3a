//! Error type for users-api client calls.

use thiserror::Error;

/// Failures surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request never produced an HTTP response.
    #[error("request to users-api failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The token source could not produce a bearer token.
    #[error("could not acquire a token for users-api: {0}")]
    Auth(String),

    /// The service wants tenant-admin consent before it will act for
    /// this client. Send an administrator to `consent_uri` and retry
    /// once they have granted it.
    #[error("admin consent required at {consent_uri}")]
    ConsentRequired { consent_uri: String },

    /// Any other non-success answer from the service.
    #[error("users-api answered {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
}
