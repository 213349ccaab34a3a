use anyhow::anyhow;
use identity_core::error::AppError;
use thiserror::Error;

use crate::services::directory::DirectoryError;
use crate::services::token::AuthError;

/// Error crossing from the service layer into a handler that lets failures
/// surface instead of degrading to a status value.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Auth(err) => match err {
                AuthError::UiRequired(reason) => {
                    AppError::Unauthorized(anyhow!("interactive sign-in required: {reason}"))
                }
                AuthError::ChallengeRequired(reason) => {
                    AppError::Conflict(anyhow!("claims challenge required: {reason}"))
                }
                AuthError::UnknownAccount(username) => {
                    AppError::Unauthorized(anyhow!("no cached account for {username}"))
                }
                AuthError::Transport(err) => AppError::BadGateway(err.to_string()),
                AuthError::Provider { code, description } => {
                    AppError::BadGateway(format!("identity provider error {code}: {description}"))
                }
            },
            ServiceError::Directory(err) => match err {
                DirectoryError::Auth(err) => ServiceError::Auth(err).into(),
                DirectoryError::Transport(err) => AppError::BadGateway(err.to_string()),
                DirectoryError::MissingUser(mail) => {
                    AppError::NotFound(anyhow!("no directory user with mail {mail}"))
                }
                err @ DirectoryError::Provider { .. } => AppError::BadGateway(err.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ui_required_becomes_unauthorized() {
        let err: AppError = ServiceError::Auth(AuthError::UiRequired("expired grant".into())).into();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn claims_challenges_become_conflicts() {
        let err: AppError =
            ServiceError::Auth(AuthError::ChallengeRequired("claims".into())).into();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn provider_failures_become_bad_gateway() {
        let err: AppError = ServiceError::Directory(DirectoryError::provider(
            "serviceNotAvailable",
            "upstream down",
            503,
        ))
        .into();
        assert!(matches!(err, AppError::BadGateway(_)));
    }

    #[test]
    fn nested_auth_failures_map_like_direct_ones() {
        let err: AppError = ServiceError::Directory(DirectoryError::Auth(
            AuthError::ChallengeRequired("claims".into()),
        ))
        .into();
        assert!(matches!(err, AppError::Conflict(_)));
    }
}
