use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Handler-facing error with a fixed HTTP rendering.
///
/// Every response body is `{"error": ..., "details"?: ...}` so callers can
/// rely on one shape regardless of which service produced the failure.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Unauthorized: {0}")]
    Unauthorized(anyhow::Error),

    #[error("Forbidden: {0}")]
    Forbidden(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("Bad Gateway: {0}")]
    BadGateway(String),

    #[error("Invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) | Self::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::ConfigError(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The cause goes into `details` for server-side failures; client-facing
    /// rejections carry their reason directly in `error`.
    fn body(self) -> ErrorBody {
        match self {
            Self::NotFound(err)
            | Self::Unauthorized(err)
            | Self::Forbidden(err)
            | Self::Conflict(err) => ErrorBody {
                error: err.to_string(),
                details: None,
            },
            Self::BadGateway(message) => ErrorBody {
                error: format!("Bad Gateway: {}", message),
                details: None,
            },
            Self::InvalidToken(err) => ErrorBody {
                error: "Invalid token".to_string(),
                details: Some(err.to_string()),
            },
            Self::ConfigError(err) => ErrorBody {
                error: "Configuration error".to_string(),
                details: Some(err.to_string()),
            },
            Self::InternalError(err) => ErrorBody {
                error: "Internal server error".to_string(),
                details: Some(format!("{:#}", err)),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(err: AppError) -> (StatusCode, serde_json::Value) {
        let status = err.status();
        let body = serde_json::to_value(err.body()).unwrap();
        (status, body)
    }

    #[test]
    fn rejections_carry_their_reason() {
        let (status, body) = rendered(AppError::Unauthorized(anyhow::anyhow!(
            "interactive sign-in required"
        )));
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "interactive sign-in required");
        assert!(body.get("details").is_none());
    }

    #[test]
    fn upstream_failures_are_bad_gateway() {
        let (status, body) = rendered(AppError::BadGateway("directory unreachable".to_string()));
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "Bad Gateway: directory unreachable");
    }

    #[test]
    fn internal_causes_stay_in_details() {
        let (status, body) = rendered(AppError::InternalError(anyhow::anyhow!("socket closed")));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");
        assert_eq!(body["details"], "socket closed");
    }
}
