use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, StatusCode},
    middleware::Next,
    response::IntoResponse,
    Json,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Serialize;

use identity_core::error::AppError;

use crate::models::ClaimsPrincipal;
use crate::AppState;

/// Validates inbound bearer tokens against the tenant's signing key.
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(public_key_path: &str, audience: Option<&str>) -> Result<Self, AppError> {
        let public_pem = std::fs::read(public_key_path)?;
        Self::from_pem(&public_pem, audience)
    }

    pub fn from_pem(public_pem: &[u8], audience: Option<&str>) -> Result<Self, AppError> {
        let decoding_key = DecodingKey::from_rsa_pem(public_pem)?;
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = true;
        match audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        Ok(Self {
            decoding_key,
            validation,
        })
    }

    /// Decodes and validates the token, dehydrating its claims into a
    /// principal that still carries the raw assertion for downstream
    /// exchange.
    pub fn validate(&self, token: &str) -> Result<ClaimsPrincipal, AppError> {
        let data =
            jsonwebtoken::decode::<serde_json::Value>(token, &self.decoding_key, &self.validation)?;
        Ok(ClaimsPrincipal::from_json_claims(&data.claims).with_assertion(token))
    }
}

/// Middleware to require authentication
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let token = match token {
        Some(token) => token,
        None => {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Missing or invalid Authorization header".to_string(),
                }),
            ));
        }
    };

    let principal = match state.verifier.validate(token) {
        Ok(principal) => principal,
        Err(_) => {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or expired token".to_string(),
                }),
            ));
        }
    };

    // Store the principal in request extensions so handlers can access it
    req.extensions_mut().insert(principal);

    Ok(next.run(req).await)
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Extractor to easily get the authenticated caller in handlers
pub struct CallerIdentity(pub ClaimsPrincipal);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let principal = parts.extensions.get::<ClaimsPrincipal>().ok_or((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: "Caller identity missing from request extensions".to_string(),
            }),
        ))?;

        Ok(CallerIdentity(principal.clone()))
    }
}
