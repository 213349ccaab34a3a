use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use identity_core::error::AppError;

use crate::models::ClaimsPrincipal;
use crate::AppState;

/// Middleware to require an accepted delegated scope, or an accepted
/// application role when the caller is an app-only token.
pub async fn require_users_scope(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let principal = req.extensions().get::<ClaimsPrincipal>().ok_or_else(|| {
        AppError::Unauthorized(anyhow::anyhow!(
            "Caller identity missing from request extensions"
        ))
    })?;

    let authorized = if principal.is_app_only() {
        holds_accepted(
            &principal.app_roles(),
            &state.config.security.accepted_app_roles,
        )
    } else {
        holds_accepted(&principal.scopes(), &state.config.security.accepted_scopes)
    };

    if !authorized {
        tracing::warn!(
            caller = principal.upn().unwrap_or("unknown"),
            app_only = principal.is_app_only(),
            granted_scopes = ?principal.scopes(),
            granted_roles = ?principal.app_roles(),
            "Caller lacks an accepted scope or role"
        );
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Caller lacks an accepted scope or role"
        )));
    }

    Ok(next.run(req).await)
}

fn holds_accepted(granted: &[&str], accepted: &[String]) -> bool {
    granted
        .iter()
        .any(|scope| accepted.iter().any(|a| a == scope))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_is_exact_and_case_sensitive() {
        let accepted = vec!["Users.Read".to_string(), "Users.ReadWrite".to_string()];

        assert!(holds_accepted(&["Users.Read"], &accepted));
        assert!(holds_accepted(&["Other.Scope", "Users.ReadWrite"], &accepted));
        assert!(!holds_accepted(&["users.read"], &accepted));
        assert!(!holds_accepted(&[], &accepted));
    }
}
