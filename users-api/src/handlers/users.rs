//! HTTP surface for directory lookups, group membership and invitations.
//!
//! Every operation binds its inputs from the query string; a missing
//! parameter arrives as an empty string and is answered with a degraded
//! value rather than a rejection, matching what the frontends expect.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;

use identity_core::error::AppError;

use crate::{
    middleware::CallerIdentity,
    models::{
        AddToGroupStatus, DirectoryUser, IdentityRef, InviteUserResult, RemoveFromGroupStatus,
        UserStatus,
    },
    services::{enabled_user_by_id_filter, mail_filter, AuthError, ServiceError},
    AppState,
};

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct UserMailQuery {
    /// Mail address identifying the directory user.
    #[serde(default)]
    pub user_mail: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct GroupMembershipQuery {
    #[serde(default)]
    pub user_mail: String,
    #[serde(default)]
    pub group_id: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct InviteUserQuery {
    #[serde(default)]
    pub user_mail: String,
    /// Overrides the configured post-redemption redirect.
    #[serde(default)]
    pub redirect_url: Option<String>,
}

/// Whether a downstream token can be acquired for the given user.
///
/// Lookup misses and refused acquisitions both answer `false`; only an
/// unreachable provider fails the request.
#[utoipa::path(
    post,
    path = "/api/users/CanAuthenticateUser",
    params(UserMailQuery),
    responses(
        (status = 200, description = "Whether a token could be acquired for the user", body = bool),
        (status = 401, description = "Caller is not authenticated"),
        (status = 502, description = "Identity provider or directory unreachable")
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn can_authenticate_user(
    State(state): State<AppState>,
    Query(query): Query<UserMailQuery>,
) -> Result<Json<bool>, AppError> {
    if query.user_mail.trim().is_empty() {
        return Ok(Json(false));
    }

    let user = state
        .directory
        .find_user_by_filter(&mail_filter(&query.user_mail))
        .await
        .map_err(ServiceError::from)?;

    let upn = user
        .and_then(|user| user.user_principal_name)
        .unwrap_or_default();
    if upn.is_empty() {
        return Ok(Json(false));
    }

    let scopes = [state.config.identity.service_scope.clone()];
    match state
        .broker
        .get_token(&scopes, &IdentityRef::Username(upn))
        .await
    {
        Ok(token) => Ok(Json(!token.is_empty())),
        Err(AuthError::Transport(error)) => {
            tracing::error!(%error, "Token endpoint unreachable");
            Err(AppError::BadGateway(error.to_string()))
        }
        Err(error) => {
            tracing::warn!(user_mail = %query.user_mail, %error, "Token acquisition refused");
            Ok(Json(false))
        }
    }
}

/// Whether the mail address resolves to a directory user.
#[utoipa::path(
    get,
    path = "/api/users/getuserstatus",
    params(UserMailQuery),
    responses(
        (status = 200, description = "Existence of the user", body = UserStatus),
        (status = 401, description = "Caller is not authenticated"),
        (status = 502, description = "Directory unreachable")
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn get_user_status(
    State(state): State<AppState>,
    Query(query): Query<UserMailQuery>,
) -> Result<Json<UserStatus>, AppError> {
    if query.user_mail.trim().is_empty() {
        return Ok(Json(UserStatus::Missing));
    }

    let user = state
        .directory
        .find_user_by_filter(&mail_filter(&query.user_mail))
        .await
        .map_err(ServiceError::from)?;

    Ok(Json(match user {
        Some(_) => UserStatus::Existing,
        None => UserStatus::Missing,
    }))
}

/// The caller's own directory profile.
///
/// The delegated directory token is acquired up front so a stale or
/// challenged grant surfaces as 401 or 409 before any directory read.
#[utoipa::path(
    get,
    path = "/api/users/getloggedingraphuser",
    responses(
        (status = 200, description = "Profile of the caller, null when not found", body = DirectoryUser),
        (status = 401, description = "Interactive sign-in required"),
        (status = 409, description = "Claims challenge must be satisfied"),
        (status = 502, description = "Directory unreachable")
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn get_logged_in_graph_user(
    State(state): State<AppState>,
    CallerIdentity(principal): CallerIdentity,
) -> Result<Json<Option<DirectoryUser>>, AppError> {
    state
        .broker
        .get_token(
            &state.config.directory.scopes,
            &IdentityRef::Principal(principal.clone()),
        )
        .await
        .map_err(ServiceError::from)?;

    let object_id = match principal.object_id() {
        Some(object_id) => object_id.to_string(),
        None => return Ok(Json(None)),
    };

    let user = state
        .directory
        .find_user_by_filter(&enabled_user_by_id_filter(&object_id))
        .await
        .map_err(ServiceError::from)?;

    Ok(Json(user))
}

/// Principal names of every enabled user in the tenant.
#[utoipa::path(
    get,
    path = "/api/users/getallgraphusers",
    responses(
        (status = 200, description = "Principal names of enabled users", body = Vec<String>),
        (status = 401, description = "Caller is not authenticated"),
        (status = 502, description = "Directory unreachable")
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn get_all_graph_users(
    State(state): State<AppState>,
) -> Result<Json<Vec<String>>, AppError> {
    let names = state
        .directory
        .list_enabled_principal_names()
        .await
        .map_err(ServiceError::from)?;
    Ok(Json(names))
}

/// Adds an existing user to a group. Always answers 200 with a status.
#[utoipa::path(
    post,
    path = "/api/users/AddToGroup",
    params(GroupMembershipQuery),
    responses(
        (status = 200, description = "Outcome of the membership change", body = AddToGroupStatus),
        (status = 401, description = "Caller is not authenticated")
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn add_to_group(
    State(state): State<AppState>,
    Query(query): Query<GroupMembershipQuery>,
) -> Json<AddToGroupStatus> {
    Json(
        state
            .invitations
            .add_to_group(&query.user_mail, &query.group_id)
            .await,
    )
}

/// Removes a user from a group. Always answers 200 with a status.
#[utoipa::path(
    post,
    path = "/api/users/RemoveUserFromGroup",
    params(GroupMembershipQuery),
    responses(
        (status = 200, description = "Outcome of the membership change", body = RemoveFromGroupStatus),
        (status = 401, description = "Caller is not authenticated")
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn remove_user_from_group(
    State(state): State<AppState>,
    Query(query): Query<GroupMembershipQuery>,
) -> Json<RemoveFromGroupStatus> {
    Json(
        state
            .invitations
            .remove_from_group(&query.user_mail, &query.group_id)
            .await,
    )
}

/// Invites an external user and grants the access group once the guest
/// account becomes visible. Always answers 200 with the composite result.
#[utoipa::path(
    post,
    path = "/api/users/InviteUser",
    params(InviteUserQuery),
    responses(
        (status = 200, description = "Outcome of the invitation flow", body = InviteUserResult),
        (status = 401, description = "Caller is not authenticated")
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn invite_user(
    State(state): State<AppState>,
    Query(query): Query<InviteUserQuery>,
) -> Json<InviteUserResult> {
    let redirect_url = query
        .redirect_url
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(|| state.config.directory.invite_redirect_url.clone());

    let cancel = state.shutdown.child_token();
    Json(
        state
            .invitations
            .invite_user(&query.user_mail, &redirect_url, &cancel)
            .await,
    )
}
