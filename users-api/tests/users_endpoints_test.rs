//! HTTP-level tests for the /api/users surface: authentication, scope
//! enforcement, and the behavior of every endpoint against scripted
//! directory and identity backends.

mod common;

use axum::http::{Method, StatusCode};
use common::*;
use users_api::services::{AuthError, MockDirectory, MockIdentityTokens};

#[tokio::test]
async fn health_answers_without_a_token() {
    let app = spawn_app(MockDirectory::new(), MockIdentityTokens::new()).await;

    let (status, body) = app.request(Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "users-api-test");
}

#[tokio::test]
async fn requests_without_a_token_are_rejected() {
    let app = spawn_app(MockDirectory::new(), MockIdentityTokens::new()).await;

    let (status, body) = app
        .request(Method::GET, "/api/users/getuserstatus", None)
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Missing or invalid Authorization header");
}

#[tokio::test]
async fn expired_tokens_are_rejected() {
    let app = spawn_app(MockDirectory::new(), MockIdentityTokens::new()).await;

    let (status, body) = app
        .get("/api/users/getuserstatus", &expired_token())
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid or expired token");
}

#[tokio::test]
async fn callers_without_an_accepted_scope_are_refused() {
    let app = spawn_app(
        MockDirectory::new().with_user(existing_user()),
        MockIdentityTokens::new(),
    )
    .await;

    let (status, _) = app
        .get("/api/users/getuserstatus", &wrong_scope_token())
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn app_tokens_with_an_accepted_role_pass_the_scope_check() {
    let app = spawn_app(MockDirectory::new(), MockIdentityTokens::new()).await;

    let (status, body) = app.get("/api/users/getuserstatus", &app_token()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Missing");
}

#[tokio::test]
async fn can_authenticate_acquires_silently_for_a_known_user() {
    let app = spawn_app(
        MockDirectory::new().with_user(existing_user()),
        MockIdentityTokens::new().with_token(EXISTING_USER_UPN, DOWNSTREAM_TOKEN),
    )
    .await;

    let (status, body) = app
        .post(
            &format!(
                "/api/users/CanAuthenticateUser?userMail={}",
                EXISTING_USER_MAIL
            ),
            &user_token(),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, true);
    assert_eq!(app.identity.silent_calls(), 1);
    assert_eq!(app.identity.obo_calls(), 0);
}

#[tokio::test]
async fn can_authenticate_is_false_for_an_unknown_mail() {
    let app = spawn_app(
        MockDirectory::new().with_user(existing_user()),
        MockIdentityTokens::new(),
    )
    .await;

    let (status, body) = app
        .post(
            &format!(
                "/api/users/CanAuthenticateUser?userMail={}",
                MISSING_USER_MAIL
            ),
            &user_token(),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, false);
    assert_eq!(app.identity.silent_calls(), 0);
}

#[tokio::test]
async fn can_authenticate_is_false_without_a_mail_parameter() {
    let app = spawn_app(
        MockDirectory::new().with_user(existing_user()),
        MockIdentityTokens::new(),
    )
    .await;

    let (status, body) = app
        .post("/api/users/CanAuthenticateUser", &user_token())
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, false);
    assert_eq!(app.directory.find_calls(), 0);
}

#[tokio::test]
async fn can_authenticate_is_false_for_an_empty_token() {
    let app = spawn_app(
        MockDirectory::new().with_user(existing_user()),
        MockIdentityTokens::new().with_token(EXISTING_USER_UPN, ""),
    )
    .await;

    let (status, body) = app
        .post(
            &format!(
                "/api/users/CanAuthenticateUser?userMail={}",
                EXISTING_USER_MAIL
            ),
            &user_token(),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, false);
}

#[tokio::test]
async fn can_authenticate_is_false_when_every_acquisition_is_refused() {
    // Silent fails, and the delegated fallback has no grant either. Both
    // attempts run, the caller still gets a plain false.
    let app = spawn_app(
        MockDirectory::new().with_user(existing_user()),
        MockIdentityTokens::new().fail_silent(),
    )
    .await;

    let (status, body) = app
        .post(
            &format!(
                "/api/users/CanAuthenticateUser?userMail={}",
                EXISTING_USER_MAIL
            ),
            &user_token(),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, false);
    assert_eq!(app.identity.silent_calls(), 1);
    assert_eq!(app.identity.obo_calls(), 1);
}

#[tokio::test]
async fn user_status_reports_existing_and_missing() {
    let app = spawn_app(
        MockDirectory::new().with_user(existing_user()),
        MockIdentityTokens::new(),
    )
    .await;

    let (status, body) = app
        .get(
            &format!("/api/users/getuserstatus?userMail={}", EXISTING_USER_MAIL),
            &user_token(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Existing");

    let (status, body) = app
        .get(
            &format!("/api/users/getuserstatus?userMail={}", MISSING_USER_MAIL),
            &user_token(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Missing");
}

#[tokio::test]
async fn user_status_maps_a_failing_directory_to_bad_gateway() {
    let app = spawn_app(
        MockDirectory::new().fail_reads(),
        MockIdentityTokens::new(),
    )
    .await;

    let (status, _) = app
        .get(
            &format!("/api/users/getuserstatus?userMail={}", EXISTING_USER_MAIL),
            &user_token(),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn all_graph_users_lists_only_enabled_principals() {
    let mut disabled = existing_user();
    disabled.id = "d9183a5e-2f3c-4b9e-9a51-30c7a9f1c0de".to_string();
    disabled.user_principal_name = Some("left@corporation.org".to_string());
    disabled.account_enabled = Some(false);

    let app = spawn_app(
        MockDirectory::new()
            .with_user(existing_user())
            .with_user(disabled),
        MockIdentityTokens::new(),
    )
    .await;

    let (status, body) = app
        .get("/api/users/getallgraphusers", &user_token())
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!([EXISTING_USER_UPN]));
}

#[tokio::test]
async fn logged_in_graph_user_returns_the_callers_profile() {
    let app = spawn_app(
        MockDirectory::new().with_user(existing_user()),
        MockIdentityTokens::new().with_token(EXISTING_USER_UPN, DOWNSTREAM_TOKEN),
    )
    .await;

    let (status, body) = app
        .get("/api/users/getloggedingraphuser", &user_token())
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], EXISTING_USER_ID);
    assert_eq!(body["mail"], EXISTING_USER_MAIL);
    assert_eq!(app.identity.obo_calls(), 1);
}

#[tokio::test]
async fn logged_in_graph_user_surfaces_a_stale_grant_as_401() {
    let app = spawn_app(
        MockDirectory::new().with_user(existing_user()),
        MockIdentityTokens::new().fail_on_behalf_of(AuthError::UiRequired),
    )
    .await;

    let (status, _) = app
        .get("/api/users/getloggedingraphuser", &user_token())
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    // The directory is never consulted once acquisition is refused.
    assert_eq!(app.directory.find_calls(), 0);
}

#[tokio::test]
async fn logged_in_graph_user_surfaces_a_claims_challenge_as_409() {
    let app = spawn_app(
        MockDirectory::new().with_user(existing_user()),
        MockIdentityTokens::new().fail_on_behalf_of(AuthError::ChallengeRequired),
    )
    .await;

    let (status, _) = app
        .get("/api/users/getloggedingraphuser", &user_token())
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn add_to_group_adds_an_existing_user() {
    let app = spawn_app(
        MockDirectory::new().with_user(existing_user()),
        MockIdentityTokens::new(),
    )
    .await;

    let (status, body) = app
        .post(
            &format!(
                "/api/users/AddToGroup?userMail={}&groupId={}",
                EXISTING_USER_MAIL, ACCESS_GROUP_ID
            ),
            &user_token(),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Success");
    assert!(app.directory.is_member(EXISTING_USER_ID));
}

#[tokio::test]
async fn add_to_group_without_parameters_reports_them_missing() {
    let app = spawn_app(MockDirectory::new(), MockIdentityTokens::new()).await;

    let (status, body) = app.post("/api/users/AddToGroup", &user_token()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "MissingParameters");
}

#[tokio::test]
async fn remove_user_from_group_reports_a_non_member() {
    let app = spawn_app(
        MockDirectory::new().with_user(existing_user()),
        MockIdentityTokens::new(),
    )
    .await;

    let (status, body) = app
        .post(
            &format!(
                "/api/users/RemoveUserFromGroup?userMail={}&groupId={}",
                EXISTING_USER_MAIL, ACCESS_GROUP_ID
            ),
            &user_token(),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "NotMember");
}

#[tokio::test]
async fn invite_user_completes_the_whole_flow() {
    // The guest stays invisible for one poll round before the directory
    // catches up, then the membership grant goes through.
    let app = spawn_app(
        MockDirectory::new().with_user(existing_user()).hidden_for(1),
        MockIdentityTokens::new(),
    )
    .await;

    let (status, body) = app
        .post(
            &format!("/api/users/InviteUser?userMail={}", EXISTING_USER_MAIL),
            &user_token(),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["inviteSuccess"], true);
    assert_eq!(body["addGroupSuccess"], true);
    assert_eq!(body["addToGroupStatus"], "Success");
    assert_eq!(app.directory.invite_calls(), 1);
    assert!(app.directory.is_member(EXISTING_USER_ID));
}
