pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{openapi::security::SecurityScheme, Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use identity_core::error::AppError;
use identity_core::middleware::request_id_middleware;

use crate::config::UsersConfig;
use crate::middleware::TokenVerifier;
use crate::services::{DirectoryService, InvitationService, TokenBroker};

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::users::can_authenticate_user,
        handlers::users::get_user_status,
        handlers::users::get_logged_in_graph_user,
        handlers::users::get_all_graph_users,
        handlers::users::add_to_group,
        handlers::users::remove_user_from_group,
        handlers::users::invite_user,
    ),
    components(
        schemas(
            models::DirectoryUser,
            models::ProfilePhoto,
            models::UserStatus,
            models::AddToGroupStatus,
            models::RemoveFromGroupStatus,
            models::InviteUserResult,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Users", description = "Directory lookups, group membership and guest invitations"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: UsersConfig,
    pub verifier: Arc<TokenVerifier>,
    pub directory: Arc<dyn DirectoryService>,
    pub broker: TokenBroker,
    pub invitations: Arc<InvitationService>,
    /// Cancelled on shutdown so in-flight invitation polls stop waiting.
    pub shutdown: CancellationToken,
}

pub async fn build_router(state: AppState) -> Result<Router, AppError> {
    // Every user operation requires a valid bearer token and an accepted
    // scope; auth runs first, then the scope check.
    let users_routes = Router::new()
        .route(
            "/api/users/CanAuthenticateUser",
            post(handlers::users::can_authenticate_user),
        )
        .route(
            "/api/users/getuserstatus",
            get(handlers::users::get_user_status),
        )
        .route(
            "/api/users/getloggedingraphuser",
            get(handlers::users::get_logged_in_graph_user),
        )
        .route(
            "/api/users/getallgraphusers",
            get(handlers::users::get_all_graph_users),
        )
        .route("/api/users/AddToGroup", post(handlers::users::add_to_group))
        .route(
            "/api/users/RemoveUserFromGroup",
            post(handlers::users::remove_user_from_group),
        )
        .route("/api/users/InviteUser", post(handlers::users::invite_user))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::require_users_scope,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let mut app = Router::new().route("/health", get(health_check));

    // Only add Swagger UI if enabled in config
    let swagger_enabled = match state.config.environment {
        crate::config::Environment::Dev => true,
        crate::config::Environment::Prod => match state.config.swagger.enabled {
            crate::config::SwaggerMode::Public | crate::config::SwaggerMode::Authenticated => true,
            crate::config::SwaggerMode::Disabled => false,
        },
    };

    if swagger_enabled {
        app =
            app.merge(SwaggerUi::new("/docs").url("/.well-known/openapi.json", ApiDoc::openapi()));
    } else {
        // If Swagger UI is disabled, still provide the OpenAPI JSON for programmatic access
        app = app.route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        );
    }

    let app = app
        .merge(users_routes)
        .with_state(state.clone())
        // Add tracing layer
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        // Add tracing middleware for request_id
        .layer(from_fn(request_id_middleware))
        // Add CORS layer
        .layer(
            CorsLayer::new()
                .allow_origin(
                    state
                        .config
                        .security
                        .allowed_origins
                        .iter()
                        .map(|o| {
                            o.parse::<axum::http::HeaderValue>().unwrap_or_else(|e| {
                                tracing::error!(
                                    "Invalid CORS origin '{}': {}. Using fallback.",
                                    o,
                                    e
                                );
                                axum::http::HeaderValue::from_static("*")
                            })
                        })
                        .collect::<Vec<axum::http::HeaderValue>>(),
                )
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers([
                    axum::http::header::AUTHORIZATION,
                    axum::http::header::CONTENT_TYPE,
                ]),
        );

    Ok(app)
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
    }))
}
