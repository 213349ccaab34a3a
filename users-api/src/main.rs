use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use identity_core::observability::logging::init_tracing;
use users_api::{
    build_router,
    config::UsersConfig,
    middleware::TokenVerifier,
    services::{
        CaeDirectory, ClientCredentialsTokenSource, DirectoryService, HttpDirectoryClient,
        InvitationService, LogChallengeSink, OAuthTokenService, ServiceError, TokenBroker,
    },
    AppState,
};

#[tokio::main]
async fn main() -> Result<(), identity_core::error::AppError> {
    // Load configuration - fail fast if invalid
    let config = UsersConfig::from_env()?;

    // Initialize tracing/logging using shared logic
    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting user directory service"
    );

    // Delegated acquisitions share one identity service so the account
    // cache survives across requests.
    let identity = Arc::new(OAuthTokenService::new(&config.identity));
    let broker = TokenBroker::new(identity);
    tracing::info!("Token broker initialized");

    // Directory reads and writes run under the service's own
    // client-credentials identity, wrapped with the challenge fallback.
    let app_tokens = Arc::new(ClientCredentialsTokenSource::new(
        &config.identity,
        config.directory.app_scope(),
    ));
    let client = HttpDirectoryClient::new(config.directory.base_url(), app_tokens)
        .map_err(ServiceError::from)?;
    let directory: Arc<dyn DirectoryService> = Arc::new(CaeDirectory::new(
        Arc::new(client),
        Arc::new(LogChallengeSink),
        config.directory.scopes.clone(),
    ));
    tracing::info!(endpoint = %config.directory.base_url(), "Directory client initialized");

    let invitations = Arc::new(InvitationService::new(
        directory.clone(),
        config.poll.clone(),
        config.directory.access_group_id.clone(),
    ));

    let verifier = Arc::new(TokenVerifier::new(
        &config.security.public_key_path,
        config.security.audience.as_deref(),
    )?);
    tracing::info!("Token verifier initialized");

    let shutdown = CancellationToken::new();

    let state = AppState {
        config: config.clone(),
        verifier,
        directory,
        broker,
        invitations,
        shutdown: shutdown.clone(),
    };

    // Build application router
    let app = build_router(state).await?;

    // Start server
    let addr = config.common.socket_addr();

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown))
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    // In-flight invitation polls observe the cancellation and stop waiting
    // so request draining finishes promptly.
    shutdown.cancel();
}
