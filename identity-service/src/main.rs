use identity_service::{
    build_router,
    config::{IdentityConfig, RateLimitBackend},
    services::{LogNotifier, OutboundNotifier, PgRepository, RedisStore, SharedNotifier},
    utils::SystemClock,
    AppState, Collaborators,
};
use service_core::error::AppError;
use service_core::middleware::rate_limit::{
    GovernorRateLimiter, RateQuota, RedisRateLimiter, SharedRateLimiter,
};
use service_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();

    let config = Arc::new(IdentityConfig::from_env()?);

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting identity service"
    );

    let repo = PgRepository::connect(&config.database)
        .await
        .map_err(|e| AppError::InternalError(anyhow::Error::new(e)))?;
    repo.run_migrations()
        .await
        .map_err(|e| AppError::InternalError(anyhow::Error::new(e)))?;
    tracing::info!("Database initialized successfully");

    let store = RedisStore::connect(&config.redis).await?;
    tracing::info!("Ephemeral store initialized");

    let quota = RateQuota::new(config.rate_limit.capacity, config.rate_limit_window())?;
    let rate_limiter: SharedRateLimiter = match config.rate_limit.backend {
        RateLimitBackend::Memory => Arc::new(GovernorRateLimiter::new(quota)?),
        RateLimitBackend::Redis => Arc::new(RedisRateLimiter::new(
            store.connection(),
            quota,
            config.redis.timeout,
        )),
    };
    tracing::info!(
        backend = ?config.rate_limit.backend,
        capacity = config.rate_limit.capacity,
        window_seconds = config.rate_limit.window_seconds,
        "Rate limiter initialized"
    );

    let notifier: SharedNotifier =
        if config.delivery.smtp.is_some() || config.delivery.twilio.is_some() {
            Arc::new(
                OutboundNotifier::from_config(&config.delivery)
                    .map_err(|e| AppError::ConfigError(anyhow::Error::new(e)))?,
            )
        } else {
            tracing::warn!("No delivery provider configured; codes and links are only logged");
            Arc::new(LogNotifier)
        };

    let state = AppState::new(
        config.clone(),
        Collaborators {
            repo: Arc::new(repo),
            store: Arc::new(store),
            notifier,
            rate_limiter,
            clock: Arc::new(SystemClock),
            code_generator: None,
        },
    )?;

    let app = build_router(state);

    let addr = config.common.socket_addr();
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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
}
