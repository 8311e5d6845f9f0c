use std::net::SocketAddr;
use std::sync::Arc;

use identity_service::{
    build_router,
    config::IdentityConfig,
    services::{EmailProvider, LogMailer, OtpEngine, SessionManager, SmtpMailer, TokenService},
    store::{IdentityStore, MemoryStore, PgStore},
    AppState,
};
use service_core::middleware::rate_limit::create_ip_rate_limiter;
use service_core::observability::logging::init_tracing;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    // Load configuration - fail fast if invalid
    let config = IdentityConfig::from_env()?;

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

    let store: Arc<dyn IdentityStore> = match &config.database.url {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .connect(url)
                .await?;
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| {
                    service_core::error::AppError::DatabaseError(anyhow::anyhow!(
                        "Migration failed: {}",
                        e
                    ))
                })?;
            tracing::info!("PostgreSQL store initialized");
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let mailer: Arc<dyn EmailProvider> = match &config.smtp {
        Some(smtp) => Arc::new(SmtpMailer::new(smtp, config.otp.expiry_seconds / 60)?),
        None => {
            tracing::warn!("SMTP not configured, OTP emails will not be delivered");
            Arc::new(LogMailer)
        }
    };

    let tokens = TokenService::new(&config.jwt);
    let sessions = SessionManager::new(store.clone(), tokens);
    let otp = OtpEngine::new(store.clone(), mailer, config.otp.engine_config());

    let otp_rate_limiter = create_ip_rate_limiter(config.rate_limit.otp_send_per_minute, 60);
    let ip_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.global_ip_limit,
        config.rate_limit.global_ip_window_seconds,
    );

    let state = AppState {
        config: config.clone(),
        store,
        otp,
        sessions,
        otp_rate_limiter,
        ip_rate_limiter,
    };

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
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

    // Give in-flight requests time to complete
    tokio::time::sleep(tokio::time::Duration::from_secs(30)).await;
}
