use service_core::observability::logging::init_tracing;
use sso_service::{
    config::SsoConfig,
    services::{LoginCollaborators, MockUserRepository, StaticLicense, TracingAuditSink},
    SsoEngine,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    // Load configuration - fail fast if invalid
    let config = SsoConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting SSO engine"
    );

    // The headless binary has no backing store wired in yet.
    tracing::warn!("No user repository configured, using the in-memory store");
    let collaborators = LoginCollaborators {
        users: Arc::new(MockUserRepository::new()),
        directories: Vec::new(),
        licenses: Arc::new(StaticLicense::new(None)),
        audit: Arc::new(TracingAuditSink),
    };

    let engine = SsoEngine::start(&config, collaborators)?;

    shutdown_signal().await;

    let grace = Duration::from_secs(config.common.shutdown_grace_seconds);
    if tokio::time::timeout(grace, engine.shutdown()).await.is_err() {
        tracing::warn!(grace_secs = grace.as_secs(), "Background tasks did not stop in time");
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
