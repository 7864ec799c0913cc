use credential_service::{
    config::CredentialConfig,
    db,
    services::{redis as redis_cache, SystemClock},
    Caches, CredentialServices,
};
use service_core::error::AppError;
use service_core::observability::logging::init_tracing;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = CredentialConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;

    tracing::info!(
        service = %config.service_name,
        environment = ?config.environment,
        interval_seconds = config.sweep.interval_seconds,
        "Starting credential sweeper"
    );

    let database = Arc::new(db::open(&config.database).await?);

    let caches = match &config.redis {
        Some(redis_config) => {
            let manager = redis_cache::connect(redis_config).await?;
            redis_cache::health_check(&manager).await?;
            Caches::redis(manager)
        }
        None => {
            tracing::info!("No Redis configured, running without cache");
            Caches::none()
        }
    };

    let services =
        CredentialServices::build(&config, database, caches, Arc::new(SystemClock))?;

    let shutdown = CancellationToken::new();
    let sweeper = tokio::spawn(run_sweeper(
        services.clone(),
        config.sweep.interval(),
        shutdown.clone(),
    ));

    shutdown_signal().await;
    shutdown.cancel();
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "Sweeper task panicked");
    }

    tracing::info!(metrics = %services.metrics.encode(), "Final counters");
    tracing::info!("Credential sweeper stopped");
    Ok(())
}

async fn run_sweeper(
    services: CredentialServices,
    period: std::time::Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let report = services.sweep_expired().await;
                tracing::info!(
                    sessions = report.sessions,
                    api_keys = report.api_keys,
                    magic_links = report.magic_links,
                    failures = report.failures,
                    "Expiry sweep finished"
                );
            }
        }
    }
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
            Ok(mut stream) => {
                stream.recv().await;
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
            tracing::info!("Received SIGINT, stopping sweeper");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, stopping sweeper");
        },
    }
}
