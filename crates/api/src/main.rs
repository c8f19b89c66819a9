use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use domain::services::{spawn_outbox, Mailer, OutboxConfig, PushSender};
use domain::store::{MemoryStore, Store};
use persistence::PgStore;
use sqlx::PgPool;
use tracing::{info, warn};

use foodshare_api::app::{create_app, AppState};
use foodshare_api::config::{Config, StorageBackend};
use foodshare_api::jobs::{InviteUsersJob, JobScheduler, PoolMetricsJob, RateLimitCleanupJob};
use foodshare_api::middleware::{init_metrics, logging::init_logging};
use foodshare_api::services::{EmailService, ExpoPushService};

/// Opens the configured store. Returns the pool too when PostgreSQL backs it.
async fn open_store(config: &Config) -> Result<(Arc<dyn Store>, Option<PgPool>)> {
    match config.storage.backend {
        StorageBackend::Postgres => {
            let db_config = persistence::db::DatabaseConfig::from(&config.database);
            let pool = persistence::db::create_pool(&db_config)
                .await
                .context("Failed to connect to database")?;

            info!("Running database migrations...");
            persistence::db::run_migrations(&pool)
                .await
                .context("Failed to run migrations")?;
            info!("Migrations completed");

            Ok((Arc::new(PgStore::new(pool.clone())), Some(pool)))
        }
        StorageBackend::Memory => {
            warn!("Using in-memory store; all data is lost on restart");
            Ok((Arc::new(MemoryStore::new()), None))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = Config::load()?;

    init_logging(&config.logging).context("Failed to initialize logging")?;
    init_metrics().context("Failed to install metrics recorder")?;

    info!("Starting FoodShare API v{}", env!("CARGO_PKG_VERSION"));

    let (store, pool) = open_store(&config).await?;

    if let Some(threshold) = config.admission.initial_threshold {
        let mut tx = store.begin().await?;
        tx.set_property(&config.admission.threshold_property, &threshold.to_string())
            .await?;
        tx.commit().await?;
        info!(threshold, "Admission threshold initialized");
    }

    let mailer: Arc<dyn Mailer> = Arc::new(EmailService::new(config.email.clone())?);
    let push: Arc<dyn PushSender> = Arc::new(ExpoPushService::new(config.push.clone())?);
    let (outbox, outbox_handle) = spawn_outbox(mailer, push, OutboxConfig::from(&config.outbox));

    let addr = config.socket_addr()?;
    let shutdown_grace = Duration::from_secs(config.server.shutdown_grace_secs);
    let invite_job_enabled = config.admission.invite_job_enabled;
    let invite_interval = config.admission.invite_interval_minutes;

    let state = AppState::new(config, store, outbox)?;

    let mut scheduler = JobScheduler::new();
    if invite_job_enabled {
        scheduler.register(InviteUsersJob::new(state.admission.clone(), invite_interval));
    }
    if let Some(limiter) = &state.rate_limiter {
        scheduler.register(RateLimitCleanupJob::new(Arc::clone(limiter)));
    }
    if let Some(pool) = pool {
        scheduler.register(PoolMetricsJob::new(pool));
    }
    scheduler.start();

    let app = create_app(state);

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown();
    scheduler.wait_for_shutdown(shutdown_grace).await;

    // Every Outbox clone is gone with the router and the jobs, so the
    // workers finish the queue and exit.
    outbox_handle.join(shutdown_grace).await;

    info!("Shutdown complete");
    Ok(())
}
