//! finitech ledger - outbox worker
//!
//! Runs the outbox processor and the maintenance scheduler against the
//! Postgres ledger until Ctrl+C or SIGTERM.

use std::sync::Arc;

use finitech_ledger::db;
use finitech_ledger::jobs::JobScheduler;
use finitech_ledger::outbox::{EventRegistry, LoggingEventPublisher, OutboxProcessor, OutboxStore};
use finitech_ledger::store::PgLedgerStore;
use finitech_ledger::{Config, Shutdown};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging
fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "finitech_ledger=debug,outbox_worker=debug".into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(config.json_logs());

    tracing::info!(environment = %config.environment, "Starting finitech outbox worker");
    tracing::info!("Connecting to database...");

    let pool = db::connect(&config.database_url, config.database_max_connections).await?;
    db::verify_connection(&pool).await?;

    if !db::check_schema(&pool).await? {
        if config.is_production() {
            tracing::error!("Database schema is not complete. Please run migrations.");
            return Err(anyhow::anyhow!("Database schema incomplete"));
        }
        tracing::warn!("Database schema is not complete, applying it");
        db::apply_schema(&pool).await?;
    }

    tracing::info!("Database connected successfully");

    let store: Arc<dyn OutboxStore> = Arc::new(PgLedgerStore::new(pool.clone()));
    let shutdown = Shutdown::new();

    let processor = OutboxProcessor::new(
        store.clone(),
        Arc::new(LoggingEventPublisher),
        Arc::new(EventRegistry::ledger_events()),
        config.outbox_processor(),
    );
    let processor_handle = processor.start(shutdown.clone());

    let scheduler_handle = JobScheduler::with_config(store, config.job_scheduler())
        .start(shutdown.clone());

    shutdown_signal().await?;
    shutdown.trigger();

    // In-flight cycles finish before the tasks return
    if let Err(e) = processor_handle.await {
        tracing::error!(error = %e, "Outbox processor task panicked");
    }
    if let Err(e) = scheduler_handle.await {
        tracing::error!(error = %e, "Job scheduler task panicked");
    }

    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
            }
            _ = terminate.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
    }

    Ok(())
}
