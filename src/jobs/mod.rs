//! Scheduled Jobs
//!
//! Background maintenance for the outbox table: purge delivered rows past
//! their retention and surface the Failed backlog for operators.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

use crate::outbox::OutboxStore;
use crate::shutdown::Shutdown;
use crate::store::StoreError;

/// How many failed messages a report lists in the log
const FAILED_SAMPLE_SIZE: i64 = 10;

// =========================================================================
// Completed Outbox Purge
// =========================================================================

/// Delete Completed outbox messages processed more than `retention` ago
pub async fn purge_completed_outbox_messages(
    store: &dyn OutboxStore,
    retention: Duration,
) -> Result<u64, JobError> {
    let retention = chrono::Duration::from_std(retention)
        .map_err(|_| JobError::InvalidRetention(retention))?;
    let rows_deleted = store.purge_completed(Utc::now() - retention).await?;

    if rows_deleted > 0 {
        tracing::info!(
            rows_deleted = rows_deleted,
            "Purged completed outbox messages"
        );
    }

    Ok(rows_deleted)
}

// =========================================================================
// Failed Outbox Report
// =========================================================================

/// Log the Failed backlog; returns the number of Failed messages
pub async fn report_failed_outbox_messages(store: &dyn OutboxStore) -> Result<i64, JobError> {
    let counts = store.status_counts().await?;

    if counts.failed > 0 {
        let sample = store.failed_messages(FAILED_SAMPLE_SIZE).await?;
        for message in &sample {
            tracing::warn!(
                message_id = %message.id,
                event_type = %message.event_type,
                retry_count = message.retry_count,
                error = message.error.as_deref().unwrap_or("-"),
                "Outbox message parked as failed"
            );
        }
        tracing::warn!(
            failed = counts.failed,
            pending = counts.pending,
            processing = counts.processing,
            "Outbox has failed messages awaiting manual intervention"
        );
    }

    Ok(counts.failed)
}

// =========================================================================
// Job Scheduler
// =========================================================================

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval for the completed-message purge (default: 1 hour)
    pub outbox_cleanup_interval: Duration,
    /// Interval for the failed backlog report (default: 5 minutes)
    pub failed_report_interval: Duration,
    /// Age after which Completed messages are purged (default: 7 days)
    pub completed_retention: Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            outbox_cleanup_interval: Duration::from_secs(3600),
            failed_report_interval: Duration::from_secs(300),
            completed_retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Job Scheduler - runs periodic maintenance tasks
pub struct JobScheduler {
    store: Arc<dyn OutboxStore>,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    /// Create a new job scheduler
    pub fn new(store: Arc<dyn OutboxStore>) -> Self {
        Self {
            store,
            config: JobSchedulerConfig::default(),
        }
    }

    /// Create with custom configuration
    pub fn with_config(store: Arc<dyn OutboxStore>, config: JobSchedulerConfig) -> Self {
        Self { store, config }
    }

    /// Start the job scheduler in the background
    pub fn start(self, shutdown: Shutdown) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    /// Run the scheduler loop until shutdown
    async fn run(&self, shutdown: Shutdown) {
        tracing::info!("Job scheduler started");

        let mut cleanup_interval = interval(self.config.outbox_cleanup_interval);
        let mut report_interval = interval(self.config.failed_report_interval);
        cleanup_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        report_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = cleanup_interval.tick() => {
                    if let Err(e) = purge_completed_outbox_messages(
                        self.store.as_ref(),
                        self.config.completed_retention,
                    ).await {
                        tracing::error!(error = %e, "Outbox cleanup failed");
                    }
                }
                _ = report_interval.tick() => {
                    if let Err(e) = report_failed_outbox_messages(self.store.as_ref()).await {
                        tracing::error!(error = %e, "Failed outbox report failed");
                    }
                }
            }
        }

        tracing::info!("Job scheduler stopped");
    }

    /// Run all maintenance jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match purge_completed_outbox_messages(self.store.as_ref(), self.config.completed_retention)
            .await
        {
            Ok(count) => report.outbox_messages_purged = count,
            Err(e) => report.errors.push(format!("Outbox cleanup: {}", e)),
        }

        match report_failed_outbox_messages(self.store.as_ref()).await {
            Ok(count) => report.failed_outbox_messages = count,
            Err(e) => report.errors.push(format!("Failed outbox report: {}", e)),
        }

        report.completed_at = Utc::now();
        report
    }
}

/// Report from running maintenance jobs
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub outbox_messages_purged: u64,
    pub failed_outbox_messages: i64,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Retention {0:?} is out of range")]
    InvalidRetention(Duration),
}

// =========================================================================
// Tests
// =========================================================================
