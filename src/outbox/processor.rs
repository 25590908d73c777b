//! Outbox Processor
//!
//! Background worker that claims pending outbox messages, decodes them through
//! the [`EventRegistry`] and hands them to the [`EventPublisher`]. Delivery is
//! at-least-once: a message is only marked Completed after a successful
//! publish, and an expired claim is picked up again.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::shutdown::Shutdown;
use crate::store::StoreError;

use super::{
    EventPublisher, EventRegistry, OutboxError, OutboxMessage, OutboxStatus, OutboxStore,
    PublishedEvent,
};

/// Processor tuning
#[derive(Debug, Clone)]
pub struct OutboxProcessorConfig {
    /// Delay between polling cycles
    pub poll_interval: Duration,
    /// Maximum messages claimed per cycle
    pub batch_size: usize,
    /// Failed deliveries before a message is parked as Failed
    pub max_retries: i32,
    /// Age after which a Processing claim may be taken over
    pub claim_lease: Duration,
    /// Delay before the first cycle
    pub startup_delay: Duration,
}

impl Default for OutboxProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            batch_size: 50,
            max_retries: 3,
            claim_lease: Duration::from_secs(300),
            startup_delay: Duration::from_secs(5),
        }
    }
}

/// Outcome of one polling cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingReport {
    pub claimed: usize,
    pub completed: usize,
    /// Failed attempts that went back to Pending
    pub retried: usize,
    /// Messages parked as Failed this cycle
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageOutcome {
    Completed,
    Retried,
    Failed,
    /// A status update could not be written; the claim lease will expire
    Abandoned,
}

pub struct OutboxProcessor {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn EventPublisher>,
    registry: Arc<EventRegistry>,
    config: OutboxProcessorConfig,
}

impl OutboxProcessor {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        publisher: Arc<dyn EventPublisher>,
        registry: Arc<EventRegistry>,
        config: OutboxProcessorConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &OutboxProcessorConfig {
        &self.config
    }

    /// Start the processor in a background task
    pub fn start(self, shutdown: Shutdown) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    /// Poll until shutdown. A cycle in flight finishes before the loop exits.
    pub async fn run(&self, shutdown: Shutdown) {
        tracing::info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            max_retries = self.config.max_retries,
            "Outbox processor starting"
        );

        tokio::select! {
            _ = shutdown.wait() => {
                tracing::info!("Outbox processor stopped before first cycle");
                return;
            }
            _ = tokio::time::sleep(self.config.startup_delay) => {}
        }

        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(report) if report.claimed > 0 => {
                            tracing::info!(
                                claimed = report.claimed,
                                completed = report.completed,
                                retried = report.retried,
                                failed = report.failed,
                                "Outbox cycle finished"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(error = %e, "Outbox cycle failed");
                        }
                    }
                }
            }
        }

        tracing::info!("Outbox processor stopped");
    }

    /// Claim one batch and try to deliver every message in it
    pub async fn run_once(&self) -> Result<ProcessingReport, OutboxError> {
        let stale_before = stale_before(Utc::now(), self.config.claim_lease);
        let batch = self
            .store
            .claim_batch(self.config.batch_size, stale_before)
            .await?;

        let mut report = ProcessingReport {
            claimed: batch.len(),
            ..ProcessingReport::default()
        };

        for message in batch {
            match self.process_message(message).await {
                MessageOutcome::Completed => report.completed += 1,
                MessageOutcome::Retried => report.retried += 1,
                MessageOutcome::Failed => report.failed += 1,
                MessageOutcome::Abandoned => {}
            }
        }

        Ok(report)
    }

    async fn process_message(&self, message: OutboxMessage) -> MessageOutcome {
        let OutboxMessage {
            id,
            event_type,
            payload,
            occurred_at,
            claimed_at,
            correlation_id,
            initiated_by,
            retry_count,
            ..
        } = message;

        // Every status update is fenced by the claim this cycle holds
        let Some(claimed_at) = claimed_at else {
            return self.abandon(id, StoreError::MessageNotClaimed(id));
        };

        let event = match self.registry.decode(&event_type, payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(
                    message_id = %id,
                    event_type = %event_type,
                    error = %e,
                    "Outbox message cannot be decoded, marking failed"
                );
                return match self.store.mark_failed(id, claimed_at, &e.to_string()).await {
                    Ok(()) => MessageOutcome::Failed,
                    Err(store_err) => self.abandon(id, store_err),
                };
            }
        };

        let published = PublishedEvent {
            event_id: id,
            event_type,
            occurred_at,
            correlation_id,
            initiated_by,
            payload: event,
        };

        match self.publisher.publish(&published).await {
            Ok(()) => match self.store.mark_completed(id, claimed_at).await {
                Ok(()) => {
                    tracing::debug!(
                        message_id = %id,
                        event_type = %published.event_type,
                        "Outbox message published"
                    );
                    MessageOutcome::Completed
                }
                Err(e) => self.abandon(id, e),
            },
            Err(e) => {
                let error = e.to_string();
                match self
                    .store
                    .record_failure(id, claimed_at, &error, self.config.max_retries)
                    .await
                {
                    Ok(OutboxStatus::Failed) => {
                        tracing::error!(
                            message_id = %id,
                            event_type = %published.event_type,
                            attempts = retry_count + 1,
                            error = %error,
                            "Outbox message exhausted retries, marking failed"
                        );
                        MessageOutcome::Failed
                    }
                    Ok(_) => {
                        tracing::warn!(
                            message_id = %id,
                            event_type = %published.event_type,
                            attempt = retry_count + 1,
                            max_retries = self.config.max_retries,
                            error = %error,
                            "Outbox publish failed, will retry"
                        );
                        MessageOutcome::Retried
                    }
                    Err(store_err) => self.abandon(id, store_err),
                }
            }
        }
    }

    fn abandon(&self, id: uuid::Uuid, error: StoreError) -> MessageOutcome {
        tracing::error!(
            message_id = %id,
            error = %error,
            "Could not update outbox message status; it will be reclaimed after the lease"
        );
        MessageOutcome::Abandoned
    }
}

/// Claims taken before this instant have outlived `lease`.
///
/// A lease too long to represent saturates to the Unix epoch, so such claims
/// are never taken over.
fn stale_before(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lease)
        .ok()
        .and_then(|lease| now.checked_sub_signed(lease))
        .unwrap_or_default()
}
