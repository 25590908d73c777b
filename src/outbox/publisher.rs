//! Event Publishing
//!
//! The processor hands decoded events to an [`EventPublisher`]. Two
//! implementations ship with the crate: an in-process dispatcher that fans
//! out to registered handlers, and a publisher that only writes a log line.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::LedgerEvent;

/// A decoded outbox message on its way to subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub correlation_id: Option<String>,
    pub initiated_by: Option<String>,
    pub payload: LedgerEvent,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Transport unavailable: {0}")]
    Transport(String),

    #[error("Handler '{handler}' failed: {reason}")]
    Handler { handler: String, reason: String },
}

/// Delivers events to subscribers
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &PublishedEvent) -> Result<(), PublishError>;
}

/// A subscriber inside the process
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this handler wants the event; defaults to everything
    fn handles(&self, _event: &PublishedEvent) -> bool {
        true
    }

    async fn handle(&self, event: &PublishedEvent) -> Result<(), String>;
}

// =========================================================================
// In-process dispatch
// =========================================================================

/// Dispatches each event to every interested handler, in registration order.
///
/// The first handler error fails the whole publish, so the message is retried
/// and handlers that already succeeded will see it again.
#[derive(Clone, Default)]
pub struct InMemoryEventPublisher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl InMemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, event: &PublishedEvent) -> Result<(), PublishError> {
        for handler in self.handlers.iter().filter(|h| h.handles(event)) {
            handler
                .handle(event)
                .await
                .map_err(|reason| PublishError::Handler {
                    handler: handler.name().to_string(),
                    reason,
                })?;
        }
        Ok(())
    }
}

// =========================================================================
// Log-only
// =========================================================================

/// Writes one structured log line per event
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventPublisher;

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, event: &PublishedEvent) -> Result<(), PublishError> {
        tracing::info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            account_id = %event.payload.account_id(),
            correlation_id = event.correlation_id.as_deref().unwrap_or("-"),
            initiated_by = event.initiated_by.as_deref().unwrap_or("-"),
            occurred_at = %event.occurred_at,
            "Published ledger event"
        );
        Ok(())
    }
}
