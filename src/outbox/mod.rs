//! Transactional Outbox
//!
//! Events are written to `outbox_messages` in the same transaction as the
//! ledger change that produced them, then delivered asynchronously by the
//! [`OutboxProcessor`].

mod emitter;
mod message;
mod processor;
mod publisher;
mod registry;
mod store;

pub use emitter::EventEmitter;
pub use message::{OutboxMessage, OutboxStatus, OutboxStatusCounts};
pub use processor::{OutboxProcessor, OutboxProcessorConfig, ProcessingReport};
pub use publisher::{
    EventHandler, EventPublisher, InMemoryEventPublisher, LoggingEventPublisher, PublishError,
    PublishedEvent,
};
pub use registry::EventRegistry;
pub use store::OutboxStore;

use crate::store::StoreError;

/// Outbox error types
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("No decoder registered for event type '{0}'")]
    UnknownEventType(String),

    #[error("Payload of '{event_type}' cannot be decoded: {source}")]
    Decode {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}
