//! finitech ledger library
//!
//! Multi-currency balance ledger with idempotent postings, voids, and a
//! transactional outbox delivered by a background processor.

pub mod aggregate;
pub mod config;
pub mod db;
pub mod domain;
pub mod handlers;
pub mod idempotency;
pub mod jobs;
pub mod outbox;
pub mod query;
pub mod shutdown;
pub mod store;

mod error;

pub use config::Config;
pub use domain::{CurrencyCode, DomainError, LedgerEvent, MinorUnits, OperationContext};
pub use error::{LedgerError, LedgerResult};
pub use shutdown::Shutdown;
