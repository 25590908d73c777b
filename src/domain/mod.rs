//! Domain module
//!
//! Core domain types and business rules.

pub mod amount;
pub mod context;
pub mod error;
pub mod events;

pub use amount::{AmountError, CurrencyCode, MinorUnits};
pub use context::OperationContext;
pub use error::DomainError;
pub use events::{
    BalanceUpdated, EntryCreated, EntryVoided, EventPayload, FundsReserved, LedgerEvent,
    ReservationReleased,
};
