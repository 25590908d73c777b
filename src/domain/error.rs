//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use thiserror::Error;
use uuid::Uuid;

use super::amount::AmountError;

/// Business rule violations and domain invariant failures.
///
/// None of these leave a trace in the store: they are raised before any
/// balance mutation, ledger entry or outbox row is written.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Available balance cannot cover the requested amount
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: i64, available: i64 },

    /// Invalid amount (zero, negative, or exceeds limit)
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Operation not allowed in the current balance or entry state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Malformed currency code
    #[error("Invalid currency: {0}")]
    InvalidCurrency(String),

    /// Entry type is neither Debit nor Credit
    #[error("Invalid entry type: {0}")]
    InvalidEntryType(String),

    /// Field fails a length or format rule
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Malformed idempotency key
    #[error("Invalid idempotency key: {0}")]
    InvalidIdempotencyKey(String),

    /// Ledger entry does not exist
    #[error("Ledger entry not found: {0}")]
    EntryNotFound(Uuid),

    /// The entry already has a compensating void entry
    #[error("Ledger entry {entry_id} is already voided")]
    AlreadyVoided { entry_id: Uuid },
}

impl DomainError {
    /// Create an insufficient balance error
    pub fn insufficient_balance(required: i64, available: i64) -> Self {
        Self::InsufficientBalance { required, available }
    }

    /// Check if this is a not-found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::EntryNotFound(_))
    }
}

impl From<AmountError> for DomainError {
    fn from(err: AmountError) -> Self {
        match err {
            AmountError::InvalidCurrency(code) => Self::InvalidCurrency(code),
            other => Self::InvalidAmount(other.to_string()),
        }
    }
}
