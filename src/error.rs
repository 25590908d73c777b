//! Error handling module
//!
//! Centralized error type returned by ledger handlers and queries.

use crate::domain::{AmountError, DomainError};
use crate::store::StoreError;

/// Ledger-wide Result type
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger error types
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    // Business rule violations; nothing was written
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Optimistic concurrency
    #[error("Concurrency conflict persisted after {attempts} attempts")]
    ConcurrencyExhausted { attempts: u32 },

    #[error("Operation cancelled before commit")]
    Cancelled,

    // Infrastructure
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<AmountError> for LedgerError {
    fn from(err: AmountError) -> Self {
        LedgerError::Domain(err.into())
    }
}

impl LedgerError {
    /// Stable machine-readable code
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::Domain(e) => match e {
                DomainError::InsufficientBalance { .. } => "insufficient_balance",
                DomainError::InvalidAmount(_) => "invalid_amount",
                DomainError::InvalidState(_) => "invalid_state",
                DomainError::InvalidCurrency(_) => "invalid_currency",
                DomainError::InvalidEntryType(_) => "invalid_entry_type",
                DomainError::InvalidInput(_) => "invalid_input",
                DomainError::InvalidIdempotencyKey(_) => "invalid_idempotency_key",
                DomainError::EntryNotFound(_) => "entry_not_found",
                DomainError::AlreadyVoided { .. } => "already_voided",
            },
            LedgerError::ConcurrencyExhausted { .. } => "concurrency_conflict",
            LedgerError::Cancelled => "cancelled",
            LedgerError::Store(StoreError::VersionConflict { .. }) => "version_conflict",
            LedgerError::Store(_) => "store_error",
            LedgerError::Serialization(_) => "serialization_error",
            LedgerError::Internal(_) => "internal_error",
        }
    }

    /// Business failures the caller should surface, not retry
    pub fn is_business_error(&self) -> bool {
        matches!(self, LedgerError::Domain(_))
    }

    /// Whether resubmitting the same command may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::ConcurrencyExhausted { .. } => true,
            LedgerError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub(crate) fn is_version_conflict(&self) -> bool {
        matches!(self, LedgerError::Store(e) if e.is_version_conflict())
    }
}
