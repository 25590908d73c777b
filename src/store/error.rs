//! Store Errors
//!
//! Error types for ledger and outbox persistence.

use uuid::Uuid;

/// Errors that can occur in the ledger and outbox stores
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Optimistic concurrency conflict on a balance slot
    #[error("Concurrency conflict for balance {account_id}/{currency_code}: expected version {expected}")]
    VersionConflict {
        account_id: Uuid,
        currency_code: String,
        expected: i64,
    },

    /// Another entry already claimed this idempotency key
    #[error("Idempotency key already used: {0}")]
    DuplicateIdempotencyKey(String),

    /// The original entry already has a void entry
    #[error("Entry {0} already has a void entry")]
    DuplicateVoid(Uuid),

    /// Outbox message is not in Processing state
    #[error("Outbox message {0} is not claimed")]
    MessageNotClaimed(Uuid),

    /// Stored data could not be mapped back to domain types
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Check if this error is an optimistic concurrency conflict
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::VersionConflict { .. } | StoreError::Database(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_is_retryable() {
        let conflict = StoreError::VersionConflict {
            account_id: Uuid::new_v4(),
            currency_code: "MAD".to_string(),
            expected: 1,
        };
        assert!(conflict.is_retryable());
        assert!(conflict.is_version_conflict());

        let duplicate = StoreError::DuplicateIdempotencyKey("k1".to_string());
        assert!(!duplicate.is_retryable());
        assert!(!duplicate.is_version_conflict());
    }
}
