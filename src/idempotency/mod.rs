//! Idempotency module
//!
//! Caller-supplied keys that give a posting at most one effect. The store
//! enforces global uniqueness of the key on `ledger_entries`; a replay returns
//! the outcome of the entry that claimed it.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::DomainError;

/// Maximum key length accepted
const MAX_KEY_LEN: usize = 100;

/// Validated idempotency key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Create a key, trimming surrounding whitespace.
    ///
    /// # Errors
    /// `DomainError::InvalidIdempotencyKey` if the key is blank or longer than 100 characters.
    pub fn new(value: &str) -> Result<Self, DomainError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(DomainError::InvalidIdempotencyKey(
                "key cannot be empty".to_string(),
            ));
        }
        if value.chars().count() > MAX_KEY_LEN {
            return Err(DomainError::InvalidIdempotencyKey(format!(
                "key exceeds {} characters",
                MAX_KEY_LEN
            )));
        }

        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        IdempotencyKey::new(&value)
    }
}

impl From<IdempotencyKey> for String {
    fn from(key: IdempotencyKey) -> Self {
        key.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_trimmed() {
        let key = IdempotencyKey::new("  k1 ").unwrap();
        assert_eq!(key.as_str(), "k1");
        assert_eq!(key.to_string(), "k1");
    }

    #[test]
    fn test_blank_key_rejected() {
        assert!(matches!(
            IdempotencyKey::new("   "),
            Err(DomainError::InvalidIdempotencyKey(_))
        ));
    }

    #[test]
    fn test_long_key_rejected() {
        let key = "k".repeat(MAX_KEY_LEN + 1);
        assert!(IdempotencyKey::new(&key).is_err());
        assert!(IdempotencyKey::new(&key[..MAX_KEY_LEN]).is_ok());
    }
}
