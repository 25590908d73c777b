//! Ledger Entry
//!
//! Append-only record of a posting. Entries are never updated; a reversal is
//! a new entry pointing back at the original through `original_entry_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::{CurrencyCode, DomainError, EntryCreated, EntryVoided, MinorUnits};
use crate::idempotency::IdempotencyKey;

use super::AccountBalance;

const MAX_DESCRIPTION_LEN: usize = 500;
const MAX_REFERENCE_LEN: usize = 100;

/// Direction of a posting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    Debit,
    Credit,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Debit => "Debit",
            EntryType::Credit => "Credit",
        }
    }

    /// The direction that cancels this one
    pub fn opposite(&self) -> Self {
        match self {
            EntryType::Debit => EntryType::Credit,
            EntryType::Credit => EntryType::Debit,
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debit" => Ok(EntryType::Debit),
            "credit" => Ok(EntryType::Credit),
            _ => Err(DomainError::InvalidEntryType(s.to_string())),
        }
    }
}

/// Immutable ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub account_id: Uuid,
    pub currency_code: CurrencyCode,
    pub entry_type: EntryType,
    pub amount_minor_units: i64,
    pub description: String,
    pub reference: Option<String>,
    pub transaction_id: Option<Uuid>,
    /// Set only on void entries
    pub original_entry_id: Option<Uuid>,
    pub entry_date: DateTime<Utc>,
    /// Balance of the slot immediately after this entry
    pub running_balance: i64,
    pub idempotency_key: Option<IdempotencyKey>,
}

/// Everything needed to append a regular posting
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub entry_type: EntryType,
    pub amount: MinorUnits,
    pub description: String,
    pub reference: Option<String>,
    pub transaction_id: Option<Uuid>,
    pub idempotency_key: Option<IdempotencyKey>,
}

impl LedgerEntry {
    /// Record a posting that has already been applied to `balance`.
    pub fn post(
        balance: &AccountBalance,
        new_entry: NewEntry,
    ) -> Result<(Self, EntryCreated), DomainError> {
        validate_text("description", &new_entry.description, MAX_DESCRIPTION_LEN)?;
        if let Some(reference) = &new_entry.reference {
            validate_text("reference", reference, MAX_REFERENCE_LEN)?;
        }

        let entry = Self {
            id: Uuid::new_v4(),
            account_id: balance.account_id(),
            currency_code: balance.currency_code().clone(),
            entry_type: new_entry.entry_type,
            amount_minor_units: new_entry.amount.value(),
            description: new_entry.description,
            reference: new_entry.reference,
            transaction_id: new_entry.transaction_id,
            original_entry_id: None,
            entry_date: Utc::now(),
            running_balance: balance.balance_minor_units(),
            idempotency_key: new_entry.idempotency_key,
        };

        let event = entry.created_event();
        Ok((entry, event))
    }

    /// Record the compensating entry for `original`, already applied to `balance`.
    pub fn void(
        original: &LedgerEntry,
        reason: &str,
        balance: &AccountBalance,
    ) -> Result<(Self, EntryCreated, EntryVoided), DomainError> {
        if original.is_void() {
            return Err(DomainError::InvalidState(format!(
                "entry {} is itself a void and cannot be reversed",
                original.id
            )));
        }

        let description = format!("VOID: {}", reason.trim());
        validate_text("description", &description, MAX_DESCRIPTION_LEN)?;

        let entry = Self {
            id: Uuid::new_v4(),
            account_id: original.account_id,
            currency_code: original.currency_code.clone(),
            entry_type: original.entry_type.opposite(),
            amount_minor_units: original.amount_minor_units,
            description,
            reference: Some(format!("VOID-{}", original.id)),
            transaction_id: original.transaction_id,
            original_entry_id: Some(original.id),
            entry_date: Utc::now(),
            running_balance: balance.balance_minor_units(),
            idempotency_key: None,
        };

        let created = entry.created_event();
        let voided = EntryVoided {
            original_entry_id: original.id,
            void_entry_id: entry.id,
            account_id: entry.account_id,
            reason: reason.trim().to_string(),
        };

        Ok((entry, created, voided))
    }

    pub fn is_void(&self) -> bool {
        self.original_entry_id.is_some()
    }

    /// Signed effect of this entry on its balance slot
    pub fn signed_amount(&self) -> i64 {
        match self.entry_type {
            EntryType::Credit => self.amount_minor_units,
            EntryType::Debit => -self.amount_minor_units,
        }
    }

    fn created_event(&self) -> EntryCreated {
        EntryCreated {
            entry_id: self.id,
            account_id: self.account_id,
            currency_code: self.currency_code.to_string(),
            amount_minor_units: self.amount_minor_units,
            entry_type: self.entry_type.to_string(),
            running_balance: self.running_balance,
            reference: self.reference.clone(),
        }
    }
}

fn validate_text(field: &str, value: &str, max_len: usize) -> Result<(), DomainError> {
    if value.chars().count() > max_len {
        return Err(DomainError::InvalidInput(format!(
            "{} exceeds {} characters",
            field, max_len
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credited_slot(amount: i64) -> AccountBalance {
        let mut balance = AccountBalance::open(Uuid::new_v4(), CurrencyCode::new("MAD").unwrap());
        balance.credit(MinorUnits::new(amount).unwrap()).unwrap();
        balance
    }

    fn credit_entry(amount: i64) -> NewEntry {
        NewEntry {
            entry_type: EntryType::Credit,
            amount: MinorUnits::new(amount).unwrap(),
            description: "deposit".to_string(),
            reference: Some("REF-1".to_string()),
            transaction_id: None,
            idempotency_key: None,
        }
    }

    #[test]
    fn test_entry_type_parse() {
        assert_eq!("credit".parse::<EntryType>().unwrap(), EntryType::Credit);
        assert_eq!("DEBIT".parse::<EntryType>().unwrap(), EntryType::Debit);
        assert!(matches!(
            "transfer".parse::<EntryType>(),
            Err(DomainError::InvalidEntryType(_))
        ));
    }

    #[test]
    fn test_post_captures_running_balance() {
        let balance = credited_slot(50_000);
        let (entry, event) = LedgerEntry::post(&balance, credit_entry(50_000)).unwrap();

        assert_eq!(entry.running_balance, 50_000);
        assert_eq!(entry.account_id, balance.account_id());
        assert!(!entry.is_void());
        assert_eq!(event.entry_id, entry.id);
        assert_eq!(event.entry_type, "Credit");
        assert_eq!(event.reference.as_deref(), Some("REF-1"));
    }

    #[test]
    fn test_post_rejects_oversized_description() {
        let balance = credited_slot(1);
        let mut new_entry = credit_entry(1);
        new_entry.description = "x".repeat(MAX_DESCRIPTION_LEN + 1);

        assert!(matches!(
            LedgerEntry::post(&balance, new_entry),
            Err(DomainError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_void_reverses_direction() {
        let mut balance = credited_slot(50_000);
        let (original, _) = LedgerEntry::post(&balance, credit_entry(50_000)).unwrap();

        balance.debit(MinorUnits::new(50_000).unwrap()).unwrap();
        let (void, created, voided) =
            LedgerEntry::void(&original, "customer request", &balance).unwrap();

        assert_eq!(void.entry_type, EntryType::Debit);
        assert_eq!(void.amount_minor_units, original.amount_minor_units);
        assert_eq!(void.original_entry_id, Some(original.id));
        assert_eq!(void.description, "VOID: customer request");
        assert_eq!(void.reference, Some(format!("VOID-{}", original.id)));
        assert_eq!(void.running_balance, 0);
        assert_eq!(void.signed_amount() + original.signed_amount(), 0);
        assert_eq!(created.entry_id, void.id);
        assert_eq!(voided.original_entry_id, original.id);
    }

    #[test]
    fn test_void_of_void_rejected() {
        let balance = credited_slot(100);
        let (original, _) = LedgerEntry::post(&balance, credit_entry(100)).unwrap();
        let (void, _, _) = LedgerEntry::void(&original, "oops", &balance).unwrap();

        assert!(matches!(
            LedgerEntry::void(&void, "again", &balance),
            Err(DomainError::InvalidState(_))
        ));
    }
}
