//! Command definitions
//!
//! Commands represent intentions to change a balance slot. They carry raw
//! caller input; handlers validate them before touching the store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::aggregate::EntryType;
use crate::domain::DomainError;

// =========================================================================
// PostTransactionCommand
// =========================================================================

/// Command to credit or debit one balance slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostTransactionCommand {
    pub account_id: Uuid,
    pub currency_code: String,
    pub amount_minor_units: i64,
    pub entry_type: EntryType,
    pub description: String,
    pub reference: Option<String>,
    /// Groups entries belonging to one business transaction
    pub transaction_id: Option<Uuid>,
    pub idempotency_key: Option<String>,
}

impl PostTransactionCommand {
    pub fn new(
        account_id: Uuid,
        currency_code: impl Into<String>,
        amount_minor_units: i64,
        entry_type: EntryType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            account_id,
            currency_code: currency_code.into(),
            amount_minor_units,
            entry_type,
            description: description.into(),
            reference: None,
            transaction_id: None,
            idempotency_key: None,
        }
    }

    pub fn credit(
        account_id: Uuid,
        currency_code: impl Into<String>,
        amount_minor_units: i64,
        description: impl Into<String>,
    ) -> Self {
        Self::new(account_id, currency_code, amount_minor_units, EntryType::Credit, description)
    }

    pub fn debit(
        account_id: Uuid,
        currency_code: impl Into<String>,
        amount_minor_units: i64,
        description: impl Into<String>,
    ) -> Self {
        Self::new(account_id, currency_code, amount_minor_units, EntryType::Debit, description)
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_transaction_id(mut self, transaction_id: Uuid) -> Self {
        self.transaction_id = Some(transaction_id);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

// =========================================================================
// VoidTransactionCommand
// =========================================================================

/// Command to reverse an earlier entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoidTransactionCommand {
    pub original_entry_id: Uuid,
    pub reason: String,
}

impl VoidTransactionCommand {
    pub fn new(original_entry_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            original_entry_id,
            reason: reason.into(),
        }
    }
}

// =========================================================================
// AdjustmentCommand
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdjustmentType {
    Correction,
    Fee,
    Interest,
}

impl AdjustmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentType::Correction => "Correction",
            AdjustmentType::Fee => "Fee",
            AdjustmentType::Interest => "Interest",
        }
    }
}

impl fmt::Display for AdjustmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdjustmentType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "correction" => Ok(AdjustmentType::Correction),
            "fee" => Ok(AdjustmentType::Fee),
            "interest" => Ok(AdjustmentType::Interest),
            _ => Err(DomainError::InvalidInput(format!(
                "unknown adjustment type '{}'",
                s
            ))),
        }
    }
}

/// Manual balance correction. Positive amounts credit, negative amounts debit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustmentCommand {
    pub account_id: Uuid,
    pub currency_code: String,
    pub amount_minor_units: i64,
    pub adjustment_type: AdjustmentType,
    pub reason: String,
    pub approved_by: Option<String>,
}

impl AdjustmentCommand {
    pub fn new(
        account_id: Uuid,
        currency_code: impl Into<String>,
        amount_minor_units: i64,
        adjustment_type: AdjustmentType,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            account_id,
            currency_code: currency_code.into(),
            amount_minor_units,
            adjustment_type,
            reason: reason.into(),
            approved_by: None,
        }
    }

    pub fn with_approver(mut self, approved_by: impl Into<String>) -> Self {
        self.approved_by = Some(approved_by.into());
        self
    }
}

// =========================================================================
// ReservationCommand
// =========================================================================

/// Command to reserve or release part of a balance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationCommand {
    pub account_id: Uuid,
    pub currency_code: String,
    pub amount_minor_units: i64,
}

impl ReservationCommand {
    pub fn new(account_id: Uuid, currency_code: impl Into<String>, amount_minor_units: i64) -> Self {
        Self {
            account_id,
            currency_code: currency_code.into(),
            amount_minor_units,
        }
    }
}

// =========================================================================
// Results
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostingStatus {
    Posted,
    AlreadyProcessed,
    Voided,
    AdjustmentApplied,
    Reserved,
    Released,
}

impl PostingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostingStatus::Posted => "Posted",
            PostingStatus::AlreadyProcessed => "AlreadyProcessed",
            PostingStatus::Voided => "Voided",
            PostingStatus::AdjustmentApplied => "AdjustmentApplied",
            PostingStatus::Reserved => "Reserved",
            PostingStatus::Released => "Released",
        }
    }
}

impl fmt::Display for PostingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a post or adjustment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingResult {
    pub entry_id: Uuid,
    pub status: PostingStatus,
    pub new_balance_minor_units: i64,
}

/// Outcome of a void
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidResult {
    pub void_entry_id: Uuid,
    pub original_entry_id: Uuid,
    pub status: PostingStatus,
    pub new_balance_minor_units: i64,
}

/// Outcome of a reserve or release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationResult {
    pub account_id: Uuid,
    pub currency_code: String,
    pub status: PostingStatus,
    pub reserved_minor_units: i64,
    pub available_minor_units: i64,
}
