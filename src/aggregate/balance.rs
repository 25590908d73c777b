//! Account Balance Aggregate
//!
//! One balance slot per (account, currency). Every mutation bumps `version`
//! for optimistic concurrency and hands back the event it produced; nothing
//! is collected behind the caller's back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    BalanceUpdated, CurrencyCode, DomainError, FundsReserved, MinorUnits, ReservationReleased,
};

/// Account Balance Aggregate
///
/// # Invariants
/// - `balance >= 0`
/// - `0 <= reserved <= balance`, so available balance is never negative
/// - `version` strictly increases with each mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    account_id: Uuid,
    currency_code: CurrencyCode,
    balance_minor_units: i64,
    reserved_minor_units: i64,
    /// Zero until the slot is first persisted
    version: i64,
    last_updated_at: DateTime<Utc>,
}

impl AccountBalance {
    /// Open an empty, not yet persisted balance slot.
    pub fn open(account_id: Uuid, currency_code: CurrencyCode) -> Self {
        Self {
            account_id,
            currency_code,
            balance_minor_units: 0,
            reserved_minor_units: 0,
            version: 0,
            last_updated_at: Utc::now(),
        }
    }

    /// Rebuild a balance slot from stored columns.
    pub fn from_storage(
        account_id: Uuid,
        currency_code: CurrencyCode,
        balance_minor_units: i64,
        reserved_minor_units: i64,
        version: i64,
        last_updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            account_id,
            currency_code,
            balance_minor_units,
            reserved_minor_units,
            version,
            last_updated_at,
        }
    }

    // =========================================================================
    // Credit / Debit
    // =========================================================================

    /// Add money to the slot
    pub fn credit(&mut self, amount: MinorUnits) -> Result<BalanceUpdated, DomainError> {
        let previous = self.balance_minor_units;
        let new_balance = previous
            .checked_add(amount.value())
            .ok_or_else(|| DomainError::InvalidAmount("balance overflow".to_string()))?;

        self.balance_minor_units = new_balance;
        self.touch();

        Ok(self.balance_updated(previous, amount.value()))
    }

    /// Remove money from the slot.
    ///
    /// Reserved funds are not spendable, so the check runs against the
    /// available balance.
    pub fn debit(&mut self, amount: MinorUnits) -> Result<BalanceUpdated, DomainError> {
        let available = self.available_minor_units();
        if amount.value() > available {
            return Err(DomainError::insufficient_balance(amount.value(), available));
        }

        let previous = self.balance_minor_units;
        self.balance_minor_units -= amount.value();
        self.touch();

        Ok(self.balance_updated(previous, -amount.value()))
    }

    // =========================================================================
    // Reservations
    // =========================================================================

    /// Earmark part of the available balance
    pub fn reserve(&mut self, amount: MinorUnits) -> Result<FundsReserved, DomainError> {
        let available = self.available_minor_units();
        if amount.value() > available {
            return Err(DomainError::insufficient_balance(amount.value(), available));
        }

        self.reserved_minor_units += amount.value();
        self.touch();

        Ok(FundsReserved {
            account_id: self.account_id,
            currency_code: self.currency_code.to_string(),
            amount_minor_units: amount.value(),
            reserved_total: self.reserved_minor_units,
            available_balance: self.available_minor_units(),
            version: self.version,
        })
    }

    /// Lift an earmark
    pub fn release_reservation(
        &mut self,
        amount: MinorUnits,
    ) -> Result<ReservationReleased, DomainError> {
        if amount.value() > self.reserved_minor_units {
            return Err(DomainError::InvalidState(format!(
                "cannot release {} with only {} reserved",
                amount.value(),
                self.reserved_minor_units
            )));
        }

        self.reserved_minor_units -= amount.value();
        self.touch();

        Ok(ReservationReleased {
            account_id: self.account_id,
            currency_code: self.currency_code.to_string(),
            amount_minor_units: amount.value(),
            reserved_total: self.reserved_minor_units,
            available_balance: self.available_minor_units(),
            version: self.version,
        })
    }

    fn touch(&mut self) {
        self.version += 1;
        self.last_updated_at = Utc::now();
    }

    fn balance_updated(&self, previous: i64, change: i64) -> BalanceUpdated {
        BalanceUpdated {
            account_id: self.account_id,
            currency_code: self.currency_code.to_string(),
            previous_balance: previous,
            new_balance: self.balance_minor_units,
            change_amount: change,
            version: self.version,
        }
    }

    // =========================================================================
    // Getters
    // =========================================================================

    pub fn account_id(&self) -> Uuid {
        self.account_id
    }

    pub fn currency_code(&self) -> &CurrencyCode {
        &self.currency_code
    }

    pub fn balance_minor_units(&self) -> i64 {
        self.balance_minor_units
    }

    pub fn reserved_minor_units(&self) -> i64 {
        self.reserved_minor_units
    }

    pub fn available_minor_units(&self) -> i64 {
        self.balance_minor_units - self.reserved_minor_units
    }

    pub fn has_sufficient_balance(&self, amount_minor_units: i64) -> bool {
        self.available_minor_units() >= amount_minor_units
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    /// True until the slot has been written once
    pub fn is_new(&self) -> bool {
        self.version == 0
    }

    pub fn last_updated_at(&self) -> DateTime<Utc> {
        self.last_updated_at
    }
}
