//! Query module
//!
//! Read side of the ledger: balances and paged entry history.

mod service;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::aggregate::{AccountBalance, EntryType, LedgerEntry};
use crate::domain::CurrencyCode;

pub use service::LedgerQueries;

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 500;

/// Filter and page for entry history.
///
/// Date bounds are inclusive. `take` is clamped to `1..=MAX_PAGE_SIZE` and
/// `skip` to zero or more.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub account_id: Uuid,
    pub currency_code: Option<CurrencyCode>,
    pub entry_type: Option<EntryType>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    skip: i64,
    take: i64,
}

impl HistoryQuery {
    pub fn new(account_id: Uuid) -> Self {
        Self {
            account_id,
            currency_code: None,
            entry_type: None,
            from_date: None,
            to_date: None,
            skip: 0,
            take: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn currency(mut self, currency_code: CurrencyCode) -> Self {
        self.currency_code = Some(currency_code);
        self
    }

    pub fn entry_type(mut self, entry_type: EntryType) -> Self {
        self.entry_type = Some(entry_type);
        self
    }

    pub fn from(mut self, from_date: DateTime<Utc>) -> Self {
        self.from_date = Some(from_date);
        self
    }

    pub fn to(mut self, to_date: DateTime<Utc>) -> Self {
        self.to_date = Some(to_date);
        self
    }

    pub fn page(mut self, skip: i64, take: i64) -> Self {
        self.skip = skip.max(0);
        self.take = take.clamp(1, MAX_PAGE_SIZE);
        self
    }

    pub fn skip(&self) -> i64 {
        self.skip
    }

    pub fn take(&self) -> i64 {
        self.take
    }

    /// Whether `entry` passes every filter (paging excluded)
    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        entry.account_id == self.account_id
            && self
                .currency_code
                .as_ref()
                .map_or(true, |c| &entry.currency_code == c)
            && self.entry_type.map_or(true, |t| entry.entry_type == t)
            && self.from_date.map_or(true, |from| entry.entry_date >= from)
            && self.to_date.map_or(true, |to| entry.entry_date <= to)
    }
}

/// One page of history, newest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPage {
    pub entries: Vec<LedgerEntry>,
    /// Matching entries before paging
    pub total_count: i64,
}

/// Balance slot as exposed to readers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceView {
    pub account_id: Uuid,
    pub currency_code: String,
    pub balance_minor_units: i64,
    pub reserved_minor_units: i64,
    pub available_minor_units: i64,
    /// Balance in major units, scaled by the currency exponent
    pub amount_decimal: Decimal,
    pub version: i64,
    pub last_updated_at: DateTime<Utc>,
}

impl From<&AccountBalance> for BalanceView {
    fn from(balance: &AccountBalance) -> Self {
        let currency = balance.currency_code();
        Self {
            account_id: balance.account_id(),
            currency_code: currency.to_string(),
            balance_minor_units: balance.balance_minor_units(),
            reserved_minor_units: balance.reserved_minor_units(),
            available_minor_units: balance.available_minor_units(),
            amount_decimal: currency.to_major_units(balance.balance_minor_units()),
            version: balance.version(),
            last_updated_at: balance.last_updated_at(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_page_is_clamped() {
        let query = HistoryQuery::new(Uuid::new_v4()).page(-5, 10_000);
        assert_eq!(query.skip(), 0);
        assert_eq!(query.take(), MAX_PAGE_SIZE);

        let query = HistoryQuery::new(Uuid::new_v4()).page(3, 0);
        assert_eq!(query.skip(), 3);
        assert_eq!(query.take(), 1);
    }

    #[test]
    fn test_default_page() {
        let query = HistoryQuery::new(Uuid::new_v4());
        assert_eq!(query.skip(), 0);
        assert_eq!(query.take(), DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_balance_view_decimal() {
        let mut balance = AccountBalance::open(Uuid::new_v4(), CurrencyCode::new("MAD").unwrap());
        balance
            .credit(crate::domain::MinorUnits::new(70_000).unwrap())
            .unwrap();

        let view = BalanceView::from(&balance);
        assert_eq!(view.amount_decimal, dec!(700.00));
        assert_eq!(view.available_minor_units, 70_000);
        assert_eq!(view.currency_code, "MAD");
    }
}
