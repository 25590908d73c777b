//! Ledger Queries
//!
//! Read-only access to balances and entry history.

use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{CurrencyCode, DomainError};
use crate::error::LedgerResult;
use crate::store::LedgerStore;

use super::{BalanceView, HistoryPage, HistoryQuery};

#[derive(Clone)]
pub struct LedgerQueries {
    store: Arc<dyn LedgerStore>,
}

impl LedgerQueries {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Every balance slot the account has, one per currency
    pub async fn get_balances(&self, account_id: Uuid) -> LedgerResult<Vec<BalanceView>> {
        let balances = self.store.balances_for_account(account_id).await?;
        Ok(balances.iter().map(BalanceView::from).collect())
    }

    /// A single slot; `None` when the account never held this currency
    pub async fn get_balance(
        &self,
        account_id: Uuid,
        currency_code: &str,
    ) -> LedgerResult<Option<BalanceView>> {
        let currency = CurrencyCode::new(currency_code)?;
        let balance = self.store.load_balance(account_id, &currency).await?;
        Ok(balance.as_ref().map(BalanceView::from))
    }

    /// Entries newest first, with the total before paging
    pub async fn get_history(&self, query: &HistoryQuery) -> LedgerResult<HistoryPage> {
        if let (Some(from), Some(to)) = (query.from_date, query.to_date) {
            if from > to {
                return Err(DomainError::InvalidInput(format!(
                    "from_date {} is after to_date {}",
                    from, to
                ))
                .into());
            }
        }

        Ok(self.store.history(query).await?)
    }

    /// Whether the available balance covers `amount_minor_units`.
    ///
    /// A missing slot counts as zero.
    pub async fn has_sufficient_balance(
        &self,
        account_id: Uuid,
        currency_code: &str,
        amount_minor_units: i64,
    ) -> LedgerResult<bool> {
        if amount_minor_units <= 0 {
            return Err(DomainError::InvalidAmount(format!(
                "amount must be positive, got {}",
                amount_minor_units
            ))
            .into());
        }

        let currency = CurrencyCode::new(currency_code)?;
        let balance = self.store.load_balance(account_id, &currency).await?;
        Ok(balance.map_or(false, |b| b.has_sufficient_balance(amount_minor_units)))
    }
}
