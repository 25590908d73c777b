//! Adjustment Handler
//!
//! Manual corrections, fees and interest. An adjustment is an ordinary
//! posting with a generated description and reference.

use std::sync::Arc;
use uuid::Uuid;

use crate::aggregate::{EntryType, NewEntry};
use crate::domain::{CurrencyCode, DomainError, MinorUnits, OperationContext};
use crate::error::LedgerResult;
use crate::shutdown::Shutdown;
use crate::store::LedgerStore;

use super::post_handler::{apply_posting, Posting};
use super::retry::RetryPolicy;
use super::{AdjustmentCommand, PostingResult, PostingStatus};

/// Handler for balance adjustments
#[derive(Clone)]
pub struct AdjustmentHandler {
    store: Arc<dyn LedgerStore>,
    retry: RetryPolicy,
}

impl AdjustmentHandler {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Execute the adjustment command
    pub async fn execute(
        &self,
        command: AdjustmentCommand,
        context: &OperationContext,
    ) -> LedgerResult<PostingResult> {
        let never = Shutdown::new();
        self.execute_with_shutdown(command, context, &never).await
    }

    /// Execute unless `shutdown` fires before the commit starts
    pub async fn execute_with_shutdown(
        &self,
        command: AdjustmentCommand,
        context: &OperationContext,
        shutdown: &Shutdown,
    ) -> LedgerResult<PostingResult> {
        let approved_by = command.approved_by.clone();
        let adjustment_type = command.adjustment_type;
        let posting = adjustment_posting(command)?;

        let result = apply_posting(
            self.store.as_ref(),
            &self.retry,
            &posting,
            context,
            shutdown,
        )
        .await?;

        tracing::info!(
            entry_id = %result.entry_id,
            account_id = %posting.account_id,
            adjustment_type = %adjustment_type,
            approved_by = approved_by.as_deref().unwrap_or("-"),
            "Balance adjustment applied"
        );

        Ok(result)
    }
}

fn adjustment_posting(command: AdjustmentCommand) -> Result<Posting, DomainError> {
    if command.amount_minor_units == 0 {
        return Err(DomainError::InvalidAmount(
            "adjustment amount cannot be zero".to_string(),
        ));
    }

    let reason = command.reason.trim();
    if reason.is_empty() {
        return Err(DomainError::InvalidInput(
            "adjustment reason is required".to_string(),
        ));
    }

    let entry_type = if command.amount_minor_units > 0 {
        EntryType::Credit
    } else {
        EntryType::Debit
    };
    let magnitude = command
        .amount_minor_units
        .checked_abs()
        .ok_or_else(|| DomainError::InvalidAmount("adjustment amount out of range".to_string()))?;

    Ok(Posting {
        account_id: command.account_id,
        currency_code: CurrencyCode::new(&command.currency_code)?,
        entry: NewEntry {
            entry_type,
            amount: MinorUnits::new(magnitude)?,
            description: format!("Adjustment ({}): {}", command.adjustment_type, reason),
            reference: Some(format!("ADJ-{}", command.adjustment_type)),
            transaction_id: Some(Uuid::new_v4()),
            idempotency_key: None,
        },
        status: PostingStatus::AdjustmentApplied,
    })
}
