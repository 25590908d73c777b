//! Void Transaction Handler
//!
//! Reverses an entry with a compensating entry of the opposite type. The
//! original entry is never touched.

use std::sync::Arc;
use uuid::Uuid;

use crate::aggregate::{EntryType, LedgerEntry};
use crate::domain::{DomainError, MinorUnits, OperationContext};
use crate::error::LedgerResult;
use crate::outbox::EventEmitter;
use crate::shutdown::Shutdown;
use crate::store::{LedgerChangeSet, LedgerStore, StoreError};

use super::retry::{plan_unless_shutdown, with_optimistic_retry, RetryPolicy};
use super::{PostingStatus, VoidResult, VoidTransactionCommand};

/// Handler for voids
#[derive(Clone)]
pub struct VoidTransactionHandler {
    store: Arc<dyn LedgerStore>,
    retry: RetryPolicy,
}

impl VoidTransactionHandler {
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

    /// Execute the void command
    pub async fn execute(
        &self,
        command: VoidTransactionCommand,
        context: &OperationContext,
    ) -> LedgerResult<VoidResult> {
        let never = Shutdown::new();
        self.execute_with_shutdown(command, context, &never).await
    }

    /// Execute unless `shutdown` fires before the commit starts.
    ///
    /// `Cancelled` means nothing was written.
    pub async fn execute_with_shutdown(
        &self,
        command: VoidTransactionCommand,
        context: &OperationContext,
        shutdown: &Shutdown,
    ) -> LedgerResult<VoidResult> {
        let reason = command.reason.trim();
        if reason.is_empty() {
            return Err(DomainError::InvalidInput("void reason is required".to_string()).into());
        }

        let original_entry_id = command.original_entry_id;
        with_optimistic_retry(&self.retry, "void_transaction", move || {
            self.void_once(original_entry_id, reason, context, shutdown)
        })
        .await
    }

    async fn void_once(
        &self,
        original_entry_id: Uuid,
        reason: &str,
        context: &OperationContext,
        shutdown: &Shutdown,
    ) -> LedgerResult<VoidResult> {
        let PlannedVoid {
            original,
            change_set,
            result,
        } = plan_unless_shutdown(shutdown, self.plan_void(original_entry_id, reason, context))
            .await?;

        match self.store.commit(change_set).await {
            Ok(()) => {}
            Err(StoreError::DuplicateVoid(entry_id)) => {
                return Err(DomainError::AlreadyVoided { entry_id }.into());
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            void_entry_id = %result.void_entry_id,
            original_entry_id = %original.id,
            account_id = %original.account_id,
            currency = %original.currency_code,
            amount = original.amount_minor_units,
            new_balance = result.new_balance_minor_units,
            "Ledger entry voided"
        );

        Ok(result)
    }

    async fn plan_void(
        &self,
        original_entry_id: Uuid,
        reason: &str,
        context: &OperationContext,
    ) -> LedgerResult<PlannedVoid> {
        let original = self
            .store
            .find_entry(original_entry_id)
            .await?
            .ok_or(DomainError::EntryNotFound(original_entry_id))?;

        if original.is_void() {
            return Err(DomainError::InvalidState(format!(
                "entry {} is itself a void and cannot be reversed",
                original.id
            ))
            .into());
        }

        if self.store.find_void_of(original.id).await?.is_some() {
            return Err(DomainError::AlreadyVoided {
                entry_id: original.id,
            }
            .into());
        }

        let mut balance = self
            .store
            .load_balance(original.account_id, &original.currency_code)
            .await?
            .ok_or_else(|| {
                DomainError::InvalidState(format!(
                    "no {} balance for account {}",
                    original.currency_code, original.account_id
                ))
            })?;
        let expected_version = balance.version();

        let amount = MinorUnits::new(original.amount_minor_units)?;
        let balance_event = match original.entry_type.opposite() {
            EntryType::Credit => balance.credit(amount)?,
            EntryType::Debit => balance.debit(amount)?,
        };
        let (void_entry, created, voided) = LedgerEntry::void(&original, reason, &balance)?;

        let mut emitter = EventEmitter::new();
        emitter.emit(balance_event);
        emitter.emit(created);
        emitter.emit(voided);

        let result = VoidResult {
            void_entry_id: void_entry.id,
            original_entry_id: original.id,
            status: PostingStatus::Voided,
            new_balance_minor_units: void_entry.running_balance,
        };
        let change_set = LedgerChangeSet::new(balance, expected_version)
            .with_entry(void_entry)
            .with_outbox(emitter.into_outbox(context)?);

        Ok(PlannedVoid {
            original,
            change_set,
            result,
        })
    }
}

/// A void ready to commit
struct PlannedVoid {
    original: LedgerEntry,
    change_set: LedgerChangeSet,
    result: VoidResult,
}
