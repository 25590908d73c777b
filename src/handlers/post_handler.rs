//! Post Transaction Handler
//!
//! Credits or debits a balance slot and appends the matching ledger entry.
//! Balance write, entry and outbox rows are committed as one change set.

use std::sync::Arc;
use uuid::Uuid;

use crate::aggregate::{AccountBalance, EntryType, LedgerEntry, NewEntry};
use crate::domain::{CurrencyCode, DomainError, MinorUnits, OperationContext};
use crate::error::{LedgerError, LedgerResult};
use crate::idempotency::IdempotencyKey;
use crate::outbox::EventEmitter;
use crate::shutdown::Shutdown;
use crate::store::{LedgerChangeSet, LedgerStore, StoreError};

use super::retry::{plan_unless_shutdown, with_optimistic_retry, RetryPolicy};
use super::{PostTransactionCommand, PostingResult, PostingStatus};

/// A validated posting, ready to be applied
#[derive(Debug, Clone)]
pub(super) struct Posting {
    pub account_id: Uuid,
    pub currency_code: CurrencyCode,
    pub entry: NewEntry,
    /// Status reported when this attempt actually writes
    pub status: PostingStatus,
}

impl Posting {
    fn from_command(command: PostTransactionCommand) -> Result<Self, DomainError> {
        let amount = MinorUnits::new(command.amount_minor_units)?;
        let currency_code = CurrencyCode::new(&command.currency_code)?;
        let idempotency_key = command
            .idempotency_key
            .as_deref()
            .map(IdempotencyKey::new)
            .transpose()?;

        if command.description.trim().is_empty() {
            return Err(DomainError::InvalidInput("description is required".to_string()));
        }

        Ok(Self {
            account_id: command.account_id,
            currency_code,
            entry: NewEntry {
                entry_type: command.entry_type,
                amount,
                description: command.description,
                reference: command.reference,
                transaction_id: command.transaction_id,
                idempotency_key,
            },
            status: PostingStatus::Posted,
        })
    }
}

/// Handler for credits and debits
#[derive(Clone)]
pub struct PostTransactionHandler {
    store: Arc<dyn LedgerStore>,
    retry: RetryPolicy,
}

impl PostTransactionHandler {
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

    /// Execute the post command
    pub async fn execute(
        &self,
        command: PostTransactionCommand,
        context: &OperationContext,
    ) -> LedgerResult<PostingResult> {
        let never = Shutdown::new();
        self.execute_with_shutdown(command, context, &never).await
    }

    /// Execute unless `shutdown` fires before the commit starts.
    ///
    /// `Cancelled` means nothing was written. Once the commit is under way
    /// shutdown is ignored and the real outcome is returned.
    pub async fn execute_with_shutdown(
        &self,
        command: PostTransactionCommand,
        context: &OperationContext,
        shutdown: &Shutdown,
    ) -> LedgerResult<PostingResult> {
        let posting = Posting::from_command(command)?;
        apply_posting(self.store.as_ref(), &self.retry, &posting, context, shutdown).await
    }
}

/// Apply `posting` with bounded optimistic retries
pub(super) async fn apply_posting(
    store: &dyn LedgerStore,
    retry: &RetryPolicy,
    posting: &Posting,
    context: &OperationContext,
    shutdown: &Shutdown,
) -> LedgerResult<PostingResult> {
    with_optimistic_retry(retry, "post_transaction", move || {
        post_once(store, posting, context, shutdown)
    })
    .await
}

/// Outcome of the read-modify half of an attempt
enum PostingPlan {
    /// The key already has an entry
    Replay(PostingResult),
    Commit(LedgerChangeSet, PostingResult),
}

async fn post_once(
    store: &dyn LedgerStore,
    posting: &Posting,
    context: &OperationContext,
    shutdown: &Shutdown,
) -> LedgerResult<PostingResult> {
    let plan = plan_unless_shutdown(shutdown, plan_posting(store, posting, context)).await?;
    let (change_set, result) = match plan {
        PostingPlan::Replay(result) => return Ok(result),
        PostingPlan::Commit(change_set, result) => (change_set, result),
    };

    match store.commit(change_set).await {
        Ok(()) => {
            tracing::info!(
                entry_id = %result.entry_id,
                account_id = %posting.account_id,
                currency = %posting.currency_code,
                entry_type = %posting.entry.entry_type,
                amount = posting.entry.amount.value(),
                new_balance = result.new_balance_minor_units,
                status = %result.status,
                "Ledger entry posted"
            );
            Ok(result)
        }
        // Lost the race for this key: report the winner's outcome
        Err(StoreError::DuplicateIdempotencyKey(key)) => {
            let key = IdempotencyKey::new(&key)?;
            let winner = store
                .find_entry_by_idempotency_key(&key)
                .await?
                .ok_or_else(|| {
                    LedgerError::Internal(format!(
                        "idempotency key {} rejected but no entry holds it",
                        key
                    ))
                })?;
            Ok(replayed(&winner, posting))
        }
        Err(e) => Err(e.into()),
    }
}

async fn plan_posting(
    store: &dyn LedgerStore,
    posting: &Posting,
    context: &OperationContext,
) -> LedgerResult<PostingPlan> {
    if let Some(key) = posting.entry.idempotency_key.as_ref() {
        if let Some(existing) = store.find_entry_by_idempotency_key(key).await? {
            return Ok(PostingPlan::Replay(replayed(&existing, posting)));
        }
    }

    let mut balance = store
        .load_balance(posting.account_id, &posting.currency_code)
        .await?
        .unwrap_or_else(|| AccountBalance::open(posting.account_id, posting.currency_code.clone()));
    let expected_version = balance.version();

    let amount = posting.entry.amount;
    let balance_event = match posting.entry.entry_type {
        EntryType::Credit => balance.credit(amount)?,
        EntryType::Debit => balance.debit(amount)?,
    };
    let (entry, created) = LedgerEntry::post(&balance, posting.entry.clone())?;

    let mut emitter = EventEmitter::new();
    emitter.emit(balance_event);
    emitter.emit(created);

    let result = PostingResult {
        entry_id: entry.id,
        status: posting.status,
        new_balance_minor_units: entry.running_balance,
    };
    let change_set = LedgerChangeSet::new(balance, expected_version)
        .with_entry(entry)
        .with_outbox(emitter.into_outbox(context)?);

    Ok(PostingPlan::Commit(change_set, result))
}

fn replayed(existing: &LedgerEntry, posting: &Posting) -> PostingResult {
    if existing.account_id != posting.account_id
        || existing.currency_code != posting.currency_code
        || existing.amount_minor_units != posting.entry.amount.value()
        || existing.entry_type != posting.entry.entry_type
    {
        tracing::warn!(
            entry_id = %existing.id,
            idempotency_key = ?existing.idempotency_key,
            "Idempotency key reused with a different request; returning the original outcome"
        );
    }

    tracing::debug!(
        entry_id = %existing.id,
        idempotency_key = ?existing.idempotency_key,
        "Duplicate request replayed"
    );

    PostingResult {
        entry_id: existing.id,
        status: PostingStatus::AlreadyProcessed,
        new_balance_minor_units: existing.running_balance,
    }
}
