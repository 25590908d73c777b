//! Reservation Handler
//!
//! Earmarks or releases part of a balance. Reservations change the slot's
//! version and emit an outbox event but append no ledger entry.

use std::sync::Arc;
use uuid::Uuid;

use crate::aggregate::AccountBalance;
use crate::domain::{CurrencyCode, DomainError, LedgerEvent, MinorUnits, OperationContext};
use crate::error::LedgerResult;
use crate::outbox::EventEmitter;
use crate::shutdown::Shutdown;
use crate::store::{LedgerChangeSet, LedgerStore};

use super::retry::{plan_unless_shutdown, with_optimistic_retry, RetryPolicy};
use super::{PostingStatus, ReservationCommand, ReservationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReservationAction {
    Reserve,
    Release,
}

/// Handler for reserve and release
#[derive(Clone)]
pub struct ReservationHandler {
    store: Arc<dyn LedgerStore>,
    retry: RetryPolicy,
}

impl ReservationHandler {
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

    /// Earmark funds; fails with InsufficientBalance beyond the available balance
    pub async fn reserve(
        &self,
        command: ReservationCommand,
        context: &OperationContext,
    ) -> LedgerResult<ReservationResult> {
        let never = Shutdown::new();
        self.execute(ReservationAction::Reserve, command, context, &never)
            .await
    }

    /// Lift an earmark; fails with InvalidState beyond the reserved amount
    pub async fn release(
        &self,
        command: ReservationCommand,
        context: &OperationContext,
    ) -> LedgerResult<ReservationResult> {
        let never = Shutdown::new();
        self.execute(ReservationAction::Release, command, context, &never)
            .await
    }

    /// Reserve unless `shutdown` fires before the commit starts
    pub async fn reserve_with_shutdown(
        &self,
        command: ReservationCommand,
        context: &OperationContext,
        shutdown: &Shutdown,
    ) -> LedgerResult<ReservationResult> {
        self.execute(ReservationAction::Reserve, command, context, shutdown)
            .await
    }

    /// Release unless `shutdown` fires before the commit starts
    pub async fn release_with_shutdown(
        &self,
        command: ReservationCommand,
        context: &OperationContext,
        shutdown: &Shutdown,
    ) -> LedgerResult<ReservationResult> {
        self.execute(ReservationAction::Release, command, context, shutdown)
            .await
    }

    async fn execute(
        &self,
        action: ReservationAction,
        command: ReservationCommand,
        context: &OperationContext,
        shutdown: &Shutdown,
    ) -> LedgerResult<ReservationResult> {
        let amount = MinorUnits::new(command.amount_minor_units)?;
        let currency_code = CurrencyCode::new(&command.currency_code)?;
        let account_id = command.account_id;
        let currency = &currency_code;

        let operation = match action {
            ReservationAction::Reserve => "reserve_funds",
            ReservationAction::Release => "release_reservation",
        };

        with_optimistic_retry(&self.retry, operation, move || {
            self.apply_once(action, account_id, currency, amount, context, shutdown)
        })
        .await
    }

    async fn apply_once(
        &self,
        action: ReservationAction,
        account_id: Uuid,
        currency: &CurrencyCode,
        amount: MinorUnits,
        context: &OperationContext,
        shutdown: &Shutdown,
    ) -> LedgerResult<ReservationResult> {
        let (change_set, result) = plan_unless_shutdown(
            shutdown,
            self.plan(action, account_id, currency, amount, context),
        )
        .await?;

        self.store.commit(change_set).await?;

        tracing::info!(
            account_id = %account_id,
            currency = %currency,
            amount = amount.value(),
            reserved = result.reserved_minor_units,
            available = result.available_minor_units,
            status = %result.status,
            "Reservation updated"
        );

        Ok(result)
    }

    async fn plan(
        &self,
        action: ReservationAction,
        account_id: Uuid,
        currency: &CurrencyCode,
        amount: MinorUnits,
        context: &OperationContext,
    ) -> LedgerResult<(LedgerChangeSet, ReservationResult)> {
        let mut balance = match self.store.load_balance(account_id, currency).await? {
            Some(balance) => balance,
            None if action == ReservationAction::Reserve => {
                return Err(DomainError::insufficient_balance(amount.value(), 0).into());
            }
            None => {
                return Err(DomainError::InvalidState(format!(
                    "no {} balance for account {}",
                    currency, account_id
                ))
                .into());
            }
        };
        let expected_version = balance.version();

        let event: LedgerEvent = match action {
            ReservationAction::Reserve => balance.reserve(amount)?.into(),
            ReservationAction::Release => balance.release_reservation(amount)?.into(),
        };

        let mut emitter = EventEmitter::new();
        emitter.emit(event);
        let result = reservation_result(&balance, action);

        let change_set = LedgerChangeSet::new(balance, expected_version)
            .with_outbox(emitter.into_outbox(context)?);
        Ok((change_set, result))
    }
}

fn reservation_result(balance: &AccountBalance, action: ReservationAction) -> ReservationResult {
    ReservationResult {
        account_id: balance.account_id(),
        currency_code: balance.currency_code().to_string(),
        status: match action {
            ReservationAction::Reserve => PostingStatus::Reserved,
            ReservationAction::Release => PostingStatus::Released,
        },
        reserved_minor_units: balance.reserved_minor_units(),
        available_minor_units: balance.available_minor_units(),
    }
}
