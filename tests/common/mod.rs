//! Common test utilities

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use finitech_ledger::aggregate::{AccountBalance, LedgerEntry};
use finitech_ledger::domain::CurrencyCode;
use finitech_ledger::handlers::{
    AdjustmentHandler, PostTransactionHandler, ReservationHandler, VoidTransactionHandler,
};
use finitech_ledger::idempotency::IdempotencyKey;
use finitech_ledger::outbox::{EventPublisher, PublishError, PublishedEvent};
use finitech_ledger::query::{HistoryPage, HistoryQuery, LedgerQueries};
use finitech_ledger::store::{InMemoryLedgerStore, LedgerChangeSet, LedgerStore, StoreError};
use finitech_ledger::OperationContext;
use sqlx::PgPool;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Handlers and queries wired to one in-memory store
pub struct TestLedger {
    pub store: Arc<InMemoryLedgerStore>,
    pub post: Arc<PostTransactionHandler>,
    pub void: VoidTransactionHandler,
    pub adjust: AdjustmentHandler,
    pub reserve: ReservationHandler,
    pub queries: LedgerQueries,
}

pub fn in_memory_ledger() -> TestLedger {
    let store = Arc::new(InMemoryLedgerStore::new());
    let dyn_store: Arc<dyn LedgerStore> = store.clone();
    TestLedger {
        post: Arc::new(PostTransactionHandler::new(dyn_store.clone())),
        void: VoidTransactionHandler::new(dyn_store.clone()),
        adjust: AdjustmentHandler::new(dyn_store.clone()),
        reserve: ReservationHandler::new(dyn_store.clone()),
        queries: LedgerQueries::new(dyn_store),
        store,
    }
}

pub fn context() -> OperationContext {
    OperationContext::new()
        .with_correlation_id(Uuid::new_v4().to_string())
        .with_initiator("tests")
}

// =========================================================================
// Publishers
// =========================================================================

/// Records every event it is given
#[derive(Default)]
pub struct RecordingPublisher {
    pub events: Mutex<Vec<PublishedEvent>>,
}

impl RecordingPublisher {
    pub async fn event_types(&self) -> Vec<String> {
        self.events
            .lock()
            .await
            .iter()
            .map(|e| e.event_type.clone())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &PublishedEvent) -> Result<(), PublishError> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

/// Fails the first `failures` publishes, then succeeds
pub struct FlakyPublisher {
    failures: usize,
    pub attempts: AtomicUsize,
}

impl FlakyPublisher {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn always_failing() -> Self {
        Self::new(usize::MAX)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventPublisher for FlakyPublisher {
    async fn publish(&self, _event: &PublishedEvent) -> Result<(), PublishError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(PublishError::Transport("broker unreachable".to_string()));
        }
        Ok(())
    }
}

// =========================================================================
// Store wrappers
// =========================================================================

/// Delegates to an inner store, sleeping before balance reads and commits
pub struct SlowStore {
    pub inner: Arc<InMemoryLedgerStore>,
    pub load_delay: Duration,
    pub commit_delay: Duration,
}

impl SlowStore {
    pub fn slow_load(inner: Arc<InMemoryLedgerStore>, delay: Duration) -> Self {
        Self {
            inner,
            load_delay: delay,
            commit_delay: Duration::ZERO,
        }
    }

    pub fn slow_commit(inner: Arc<InMemoryLedgerStore>, delay: Duration) -> Self {
        Self {
            inner,
            load_delay: Duration::ZERO,
            commit_delay: delay,
        }
    }
}

#[async_trait]
impl LedgerStore for SlowStore {
    async fn load_balance(
        &self,
        account_id: Uuid,
        currency_code: &CurrencyCode,
    ) -> Result<Option<AccountBalance>, StoreError> {
        tokio::time::sleep(self.load_delay).await;
        self.inner.load_balance(account_id, currency_code).await
    }

    async fn balances_for_account(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<AccountBalance>, StoreError> {
        self.inner.balances_for_account(account_id).await
    }

    async fn find_entry(&self, entry_id: Uuid) -> Result<Option<LedgerEntry>, StoreError> {
        self.inner.find_entry(entry_id).await
    }

    async fn find_entry_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        self.inner.find_entry_by_idempotency_key(key).await
    }

    async fn find_void_of(
        &self,
        original_entry_id: Uuid,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        self.inner.find_void_of(original_entry_id).await
    }

    async fn history(&self, query: &HistoryQuery) -> Result<HistoryPage, StoreError> {
        self.inner.history(query).await
    }

    async fn commit(&self, change_set: LedgerChangeSet) -> Result<(), StoreError> {
        tokio::time::sleep(self.commit_delay).await;
        self.inner.commit(change_set).await
    }
}

/// Answers the first idempotency lookup with "not found", as if a concurrent
/// request committed the key right after the check
pub struct StaleKeyLookupStore {
    pub inner: Arc<InMemoryLedgerStore>,
    missed: AtomicBool,
}

impl StaleKeyLookupStore {
    pub fn new(inner: Arc<InMemoryLedgerStore>) -> Self {
        Self {
            inner,
            missed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl LedgerStore for StaleKeyLookupStore {
    async fn load_balance(
        &self,
        account_id: Uuid,
        currency_code: &CurrencyCode,
    ) -> Result<Option<AccountBalance>, StoreError> {
        self.inner.load_balance(account_id, currency_code).await
    }

    async fn balances_for_account(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<AccountBalance>, StoreError> {
        self.inner.balances_for_account(account_id).await
    }

    async fn find_entry(&self, entry_id: Uuid) -> Result<Option<LedgerEntry>, StoreError> {
        self.inner.find_entry(entry_id).await
    }

    async fn find_entry_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        if !self.missed.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.find_entry_by_idempotency_key(key).await
    }

    async fn find_void_of(
        &self,
        original_entry_id: Uuid,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        self.inner.find_void_of(original_entry_id).await
    }

    async fn history(&self, query: &HistoryQuery) -> Result<HistoryPage, StoreError> {
        self.inner.history(query).await
    }

    async fn commit(&self, change_set: LedgerChangeSet) -> Result<(), StoreError> {
        self.inner.commit(change_set).await
    }
}

// =========================================================================
// Postgres
// =========================================================================

/// Setup test database - apply the schema and truncate ledger tables
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for tests");

    let pool = finitech_ledger::db::connect(&database_url, 5)
        .await
        .expect("Failed to connect to DB");

    finitech_ledger::db::apply_schema(&pool)
        .await
        .expect("Failed to apply schema");

    // Clean up DB for fresh state
    sqlx::query("TRUNCATE TABLE outbox_messages, ledger_entries, account_balances")
        .execute(&pool)
        .await
        .expect("Failed to clean up DB");

    pool
}
