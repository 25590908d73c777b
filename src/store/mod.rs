//! Ledger Store
//!
//! Persistence seam for the ledger. A [`LedgerChangeSet`] is the unit of work:
//! the balance write, the entry append and the outbox rows are committed
//! together or not at all.

mod error;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::aggregate::{AccountBalance, LedgerEntry};
use crate::domain::CurrencyCode;
use crate::idempotency::IdempotencyKey;
use crate::outbox::OutboxMessage;
use crate::query::{HistoryPage, HistoryQuery};

pub use error::StoreError;
pub use memory::InMemoryLedgerStore;
pub use postgres::PgLedgerStore;

/// Everything one ledger operation writes.
#[derive(Debug, Clone)]
pub struct LedgerChangeSet {
    /// Balance slot after the mutation
    pub balance: AccountBalance,
    /// Version read before the mutation; 0 means the slot must be inserted
    pub expected_version: i64,
    /// Entry appended by the operation (reservations write none)
    pub entry: Option<LedgerEntry>,
    /// Events emitted by the operation, already serialized
    pub outbox: Vec<OutboxMessage>,
}

impl LedgerChangeSet {
    pub fn new(balance: AccountBalance, expected_version: i64) -> Self {
        Self {
            balance,
            expected_version,
            entry: None,
            outbox: Vec::new(),
        }
    }

    pub fn with_entry(mut self, entry: LedgerEntry) -> Self {
        self.entry = Some(entry);
        self
    }

    pub fn with_outbox(mut self, outbox: Vec<OutboxMessage>) -> Self {
        self.outbox = outbox;
        self
    }
}

/// Storage operations the ledger needs.
///
/// Implementations must make [`LedgerStore::commit`] atomic and must enforce:
/// - the balance row's version still equals `expected_version`
/// - idempotency keys are globally unique
/// - an entry is the `original_entry_id` of at most one void
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Load the balance slot for (account, currency)
    async fn load_balance(
        &self,
        account_id: Uuid,
        currency_code: &CurrencyCode,
    ) -> Result<Option<AccountBalance>, StoreError>;

    /// All balance slots of an account, ordered by currency code
    async fn balances_for_account(&self, account_id: Uuid)
        -> Result<Vec<AccountBalance>, StoreError>;

    async fn find_entry(&self, entry_id: Uuid) -> Result<Option<LedgerEntry>, StoreError>;

    async fn find_entry_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<LedgerEntry>, StoreError>;

    /// The void entry pointing at `original_entry_id`, if any
    async fn find_void_of(&self, original_entry_id: Uuid)
        -> Result<Option<LedgerEntry>, StoreError>;

    /// Entries matching the query, newest first, plus the unpaged total
    async fn history(&self, query: &HistoryQuery) -> Result<HistoryPage, StoreError>;

    /// Atomically persist a change set
    async fn commit(&self, change_set: LedgerChangeSet) -> Result<(), StoreError>;
}
