//! In-memory store
//!
//! Process-local implementation of [`LedgerStore`] and [`OutboxStore`] with
//! the same atomicity and uniqueness rules as the Postgres store. Each commit
//! runs under a single write lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::aggregate::{AccountBalance, LedgerEntry};
use crate::domain::CurrencyCode;
use crate::idempotency::IdempotencyKey;
use crate::outbox::{OutboxMessage, OutboxStatus, OutboxStatusCounts, OutboxStore};
use crate::query::{HistoryPage, HistoryQuery};

use super::{LedgerChangeSet, LedgerStore, StoreError};

#[derive(Debug, Default)]
struct State {
    balances: HashMap<(Uuid, CurrencyCode), AccountBalance>,
    /// Append order doubles as insertion sequence
    entries: Vec<LedgerEntry>,
    entry_index: HashMap<Uuid, usize>,
    idempotency_keys: HashMap<IdempotencyKey, Uuid>,
    /// original entry id -> void entry id
    voids: HashMap<Uuid, Uuid>,
    outbox: Vec<OutboxMessage>,
}

impl State {
    fn entry(&self, id: Uuid) -> Option<&LedgerEntry> {
        self.entry_index.get(&id).map(|&i| &self.entries[i])
    }

    fn outbox_mut(&mut self, id: Uuid) -> Option<&mut OutboxMessage> {
        self.outbox.iter_mut().find(|m| m.id == id)
    }

    /// The message, if it is still held under the claim taken at `claimed_at`
    fn claimed_mut(
        &mut self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
    ) -> Result<&mut OutboxMessage, StoreError> {
        match self.outbox_mut(id) {
            Some(message)
                if message.status == OutboxStatus::Processing
                    && message.claimed_at == Some(claimed_at) =>
            {
                Ok(message)
            }
            _ => Err(StoreError::MessageNotClaimed(id)),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<State>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every outbox row in insertion order
    pub async fn outbox_messages(&self) -> Vec<OutboxMessage> {
        self.state.read().await.outbox.clone()
    }

    /// Snapshot of every entry in insertion order
    pub async fn entries(&self) -> Vec<LedgerEntry> {
        self.state.read().await.entries.clone()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn load_balance(
        &self,
        account_id: Uuid,
        currency_code: &CurrencyCode,
    ) -> Result<Option<AccountBalance>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .balances
            .get(&(account_id, currency_code.clone()))
            .cloned())
    }

    async fn balances_for_account(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<AccountBalance>, StoreError> {
        let state = self.state.read().await;
        let mut balances: Vec<_> = state
            .balances
            .values()
            .filter(|b| b.account_id() == account_id)
            .cloned()
            .collect();
        balances.sort_by(|a, b| a.currency_code().cmp(b.currency_code()));
        Ok(balances)
    }

    async fn find_entry(&self, entry_id: Uuid) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(self.state.read().await.entry(entry_id).cloned())
    }

    async fn find_entry_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .idempotency_keys
            .get(key)
            .and_then(|id| state.entry(*id))
            .cloned())
    }

    async fn find_void_of(
        &self,
        original_entry_id: Uuid,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .voids
            .get(&original_entry_id)
            .and_then(|id| state.entry(*id))
            .cloned())
    }

    async fn history(&self, query: &HistoryQuery) -> Result<HistoryPage, StoreError> {
        let state = self.state.read().await;
        let mut matching: Vec<(usize, &LedgerEntry)> = state
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| query.matches(e))
            .collect();

        // Newest first; insertion order breaks timestamp ties
        matching.sort_by(|(ia, a), (ib, b)| b.entry_date.cmp(&a.entry_date).then(ib.cmp(ia)));

        let total_count = matching.len() as i64;
        let entries = matching
            .into_iter()
            .skip(query.skip() as usize)
            .take(query.take() as usize)
            .map(|(_, e)| e.clone())
            .collect();

        Ok(HistoryPage {
            entries,
            total_count,
        })
    }

    async fn commit(&self, change_set: LedgerChangeSet) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let LedgerChangeSet {
            balance,
            expected_version,
            entry,
            outbox,
        } = change_set;

        let slot = (balance.account_id(), balance.currency_code().clone());
        let stored_version = state.balances.get(&slot).map_or(0, |b| b.version());
        if stored_version != expected_version {
            return Err(StoreError::VersionConflict {
                account_id: balance.account_id(),
                currency_code: balance.currency_code().to_string(),
                expected: expected_version,
            });
        }

        // Validate every constraint before touching state
        if let Some(entry) = &entry {
            if let Some(key) = &entry.idempotency_key {
                if state.idempotency_keys.contains_key(key) {
                    return Err(StoreError::DuplicateIdempotencyKey(key.to_string()));
                }
            }
            if let Some(original) = entry.original_entry_id {
                if state.voids.contains_key(&original) {
                    return Err(StoreError::DuplicateVoid(original));
                }
            }
        }

        state.balances.insert(slot, balance);

        if let Some(entry) = entry {
            if let Some(key) = &entry.idempotency_key {
                state.idempotency_keys.insert(key.clone(), entry.id);
            }
            if let Some(original) = entry.original_entry_id {
                state.voids.insert(original, entry.id);
            }
            let index = state.entries.len();
            state.entry_index.insert(entry.id, index);
            state.entries.push(entry);
        }

        state.outbox.extend(outbox);
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryLedgerStore {
    async fn claim_batch(
        &self,
        batch_size: usize,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<OutboxMessage>, StoreError> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        let mut eligible: Vec<usize> = state
            .outbox
            .iter()
            .enumerate()
            .filter(|(_, m)| match m.status {
                OutboxStatus::Pending => true,
                OutboxStatus::Processing => m.claimed_at.map_or(true, |at| at < stale_before),
                _ => false,
            })
            .map(|(i, _)| i)
            .collect();
        eligible.sort_by_key(|&i| (state.outbox[i].occurred_at, i));
        eligible.truncate(batch_size);

        let mut claimed = Vec::with_capacity(eligible.len());
        for i in eligible {
            let message = &mut state.outbox[i];
            // A reclaim must never reuse the previous claim's timestamp
            let claimed_at = match message.claimed_at {
                Some(previous) if previous >= now => previous + chrono::Duration::microseconds(1),
                _ => now,
            };
            message.status = OutboxStatus::Processing;
            message.claimed_at = Some(claimed_at);
            claimed.push(message.clone());
        }
        Ok(claimed)
    }

    async fn mark_completed(&self, id: Uuid, claimed_at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let message = state.claimed_mut(id, claimed_at)?;
        message.status = OutboxStatus::Completed;
        message.processed_at = Some(Utc::now());
        message.claimed_at = None;
        message.error = None;
        Ok(())
    }

    async fn record_failure(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        error: &str,
        max_retries: i32,
    ) -> Result<OutboxStatus, StoreError> {
        let mut state = self.state.write().await;
        let message = state.claimed_mut(id, claimed_at)?;
        message.retry_count += 1;
        message.status = if message.retry_count >= max_retries {
            OutboxStatus::Failed
        } else {
            OutboxStatus::Pending
        };
        message.error = Some(error.to_string());
        message.claimed_at = None;
        Ok(message.status)
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let message = state.claimed_mut(id, claimed_at)?;
        message.status = OutboxStatus::Failed;
        message.error = Some(error.to_string());
        message.claimed_at = None;
        Ok(())
    }

    async fn get_message(&self, id: Uuid) -> Result<Option<OutboxMessage>, StoreError> {
        let state = self.state.read().await;
        Ok(state.outbox.iter().find(|m| m.id == id).cloned())
    }

    async fn failed_messages(&self, limit: i64) -> Result<Vec<OutboxMessage>, StoreError> {
        let state = self.state.read().await;
        let mut failed: Vec<_> = state
            .outbox
            .iter()
            .filter(|m| m.status == OutboxStatus::Failed)
            .cloned()
            .collect();
        failed.sort_by_key(|m| m.occurred_at);
        failed.truncate(limit.max(0) as usize);
        Ok(failed)
    }

    async fn status_counts(&self) -> Result<OutboxStatusCounts, StoreError> {
        let state = self.state.read().await;
        let mut counts = OutboxStatusCounts::default();
        for message in &state.outbox {
            counts.add(message.status, 1);
        }
        Ok(counts)
    }

    async fn purge_completed(&self, processed_before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let before = state.outbox.len();
        state.outbox.retain(|m| {
            !(m.status == OutboxStatus::Completed
                && m.processed_at.map_or(false, |at| at < processed_before))
        });
        Ok((before - state.outbox.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{EntryType, NewEntry};
    use crate::domain::{MinorUnits, OperationContext};
    use crate::outbox::EventEmitter;

    fn mad() -> CurrencyCode {
        CurrencyCode::new("MAD").unwrap()
    }

    fn credit_change_set(
        balance: &mut AccountBalance,
        amount: i64,
        key: Option<&str>,
    ) -> LedgerChangeSet {
        let expected = balance.version();
        let mut emitter = EventEmitter::new();
        emitter.emit(balance.credit(MinorUnits::new(amount).unwrap()).unwrap());
        let (entry, created) = LedgerEntry::post(
            balance,
            NewEntry {
                entry_type: EntryType::Credit,
                amount: MinorUnits::new(amount).unwrap(),
                description: "deposit".to_string(),
                reference: None,
                transaction_id: None,
                idempotency_key: key.map(|k| IdempotencyKey::new(k).unwrap()),
            },
        )
        .unwrap();
        emitter.emit(created);

        LedgerChangeSet::new(balance.clone(), expected)
            .with_entry(entry)
            .with_outbox(emitter.into_outbox(&OperationContext::new()).unwrap())
    }

    #[tokio::test]
    async fn test_commit_persists_everything() {
        let store = InMemoryLedgerStore::new();
        let account_id = Uuid::new_v4();
        let mut balance = AccountBalance::open(account_id, mad());

        store
            .commit(credit_change_set(&mut balance, 500, Some("k1")))
            .await
            .unwrap();

        let loaded = store.load_balance(account_id, &mad()).await.unwrap().unwrap();
        assert_eq!(loaded.balance_minor_units(), 500);
        assert_eq!(loaded.version(), 1);
        assert_eq!(store.entries().await.len(), 1);
        assert_eq!(store.outbox_messages().await.len(), 2);

        let key = IdempotencyKey::new("k1").unwrap();
        assert!(store.find_entry_by_idempotency_key(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stale_version_rejected_without_side_effects() {
        let store = InMemoryLedgerStore::new();
        let account_id = Uuid::new_v4();
        let mut first = AccountBalance::open(account_id, mad());
        let mut second = AccountBalance::open(account_id, mad());

        store.commit(credit_change_set(&mut first, 100, None)).await.unwrap();
        let result = store.commit(credit_change_set(&mut second, 200, None)).await;

        assert!(matches!(result, Err(StoreError::VersionConflict { expected: 0, .. })));
        assert_eq!(store.entries().await.len(), 1);
        assert_eq!(store.outbox_messages().await.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_idempotency_key_rejected() {
        let store = InMemoryLedgerStore::new();
        let mut a = AccountBalance::open(Uuid::new_v4(), mad());
        let mut b = AccountBalance::open(Uuid::new_v4(), mad());

        store.commit(credit_change_set(&mut a, 100, Some("same"))).await.unwrap();
        let result = store.commit(credit_change_set(&mut b, 100, Some("same"))).await;

        assert!(matches!(result, Err(StoreError::DuplicateIdempotencyKey(k)) if k == "same"));
        assert!(store.load_balance(b.account_id(), &mad()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_is_exclusive_until_lease_expires() {
        let store = InMemoryLedgerStore::new();
        let mut balance = AccountBalance::open(Uuid::new_v4(), mad());
        store.commit(credit_change_set(&mut balance, 100, None)).await.unwrap();

        let long_ago = Utc::now() - chrono::Duration::minutes(5);
        let first = store.claim_batch(10, long_ago).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].event_type, "BalanceUpdated");

        let second = store.claim_batch(10, long_ago).await.unwrap();
        assert!(second.is_empty());

        // Every claim is older than "the future", so all are reclaimable
        let future = Utc::now() + chrono::Duration::seconds(1);
        let reclaimed = store.claim_batch(10, future).await.unwrap();
        assert_eq!(reclaimed.len(), 2);
    }

    #[tokio::test]
    async fn test_record_failure_reaches_failed() {
        let store = InMemoryLedgerStore::new();
        let mut balance = AccountBalance::open(Uuid::new_v4(), mad());
        store.commit(credit_change_set(&mut balance, 100, None)).await.unwrap();

        let past = Utc::now() - chrono::Duration::minutes(5);
        let claim = store.claim_batch(1, past).await.unwrap().remove(0);
        let (id, claimed_at) = (claim.id, claim.claimed_at.unwrap());

        assert_eq!(
            store.record_failure(id, claimed_at, "down", 2).await.unwrap(),
            OutboxStatus::Pending
        );
        let claimed_at = store.claim_batch(1, past).await.unwrap()[0].claimed_at.unwrap();
        assert_eq!(
            store.record_failure(id, claimed_at, "down", 2).await.unwrap(),
            OutboxStatus::Failed
        );

        let message = store.get_message(id).await.unwrap().unwrap();
        assert_eq!(message.retry_count, 2);
        assert_eq!(message.error.as_deref(), Some("down"));
        assert_eq!(store.failed_messages(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_completed_requires_claim() {
        let store = InMemoryLedgerStore::new();
        let result = store.mark_completed(Uuid::new_v4(), Utc::now()).await;
        assert!(matches!(result, Err(StoreError::MessageNotClaimed(_))));
    }

    #[tokio::test]
    async fn test_superseded_claim_cannot_update() {
        let store = InMemoryLedgerStore::new();
        let mut balance = AccountBalance::open(Uuid::new_v4(), mad());
        store.commit(credit_change_set(&mut balance, 100, None)).await.unwrap();

        let past = Utc::now() - chrono::Duration::minutes(5);
        let first = store.claim_batch(1, past).await.unwrap().remove(0);
        let first_claim = first.claimed_at.unwrap();

        // Lease treated as expired; a second worker takes the row over
        let future = Utc::now() + chrono::Duration::seconds(1);
        let second = store.claim_batch(1, future).await.unwrap().remove(0);
        let second_claim = second.claimed_at.unwrap();
        assert_eq!(second.id, first.id);
        assert!(second_claim > first_claim);

        let id = first.id;
        assert!(matches!(
            store.record_failure(id, first_claim, "late", 3).await,
            Err(StoreError::MessageNotClaimed(_))
        ));
        assert!(matches!(
            store.mark_completed(id, first_claim).await,
            Err(StoreError::MessageNotClaimed(_))
        ));
        assert!(matches!(
            store.mark_failed(id, first_claim, "late").await,
            Err(StoreError::MessageNotClaimed(_))
        ));

        let untouched = store.get_message(id).await.unwrap().unwrap();
        assert_eq!(untouched.status, OutboxStatus::Processing);
        assert_eq!(untouched.retry_count, 0);
        assert!(untouched.error.is_none());

        store.mark_completed(id, second_claim).await.unwrap();
        let done = store.get_message(id).await.unwrap().unwrap();
        assert_eq!(done.status, OutboxStatus::Completed);
    }

    #[tokio::test]
    async fn test_purge_completed() {
        let store = InMemoryLedgerStore::new();
        let mut balance = AccountBalance::open(Uuid::new_v4(), mad());
        store.commit(credit_change_set(&mut balance, 100, None)).await.unwrap();

        let past = Utc::now() - chrono::Duration::minutes(5);
        for message in store.claim_batch(10, past).await.unwrap() {
            store
                .mark_completed(message.id, message.claimed_at.unwrap())
                .await
                .unwrap();
        }

        assert_eq!(store.purge_completed(past).await.unwrap(), 0);
        let purged = store
            .purge_completed(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(purged, 2);
        assert_eq!(store.status_counts().await.unwrap().total(), 0);
    }
}
