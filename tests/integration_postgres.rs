//! Integration tests for the Postgres store
//!
//! Need a database: DATABASE_URL=... cargo test --test integration_postgres -- --ignored --test-threads=1

use std::collections::HashSet;
use std::sync::Arc;

use finitech_ledger::handlers::{
    PostTransactionCommand, PostTransactionHandler, PostingStatus, VoidTransactionCommand,
    VoidTransactionHandler,
};
use finitech_ledger::outbox::{OutboxStatus, OutboxStore};
use finitech_ledger::query::{HistoryQuery, LedgerQueries};
use finitech_ledger::store::{LedgerStore, PgLedgerStore, StoreError};
use finitech_ledger::{DomainError, LedgerError};
use uuid::Uuid;

mod common;

use common::{context, setup_test_db};

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_postgres_post_and_void() {
    let pool = setup_test_db().await;
    let store: Arc<dyn LedgerStore> = Arc::new(PgLedgerStore::new(pool));
    let post = PostTransactionHandler::new(store.clone());
    let void = VoidTransactionHandler::new(store.clone());
    let queries = LedgerQueries::new(store.clone());
    let ctx = context();
    let account = Uuid::new_v4();

    let deposit = post
        .execute(PostTransactionCommand::credit(account, "MAD", 50_000, "deposit"), &ctx)
        .await
        .unwrap();
    let keyed = PostTransactionCommand::credit(account, "MAD", 20_000, "deposit 2")
        .with_idempotency_key("pg-k1");
    let second = post.execute(keyed.clone(), &ctx).await.unwrap();
    let replay = post.execute(keyed, &ctx).await.unwrap();

    assert_eq!(second.new_balance_minor_units, 70_000);
    assert_eq!(replay.status, PostingStatus::AlreadyProcessed);
    assert_eq!(replay.entry_id, second.entry_id);

    let err = post
        .execute(PostTransactionCommand::debit(account, "MAD", 70_001, "too much"), &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Domain(DomainError::InsufficientBalance { .. })));

    let voided = void
        .execute(VoidTransactionCommand::new(deposit.entry_id, "chargeback"), &ctx)
        .await
        .unwrap();
    assert_eq!(voided.new_balance_minor_units, 20_000);

    let err = void
        .execute(VoidTransactionCommand::new(deposit.entry_id, "again"), &ctx)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "already_voided");

    let history = queries.get_history(&HistoryQuery::new(account)).await.unwrap();
    assert_eq!(history.total_count, 3);
    assert_eq!(history.entries[0].id, voided.void_entry_id);

    let balance = queries.get_balance(account, "MAD").await.unwrap().unwrap();
    assert_eq!(balance.balance_minor_units, 20_000);
    assert_eq!(balance.version, 3);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_postgres_stale_version_conflicts() {
    let pool = setup_test_db().await;
    let store = PgLedgerStore::new(pool);
    let post = PostTransactionHandler::new(Arc::new(store.clone()));
    let account = Uuid::new_v4();

    post.execute(PostTransactionCommand::credit(account, "USD", 100, "in"), &context())
        .await
        .unwrap();

    let currency = finitech_ledger::CurrencyCode::new("USD").unwrap();
    let mut balance = store.load_balance(account, &currency).await.unwrap().unwrap();
    balance
        .credit(finitech_ledger::MinorUnits::new(1).unwrap())
        .unwrap();

    // Written against version 0 although the row is at version 1
    let err = store
        .commit(finitech_ledger::store::LedgerChangeSet::new(balance, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::VersionConflict { .. }));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_postgres_concurrent_duplicates_post_once() {
    let pool = setup_test_db().await;
    let store: Arc<dyn LedgerStore> = Arc::new(PgLedgerStore::new(pool));
    let post = Arc::new(PostTransactionHandler::new(store.clone()));
    let account = Uuid::new_v4();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let post = post.clone();
        tasks.push(tokio::spawn(async move {
            let command = PostTransactionCommand::credit(account, "EUR", 300, "refund")
                .with_idempotency_key("pg-refund-1");
            post.execute(command, &context()).await
        }));
    }

    let mut entry_ids = HashSet::new();
    for task in tasks {
        entry_ids.insert(task.await.unwrap().unwrap().entry_id);
    }
    assert_eq!(entry_ids.len(), 1);

    let queries = LedgerQueries::new(store);
    let balance = queries.get_balance(account, "EUR").await.unwrap().unwrap();
    assert_eq!(balance.balance_minor_units, 300);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_postgres_outbox_lifecycle() {
    let pool = setup_test_db().await;
    let store = PgLedgerStore::new(pool);
    let post = PostTransactionHandler::new(Arc::new(store.clone()));

    post.execute(
        PostTransactionCommand::credit(Uuid::new_v4(), "MAD", 100, "in"),
        &context(),
    )
    .await
    .unwrap();

    let stale_before = chrono::Utc::now() - chrono::Duration::seconds(300);
    let first = store.claim_batch(10, stale_before).await.unwrap();
    assert_eq!(first.len(), 2);
    assert!(first.iter().all(|m| m.status == OutboxStatus::Processing));
    assert_eq!(first[0].event_type, "BalanceUpdated");
    assert!(first.iter().all(|m| m.initiated_by.as_deref() == Some("tests")));

    // Claimed rows are invisible to a second claimer
    assert!(store.claim_batch(10, stale_before).await.unwrap().is_empty());

    let first_claim = |i: usize| first[i].claimed_at.unwrap();

    store.mark_completed(first[0].id, first_claim(0)).await.unwrap();
    let status = store
        .record_failure(first[1].id, first_claim(1), "broker down", 1)
        .await
        .unwrap();
    assert_eq!(status, OutboxStatus::Failed);

    let err = store
        .mark_completed(first[1].id, first_claim(1))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::MessageNotClaimed(_)));

    let counts = store.status_counts().await.unwrap();
    assert_eq!(counts.completed, 1);
    assert_eq!(counts.failed, 1);

    let failed = store.failed_messages(10).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].error.as_deref(), Some("broker down"));

    let purged = store
        .purge_completed(chrono::Utc::now() + chrono::Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(purged, 1);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_postgres_reclaimed_row_refuses_old_claim() {
    let pool = setup_test_db().await;
    let store = PgLedgerStore::new(pool);
    let post = PostTransactionHandler::new(Arc::new(store.clone()));

    post.execute(
        PostTransactionCommand::credit(Uuid::new_v4(), "MAD", 100, "in"),
        &context(),
    )
    .await
    .unwrap();

    let past = chrono::Utc::now() - chrono::Duration::seconds(300);
    let stale = store.claim_batch(1, past).await.unwrap().remove(0);

    let future = chrono::Utc::now() + chrono::Duration::seconds(1);
    let fresh = store.claim_batch(1, future).await.unwrap().remove(0);
    assert_eq!(fresh.id, stale.id);
    assert!(fresh.claimed_at > stale.claimed_at);

    let err = store
        .record_failure(stale.id, stale.claimed_at.unwrap(), "late", 3)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::MessageNotClaimed(_)));

    let row = store.get_message(stale.id).await.unwrap().unwrap();
    assert_eq!(row.status, OutboxStatus::Processing);
    assert_eq!(row.retry_count, 0);

    store
        .mark_completed(fresh.id, fresh.claimed_at.unwrap())
        .await
        .unwrap();
}
