//! Outbox Store
//!
//! Persistence operations used by the processor and maintenance jobs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::store::StoreError;

use super::{OutboxMessage, OutboxStatus, OutboxStatusCounts};

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Claim up to `batch_size` messages and move them to Processing.
    ///
    /// Eligible rows are Pending ones plus Processing ones whose claim is older
    /// than `stale_before`. Concurrent claimers never receive the same row.
    /// Returned in `occurred_at` order.
    async fn claim_batch(
        &self,
        batch_size: usize,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<OutboxMessage>, StoreError>;

    /// Processing -> Completed, stamping `processed_at`.
    ///
    /// `claimed_at` is the claim the caller holds. If the row was reclaimed
    /// since, the update is refused with `MessageNotClaimed`; the same holds
    /// for [`record_failure`](Self::record_failure) and
    /// [`mark_failed`](Self::mark_failed).
    async fn mark_completed(&self, id: Uuid, claimed_at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Count a failed delivery attempt.
    ///
    /// Returns Pending while `retry_count` stays below `max_retries`,
    /// otherwise Failed. The error text is kept either way.
    async fn record_failure(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        error: &str,
        max_retries: i32,
    ) -> Result<OutboxStatus, StoreError>;

    /// Processing -> Failed immediately (payload cannot be decoded)
    async fn mark_failed(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StoreError>;

    async fn get_message(&self, id: Uuid) -> Result<Option<OutboxMessage>, StoreError>;

    /// Failed messages, oldest first
    async fn failed_messages(&self, limit: i64) -> Result<Vec<OutboxMessage>, StoreError>;

    async fn status_counts(&self) -> Result<OutboxStatusCounts, StoreError>;

    /// Delete Completed messages processed before `processed_before`
    async fn purge_completed(&self, processed_before: DateTime<Utc>) -> Result<u64, StoreError>;
}
