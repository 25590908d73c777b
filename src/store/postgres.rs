//! Postgres store
//!
//! sqlx-backed [`LedgerStore`] and [`OutboxStore`]. A commit is one
//! transaction: the versioned balance write, the entry insert and the outbox
//! inserts succeed or fail together. Uniqueness of idempotency keys and voids
//! is enforced by constraints and mapped back to [`StoreError`] variants.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::aggregate::{AccountBalance, EntryType, LedgerEntry};
use crate::domain::CurrencyCode;
use crate::idempotency::IdempotencyKey;
use crate::outbox::{OutboxMessage, OutboxStatus, OutboxStatusCounts, OutboxStore};
use crate::query::{HistoryPage, HistoryQuery};

use super::{LedgerChangeSet, LedgerStore, StoreError};

const IDEMPOTENCY_KEY_CONSTRAINT: &str = "uq_ledger_entries_idempotency_key";
const VOID_CONSTRAINT: &str = "uq_ledger_entries_original_entry_id";

const ENTRY_COLUMNS: &str = "id, account_id, currency_code, entry_type, amount_minor_units, \
     description, reference, transaction_id, original_entry_id, entry_date, running_balance, \
     idempotency_key";

const OUTBOX_COLUMNS: &str = "id, event_type, payload, occurred_at, processed_at, claimed_at, \
     status, retry_count, error, correlation_id, initiated_by";

// =========================================================================
// Row mapping
// =========================================================================

#[derive(Debug, sqlx::FromRow)]
struct BalanceRow {
    account_id: Uuid,
    currency_code: String,
    balance_minor_units: i64,
    reserved_minor_units: i64,
    version: i64,
    last_updated_at: DateTime<Utc>,
}

impl TryFrom<BalanceRow> for AccountBalance {
    type Error = StoreError;

    fn try_from(row: BalanceRow) -> Result<Self, Self::Error> {
        let currency = CurrencyCode::new(&row.currency_code)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(AccountBalance::from_storage(
            row.account_id,
            currency,
            row.balance_minor_units,
            row.reserved_minor_units,
            row.version,
            row.last_updated_at,
        ))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EntryRow {
    id: Uuid,
    account_id: Uuid,
    currency_code: String,
    entry_type: String,
    amount_minor_units: i64,
    description: String,
    reference: Option<String>,
    transaction_id: Option<Uuid>,
    original_entry_id: Option<Uuid>,
    entry_date: DateTime<Utc>,
    running_balance: i64,
    idempotency_key: Option<String>,
}

impl TryFrom<EntryRow> for LedgerEntry {
    type Error = StoreError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = move |e: &dyn std::fmt::Display| StoreError::Corrupt(format!("entry {}: {}", id, e));

        let currency_code = CurrencyCode::new(&row.currency_code).map_err(|e| corrupt(&e))?;
        let entry_type = row.entry_type.parse::<EntryType>().map_err(|e| corrupt(&e))?;
        let idempotency_key = row
            .idempotency_key
            .as_deref()
            .map(IdempotencyKey::new)
            .transpose()
            .map_err(|e| corrupt(&e))?;

        Ok(LedgerEntry {
            id: row.id,
            account_id: row.account_id,
            currency_code,
            entry_type,
            amount_minor_units: row.amount_minor_units,
            description: row.description,
            reference: row.reference,
            transaction_id: row.transaction_id,
            original_entry_id: row.original_entry_id,
            entry_date: row.entry_date,
            running_balance: row.running_balance,
            idempotency_key,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OutboxRow {
    id: Uuid,
    event_type: String,
    payload: serde_json::Value,
    occurred_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    claimed_at: Option<DateTime<Utc>>,
    status: String,
    retry_count: i32,
    error: Option<String>,
    correlation_id: Option<String>,
    initiated_by: Option<String>,
}

impl TryFrom<OutboxRow> for OutboxMessage {
    type Error = StoreError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<OutboxStatus>()
            .map_err(|e| StoreError::Corrupt(format!("outbox message {}: {}", row.id, e)))?;

        Ok(OutboxMessage {
            id: row.id,
            event_type: row.event_type,
            payload: row.payload,
            occurred_at: row.occurred_at,
            processed_at: row.processed_at,
            claimed_at: row.claimed_at,
            status,
            retry_count: row.retry_count,
            error: row.error,
            correlation_id: row.correlation_id,
            initiated_by: row.initiated_by,
        })
    }
}

fn map_rows<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Translate unique violations on the entry constraints into store errors
fn map_entry_insert_error(err: sqlx::Error, entry: &LedgerEntry) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            match db_err.constraint() {
                Some(IDEMPOTENCY_KEY_CONSTRAINT) => {
                    let key = entry
                        .idempotency_key
                        .as_ref()
                        .map(|k| k.to_string())
                        .unwrap_or_default();
                    return StoreError::DuplicateIdempotencyKey(key);
                }
                Some(VOID_CONSTRAINT) => {
                    return StoreError::DuplicateVoid(entry.original_entry_id.unwrap_or(entry.id));
                }
                _ => {}
            }
        }
    }
    StoreError::Database(err)
}

// =========================================================================
// Store
// =========================================================================

#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn write_balance(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        balance: &AccountBalance,
        expected_version: i64,
    ) -> Result<(), StoreError> {
        let rows_affected = if expected_version == 0 {
            sqlx::query(
                r#"
                INSERT INTO account_balances (
                    account_id, currency_code, balance_minor_units,
                    reserved_minor_units, version, last_updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (account_id, currency_code) DO NOTHING
                "#,
            )
            .bind(balance.account_id())
            .bind(balance.currency_code().as_str())
            .bind(balance.balance_minor_units())
            .bind(balance.reserved_minor_units())
            .bind(balance.version())
            .bind(balance.last_updated_at())
            .execute(&mut **tx)
            .await?
            .rows_affected()
        } else {
            sqlx::query(
                r#"
                UPDATE account_balances
                SET balance_minor_units = $3,
                    reserved_minor_units = $4,
                    version = $5,
                    last_updated_at = $6
                WHERE account_id = $1 AND currency_code = $2 AND version = $7
                "#,
            )
            .bind(balance.account_id())
            .bind(balance.currency_code().as_str())
            .bind(balance.balance_minor_units())
            .bind(balance.reserved_minor_units())
            .bind(balance.version())
            .bind(balance.last_updated_at())
            .bind(expected_version)
            .execute(&mut **tx)
            .await?
            .rows_affected()
        };

        if rows_affected == 0 {
            return Err(StoreError::VersionConflict {
                account_id: balance.account_id(),
                currency_code: balance.currency_code().to_string(),
                expected: expected_version,
            });
        }

        Ok(())
    }

    async fn insert_entry(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        entry: &LedgerEntry,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO ledger_entries (
                id, account_id, currency_code, entry_type, amount_minor_units,
                description, reference, transaction_id, original_entry_id,
                entry_date, running_balance, idempotency_key
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(entry.id)
        .bind(entry.account_id)
        .bind(entry.currency_code.as_str())
        .bind(entry.entry_type.as_str())
        .bind(entry.amount_minor_units)
        .bind(&entry.description)
        .bind(&entry.reference)
        .bind(entry.transaction_id)
        .bind(entry.original_entry_id)
        .bind(entry.entry_date)
        .bind(entry.running_balance)
        .bind(entry.idempotency_key.as_ref().map(|k| k.as_str()))
        .execute(&mut **tx)
        .await
        .map_err(|e| map_entry_insert_error(e, entry))?;

        Ok(())
    }

    async fn insert_outbox_message(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        message: &OutboxMessage,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO outbox_messages (
                id, event_type, payload, occurred_at, status, retry_count, correlation_id,
                initiated_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(message.id)
        .bind(&message.event_type)
        .bind(&message.payload)
        .bind(message.occurred_at)
        .bind(message.status.as_str())
        .bind(message.retry_count)
        .bind(&message.correlation_id)
        .bind(&message.initiated_by)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn load_balance(
        &self,
        account_id: Uuid,
        currency_code: &CurrencyCode,
    ) -> Result<Option<AccountBalance>, StoreError> {
        let row: Option<BalanceRow> = sqlx::query_as(
            r#"
            SELECT account_id, currency_code, balance_minor_units,
                   reserved_minor_units, version, last_updated_at
            FROM account_balances
            WHERE account_id = $1 AND currency_code = $2
            "#,
        )
        .bind(account_id)
        .bind(currency_code.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(AccountBalance::try_from).transpose()
    }

    async fn balances_for_account(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<AccountBalance>, StoreError> {
        let rows: Vec<BalanceRow> = sqlx::query_as(
            r#"
            SELECT account_id, currency_code, balance_minor_units,
                   reserved_minor_units, version, last_updated_at
            FROM account_balances
            WHERE account_id = $1
            ORDER BY currency_code
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        map_rows(rows)
    }

    async fn find_entry(&self, entry_id: Uuid) -> Result<Option<LedgerEntry>, StoreError> {
        let sql = format!("SELECT {} FROM ledger_entries WHERE id = $1", ENTRY_COLUMNS);
        let row: Option<EntryRow> = sqlx::query_as(&sql)
            .bind(entry_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(LedgerEntry::try_from).transpose()
    }

    async fn find_entry_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        let sql = format!(
            "SELECT {} FROM ledger_entries WHERE idempotency_key = $1",
            ENTRY_COLUMNS
        );
        let row: Option<EntryRow> = sqlx::query_as(&sql)
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(LedgerEntry::try_from).transpose()
    }

    async fn find_void_of(
        &self,
        original_entry_id: Uuid,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        let sql = format!(
            "SELECT {} FROM ledger_entries WHERE original_entry_id = $1",
            ENTRY_COLUMNS
        );
        let row: Option<EntryRow> = sqlx::query_as(&sql)
            .bind(original_entry_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(LedgerEntry::try_from).transpose()
    }

    async fn history(&self, query: &HistoryQuery) -> Result<HistoryPage, StoreError> {
        const FILTER: &str = r#"
            WHERE account_id = $1
              AND ($2::varchar IS NULL OR currency_code = $2)
              AND ($3::varchar IS NULL OR entry_type = $3)
              AND ($4::timestamptz IS NULL OR entry_date >= $4)
              AND ($5::timestamptz IS NULL OR entry_date <= $5)
        "#;

        let currency = query.currency_code.as_ref().map(|c| c.as_str());
        let entry_type = query.entry_type.map(|t| t.as_str());

        let total_count: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM ledger_entries {}", FILTER))
                .bind(query.account_id)
                .bind(currency)
                .bind(entry_type)
                .bind(query.from_date)
                .bind(query.to_date)
                .fetch_one(&self.pool)
                .await?;

        let sql = format!(
            "SELECT {} FROM ledger_entries {} ORDER BY entry_date DESC, seq DESC OFFSET $6 LIMIT $7",
            ENTRY_COLUMNS, FILTER
        );
        let rows: Vec<EntryRow> = sqlx::query_as(&sql)
            .bind(query.account_id)
            .bind(currency)
            .bind(entry_type)
            .bind(query.from_date)
            .bind(query.to_date)
            .bind(query.skip())
            .bind(query.take())
            .fetch_all(&self.pool)
            .await?;

        Ok(HistoryPage {
            entries: map_rows(rows)?,
            total_count,
        })
    }

    async fn commit(&self, change_set: LedgerChangeSet) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        self.write_balance(&mut tx, &change_set.balance, change_set.expected_version)
            .await?;

        if let Some(entry) = &change_set.entry {
            self.insert_entry(&mut tx, entry).await?;
        }

        for message in &change_set.outbox {
            self.insert_outbox_message(&mut tx, message).await?;
        }

        tx.commit().await?;

        tracing::debug!(
            account_id = %change_set.balance.account_id(),
            currency = %change_set.balance.currency_code(),
            version = change_set.balance.version(),
            outbox_messages = change_set.outbox.len(),
            "Ledger change committed"
        );

        Ok(())
    }
}

#[async_trait]
impl OutboxStore for PgLedgerStore {
    async fn claim_batch(
        &self,
        batch_size: usize,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<OutboxMessage>, StoreError> {
        let sql = format!(
            r#"
            WITH claimed AS (
                UPDATE outbox_messages
                -- A reclaim always moves claimed_at forward; it fences the old holder
                SET status = 'processing',
                    claimed_at = GREATEST(clock_timestamp(), claimed_at + INTERVAL '1 microsecond')
                WHERE id IN (
                    SELECT id FROM outbox_messages
                    WHERE status = 'pending'
                       OR (status = 'processing' AND claimed_at < $2)
                    ORDER BY occurred_at, seq
                    LIMIT $1
                    FOR UPDATE SKIP LOCKED
                )
                RETURNING seq, {cols}
            )
            SELECT {cols} FROM claimed ORDER BY occurred_at, seq
            "#,
            cols = OUTBOX_COLUMNS
        );

        let rows: Vec<OutboxRow> = sqlx::query_as(&sql)
            .bind(batch_size as i64)
            .bind(stale_before)
            .fetch_all(&self.pool)
            .await?;

        map_rows(rows)
    }

    async fn mark_completed(&self, id: Uuid, claimed_at: DateTime<Utc>) -> Result<(), StoreError> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'completed', processed_at = NOW(), claimed_at = NULL, error = NULL
            WHERE id = $1 AND status = 'processing' AND claimed_at = $2
            "#,
        )
        .bind(id)
        .bind(claimed_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(StoreError::MessageNotClaimed(id));
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        error: &str,
        max_retries: i32,
    ) -> Result<OutboxStatus, StoreError> {
        // SET expressions see the pre-update retry_count
        let status: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE outbox_messages
            SET retry_count = retry_count + 1,
                status = CASE WHEN retry_count + 1 >= $3 THEN 'failed' ELSE 'pending' END,
                error = $2,
                claimed_at = NULL
            WHERE id = $1 AND status = 'processing' AND claimed_at = $4
            RETURNING status
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(max_retries)
        .bind(claimed_at)
        .fetch_optional(&self.pool)
        .await?;

        let status = status.ok_or(StoreError::MessageNotClaimed(id))?;
        status.parse::<OutboxStatus>().map_err(StoreError::Corrupt)
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StoreError> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'failed', error = $2, claimed_at = NULL
            WHERE id = $1 AND status = 'processing' AND claimed_at = $3
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(claimed_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(StoreError::MessageNotClaimed(id));
        }
        Ok(())
    }

    async fn get_message(&self, id: Uuid) -> Result<Option<OutboxMessage>, StoreError> {
        let sql = format!("SELECT {} FROM outbox_messages WHERE id = $1", OUTBOX_COLUMNS);
        let row: Option<OutboxRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(OutboxMessage::try_from).transpose()
    }

    async fn failed_messages(&self, limit: i64) -> Result<Vec<OutboxMessage>, StoreError> {
        let sql = format!(
            "SELECT {} FROM outbox_messages WHERE status = 'failed' ORDER BY occurred_at, seq LIMIT $1",
            OUTBOX_COLUMNS
        );
        let rows: Vec<OutboxRow> = sqlx::query_as(&sql)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;
        map_rows(rows)
    }

    async fn status_counts(&self) -> Result<OutboxStatusCounts, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM outbox_messages GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = OutboxStatusCounts::default();
        for (status, count) in rows {
            let status = status.parse::<OutboxStatus>().map_err(StoreError::Corrupt)?;
            counts.add(status, count);
        }
        Ok(counts)
    }

    async fn purge_completed(&self, processed_before: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM outbox_messages
            WHERE status = 'completed' AND processed_at < $1
            "#,
        )
        .bind(processed_before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
