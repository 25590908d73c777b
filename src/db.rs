//! Database module
//!
//! Connection, schema verification and schema bootstrap.

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};

/// Schema applied by [`apply_schema`]
pub const SCHEMA_SQL: &str = include_str!("../migrations/0001_ledger_outbox.sql");

const REQUIRED_TABLES: [&str; 3] = ["account_balances", "ledger_entries", "outbox_messages"];

/// Open a connection pool
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Verify database connectivity
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Check if required tables exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    for table in REQUIRED_TABLES {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!("Required table '{}' does not exist", table);
            return Ok(false);
        }
    }

    Ok(true)
}

/// Create the ledger tables if they are missing
pub async fn apply_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Unprepared execution accepts multiple statements
    pool.execute(SCHEMA_SQL).await?;
    tracing::info!("Ledger schema applied");
    Ok(())
}
