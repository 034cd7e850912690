//! Schema creation and in-place upgrades
//!
//! The store is a single SQLite file with WAL journaling. Tables are created
//! on open; columns added in later releases are back-filled with ALTER TABLE
//! so older databases upgrade in place. The lock table holds no persistent
//! data, so a pre-hostname lock table is dropped and recreated instead.

use eyre::{Result, WrapErr};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

/// Create all tables and run in-place upgrades.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cycles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            token TEXT NOT NULL,
            input_amount TEXT NOT NULL,
            x_out TEXT,
            usdc_out TEXT,
            vcred_out TEXT,
            state TEXT NOT NULL DEFAULT 'DETECTED',
            last_error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .wrap_err("Failed to create cycles table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS steps (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            cycle_id INTEGER NOT NULL REFERENCES cycles(id),
            kind TEXT NOT NULL,
            chain_id INTEGER NOT NULL,
            tx_hash TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            gas_used TEXT,
            effective_gas_price TEXT,
            error TEXT,
            withdrawal_hash TEXT,
            withdrawal_envelope TEXT,
            message_guid TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .wrap_err("Failed to create steps table")?;

    // At most one non-failed step per (cycle, kind)
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_steps_one_active
        ON steps(cycle_id, kind) WHERE status != 'failed'
        "#,
    )
    .execute(pool)
    .await
    .wrap_err("Failed to create steps index")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ledger (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            cycle_id INTEGER NOT NULL REFERENCES cycles(id),
            step_id INTEGER NOT NULL REFERENCES steps(id),
            kind TEXT NOT NULL,
            chain_id INTEGER NOT NULL,
            token TEXT NOT NULL,
            amount TEXT NOT NULL,
            tx_hash TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .wrap_err("Failed to create ledger table")?;

    upgrade_lock_table(pool).await?;

    // Columns added after the first release; older files gain them on open.
    ensure_column(pool, "cycles", "last_error", "TEXT").await?;
    ensure_column(pool, "steps", "withdrawal_envelope", "TEXT").await?;
    ensure_column(pool, "steps", "message_guid", "TEXT").await?;

    Ok(())
}

/// The lock table is transient: if an old file predates the hostname
/// column, drop and recreate rather than migrating.
async fn upgrade_lock_table(pool: &SqlitePool) -> Result<()> {
    let exists: Option<(String,)> = sqlx::query_as(
        r#"SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'keeper_lock'"#,
    )
    .fetch_optional(pool)
    .await
    .wrap_err("Failed to inspect keeper_lock table")?;

    if exists.is_some() && !has_column(pool, "keeper_lock", "hostname").await? {
        tracing::warn!("keeper_lock table predates hostname tracking; recreating");
        sqlx::query("DROP TABLE keeper_lock")
            .execute(pool)
            .await
            .wrap_err("Failed to drop stale keeper_lock table")?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS keeper_lock (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            acquired_at TEXT NOT NULL,
            pid INTEGER NOT NULL,
            hostname TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .wrap_err("Failed to create keeper_lock table")?;

    Ok(())
}

/// Whether `table` has `column` (via PRAGMA table_info).
pub async fn has_column(pool: &SqlitePool, table: &str, column: &str) -> Result<bool> {
    let rows = sqlx::query(&format!("PRAGMA table_info({})", table))
        .fetch_all(pool)
        .await
        .wrap_err_with(|| format!("Failed to read table_info for {}", table))?;

    Ok(rows
        .iter()
        .any(|row| row.get::<String, _>("name") == column))
}

/// Add `column` to `table` if missing.
async fn ensure_column(pool: &SqlitePool, table: &str, column: &str, ddl: &str) -> Result<()> {
    if has_column(pool, table, column).await? {
        return Ok(());
    }
    tracing::info!(table, column, "Adding missing column");
    sqlx::query(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, ddl))
        .execute(pool)
        .await
        .wrap_err_with(|| format!("Failed to add column {}.{}", table, column))?;
    Ok(())
}
