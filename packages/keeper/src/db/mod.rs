#![allow(dead_code)]

//! Persistent store
//!
//! An embedded SQLite database with WAL durability at `DATA_DIR/keeper.db`.
//! The pool is capped at one connection so every write is serialized; all
//! mutation goes through the typed methods here. Timestamps are supplied by
//! the caller (the reconciler's tick clock) so recovery and tests can run
//! against a simulated clock.

use chrono::{DateTime, Utc};
use eyre::{eyre, Result, WrapErr};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

pub mod lock;
pub mod models;
mod schema;

pub use models::*;

use crate::types::{CycleState, StepKind, StepStatus};

/// Typed handle over the keeper database.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database at `path` and bring the
    /// schema up to date.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .wrap_err("Invalid database path")?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .wrap_err("Failed to open keeper database")?;

        schema::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory store for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .wrap_err("Invalid in-memory options")?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .wrap_err("Failed to open in-memory database")?;

        schema::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ============ Cycles ============

    /// Insert a new cycle in DETECTED state; returns its id.
    pub async fn create_cycle(&self, cycle: &NewCycle, now: DateTime<Utc>) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO cycles (token, input_amount, state, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            RETURNING id
            "#,
        )
        .bind(&cycle.token)
        .bind(&cycle.input_amount)
        .bind(CycleState::Detected.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .wrap_err("Failed to insert cycle")?;

        Ok(row.get("id"))
    }

    pub async fn get_cycle(&self, id: i64) -> Result<Option<Cycle>> {
        let row = sqlx::query_as::<_, Cycle>(r#"SELECT * FROM cycles WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .wrap_err_with(|| format!("Failed to get cycle {}", id))?;
        Ok(row)
    }

    pub async fn update_cycle_state(
        &self,
        id: i64,
        state: CycleState,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(r#"UPDATE cycles SET state = $1, updated_at = $2 WHERE id = $3"#)
            .bind(state.as_str())
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .wrap_err_with(|| format!("Failed to update cycle {} state to {}", id, state))?;
        Ok(())
    }

    /// Mark a cycle FAILED with the captured error string.
    pub async fn fail_cycle(&self, id: i64, error: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"UPDATE cycles SET state = $1, last_error = $2, updated_at = $3 WHERE id = $4"#,
        )
        .bind(CycleState::Failed.as_str())
        .bind(error)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to mark cycle {} failed", id))?;
        Ok(())
    }

    /// Update the observed intermediate amounts. Passing None leaves the
    /// existing value untouched.
    pub async fn update_cycle_amounts(
        &self,
        id: i64,
        x_out: Option<&str>,
        usdc_out: Option<&str>,
        vcred_out: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE cycles SET
                x_out = COALESCE($1, x_out),
                usdc_out = COALESCE($2, usdc_out),
                vcred_out = COALESCE($3, vcred_out),
                updated_at = $4
            WHERE id = $5
            "#,
        )
        .bind(x_out)
        .bind(usdc_out)
        .bind(vcred_out)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to update cycle {} amounts", id))?;
        Ok(())
    }

    /// Cycles not yet in a terminal state, oldest first.
    pub async fn get_active_cycles(&self) -> Result<Vec<Cycle>> {
        let rows = sqlx::query_as::<_, Cycle>(
            r#"SELECT * FROM cycles WHERE state NOT IN ('COMPLETED', 'FAILED') ORDER BY id ASC"#,
        )
        .fetch_all(&self.pool)
        .await
        .wrap_err("Failed to get active cycles")?;
        Ok(rows)
    }

    pub async fn get_cycles_by_state(&self, state: CycleState) -> Result<Vec<Cycle>> {
        let rows =
            sqlx::query_as::<_, Cycle>(r#"SELECT * FROM cycles WHERE state = $1 ORDER BY id ASC"#)
                .bind(state.as_str())
                .fetch_all(&self.pool)
                .await
                .wrap_err("Failed to get cycles by state")?;
        Ok(rows)
    }

    pub async fn get_recent_cycles(&self, limit: i64) -> Result<Vec<Cycle>> {
        let rows =
            sqlx::query_as::<_, Cycle>(r#"SELECT * FROM cycles ORDER BY id DESC LIMIT $1"#)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
                .wrap_err("Failed to get recent cycles")?;
        Ok(rows)
    }

    pub async fn count_active_cycles(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"SELECT COUNT(*) FROM cycles WHERE state NOT IN ('COMPLETED', 'FAILED')"#,
        )
        .fetch_one(&self.pool)
        .await
        .wrap_err("Failed to count active cycles")?;
        Ok(row.0)
    }

    // ============ Steps ============

    /// Insert a new pending step; returns its id. The partial unique index
    /// rejects a second non-failed step of the same kind for a cycle.
    pub async fn insert_step(&self, step: &NewStep, now: DateTime<Utc>) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO steps (cycle_id, kind, chain_id, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING id
            "#,
        )
        .bind(step.cycle_id)
        .bind(step.kind.as_str())
        .bind(step.chain_id)
        .bind(StepStatus::Pending.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .wrap_err_with(|| {
            format!(
                "Failed to insert {} step for cycle {}",
                step.kind, step.cycle_id
            )
        })?;

        Ok(row.get("id"))
    }

    pub async fn get_step(&self, id: i64) -> Result<Option<Step>> {
        let row = sqlx::query_as::<_, Step>(r#"SELECT * FROM steps WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .wrap_err_with(|| format!("Failed to get step {}", id))?;
        Ok(row)
    }

    pub async fn get_steps_for_cycle(&self, cycle_id: i64) -> Result<Vec<Step>> {
        let rows =
            sqlx::query_as::<_, Step>(r#"SELECT * FROM steps WHERE cycle_id = $1 ORDER BY id ASC"#)
                .bind(cycle_id)
                .fetch_all(&self.pool)
                .await
                .wrap_err_with(|| format!("Failed to get steps for cycle {}", cycle_id))?;
        Ok(rows)
    }

    /// The non-failed step of a given kind for a cycle, if any. There is at
    /// most one by the store's unique index.
    pub async fn find_active_step(&self, cycle_id: i64, kind: StepKind) -> Result<Option<Step>> {
        let row = sqlx::query_as::<_, Step>(
            r#"SELECT * FROM steps WHERE cycle_id = $1 AND kind = $2 AND status != 'failed'"#,
        )
        .bind(cycle_id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to find {} step for cycle {}", kind, cycle_id))?;
        Ok(row)
    }

    pub async fn update_step_submitted(
        &self,
        id: i64,
        tx_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"UPDATE steps SET status = 'submitted', tx_hash = $1, updated_at = $2 WHERE id = $3"#,
        )
        .bind(tx_hash)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to update step {} as submitted", id))?;
        Ok(())
    }

    pub async fn update_step_confirmed(
        &self,
        id: i64,
        gas_used: Option<&str>,
        effective_gas_price: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE steps SET status = 'confirmed', gas_used = $1, effective_gas_price = $2,
                updated_at = $3
            WHERE id = $4
            "#,
        )
        .bind(gas_used)
        .bind(effective_gas_price)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to update step {} as confirmed", id))?;
        Ok(())
    }

    pub async fn update_step_failed(&self, id: i64, error: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"UPDATE steps SET status = 'failed', error = $1, updated_at = $2 WHERE id = $3"#,
        )
        .bind(error)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to update step {} as failed", id))?;
        Ok(())
    }

    /// Record the withdrawal identity extracted from a tunnel send.
    pub async fn set_step_withdrawal(
        &self,
        id: i64,
        withdrawal_hash: &str,
        envelope_json: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE steps SET withdrawal_hash = $1, withdrawal_envelope = $2, updated_at = $3
            WHERE id = $4
            "#,
        )
        .bind(withdrawal_hash)
        .bind(envelope_json)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to set withdrawal data on step {}", id))?;
        Ok(())
    }

    /// Record the cross-chain message GUID from an attested send.
    pub async fn set_step_message_guid(
        &self,
        id: i64,
        guid: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(r#"UPDATE steps SET message_guid = $1, updated_at = $2 WHERE id = $3"#)
            .bind(guid)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .wrap_err_with(|| format!("Failed to set message guid on step {}", id))?;
        Ok(())
    }

    // ============ Ledger ============

    pub async fn insert_ledger(&self, entry: &NewLedgerEntry, now: DateTime<Utc>) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO ledger (cycle_id, step_id, kind, chain_id, token, amount, tx_hash, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(entry.cycle_id)
        .bind(entry.step_id)
        .bind(&entry.kind)
        .bind(entry.chain_id)
        .bind(&entry.token)
        .bind(&entry.amount)
        .bind(&entry.tx_hash)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .wrap_err("Failed to insert ledger entry")?;

        Ok(row.get("id"))
    }

    pub async fn get_ledger_for_cycle(&self, cycle_id: i64) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query_as::<_, LedgerEntry>(
            r#"SELECT * FROM ledger WHERE cycle_id = $1 ORDER BY id ASC"#,
        )
        .bind(cycle_id)
        .fetch_all(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to get ledger for cycle {}", cycle_id))?;
        Ok(rows)
    }

    // ============ Single-instance lock ============

    /// Acquire the single-instance lock for (pid, hostname). Refuses when
    /// a living local process already holds it; reclaims stale holders.
    ///
    /// The read-then-replace runs under BEGIN IMMEDIATE: the write lock on
    /// the database file is taken before the read, so a second process
    /// racing on the same file cannot also observe the row as absent or
    /// stale and both walk away believing they hold the lock.
    pub async fn acquire_lock(&self, pid: i64, hostname: &str, now: DateTime<Utc>) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .wrap_err("Failed to acquire lock connection")?;

        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .wrap_err("Failed to begin exclusive lock transaction")?;

        match Self::write_lock_row(&mut *conn, pid, hostname, now).await {
            Ok(()) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .wrap_err("Failed to commit keeper lock")?;
                info!(pid, hostname, "Keeper lock acquired");
                Ok(())
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    /// The body of the lock acquisition, run inside the exclusive
    /// transaction held on `conn`.
    async fn write_lock_row(
        conn: &mut sqlx::sqlite::SqliteConnection,
        pid: i64,
        hostname: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let existing = sqlx::query_as::<_, KeeperLock>(r#"SELECT * FROM keeper_lock WHERE id = 1"#)
            .fetch_optional(&mut *conn)
            .await
            .wrap_err("Failed to read keeper lock")?;

        if let Some(held) = existing {
            if !lock::is_stale(&held, hostname) {
                return Err(eyre!(
                    "Keeper already running: pid {} on {} (since {})",
                    held.pid,
                    held.hostname,
                    held.acquired_at
                ));
            }
            warn!(
                stale_pid = held.pid,
                stale_hostname = %held.hostname,
                "Reclaiming stale keeper lock"
            );
        }

        sqlx::query(
            r#"
            INSERT INTO keeper_lock (id, acquired_at, pid, hostname)
            VALUES (1, $1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET acquired_at = $1, pid = $2, hostname = $3
            "#,
        )
        .bind(now)
        .bind(pid)
        .bind(hostname)
        .execute(&mut *conn)
        .await
        .wrap_err("Failed to write keeper lock")?;

        Ok(())
    }

    /// Release the lock if we hold it (graceful shutdown).
    pub async fn release_lock(&self, pid: i64, hostname: &str) -> Result<()> {
        sqlx::query(r#"DELETE FROM keeper_lock WHERE id = 1 AND pid = $1 AND hostname = $2"#)
            .bind(pid)
            .bind(hostname)
            .execute(&self.pool)
            .await
            .wrap_err("Failed to release keeper lock")?;
        Ok(())
    }
}
