//! Persistent store integration tests
//!
//! Exercises the schema, the step uniqueness invariant, cycle queries, and
//! the single-instance lock against an in-memory SQLite database.

use chrono::{Duration, TimeZone, Utc};

use vcred_keeper::db::models::{NewCycle, NewLedgerEntry, NewStep};
use vcred_keeper::db::{lock, Store};
use vcred_keeper::types::{CycleState, StepKind};

fn t0() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

async fn store_with_cycle() -> (Store, i64) {
    let store = Store::open_in_memory().await.unwrap();
    let id = store
        .create_cycle(
            &NewCycle {
                token: "WETH".into(),
                input_amount: "10000000".into(),
            },
            t0(),
        )
        .await
        .unwrap();
    (store, id)
}

#[tokio::test]
async fn test_create_and_fetch_cycle() {
    let (store, id) = store_with_cycle().await;
    let cycle = store.get_cycle(id).await.unwrap().unwrap();

    assert_eq!(cycle.token, "WETH");
    assert_eq!(cycle.input_amount, "10000000");
    assert_eq!(cycle.state().unwrap(), CycleState::Detected);
    assert!(cycle.x_out.is_none());
}

#[tokio::test]
async fn test_state_and_amount_updates() {
    let (store, id) = store_with_cycle().await;

    store
        .update_cycle_amounts(id, Some("4050000000000000"), None, None, t0())
        .await
        .unwrap();
    store
        .update_cycle_state(id, CycleState::L2SwapDone, t0())
        .await
        .unwrap();

    let cycle = store.get_cycle(id).await.unwrap().unwrap();
    assert_eq!(cycle.state().unwrap(), CycleState::L2SwapDone);
    assert_eq!(cycle.x_out.as_deref(), Some("4050000000000000"));

    // COALESCE keeps earlier amounts when later updates pass None
    store
        .update_cycle_amounts(id, None, Some("10100000"), None, t0())
        .await
        .unwrap();
    let cycle = store.get_cycle(id).await.unwrap().unwrap();
    assert_eq!(cycle.x_out.as_deref(), Some("4050000000000000"));
    assert_eq!(cycle.usdc_out.as_deref(), Some("10100000"));
}

#[tokio::test]
async fn test_active_cycle_queries_exclude_terminal() {
    let (store, first) = store_with_cycle().await;
    let second = store
        .create_cycle(
            &NewCycle {
                token: "WBTC".into(),
                input_amount: "5000000".into(),
            },
            t0(),
        )
        .await
        .unwrap();

    store.fail_cycle(first, "execution reverted", t0()).await.unwrap();

    let active = store.get_active_cycles().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, second);
    assert_eq!(store.count_active_cycles().await.unwrap(), 1);

    let failed = store.get_cycles_by_state(CycleState::Failed).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].last_error.as_deref(), Some("execution reverted"));
}

#[tokio::test]
async fn test_recent_cycles_ordering_and_limit() {
    let store = Store::open_in_memory().await.unwrap();
    for i in 0..5 {
        store
            .create_cycle(
                &NewCycle {
                    token: "WETH".into(),
                    input_amount: format!("{}", 1_000_000 * (i + 1)),
                },
                t0(),
            )
            .await
            .unwrap();
    }

    let recent = store.get_recent_cycles(3).await.unwrap();
    assert_eq!(recent.len(), 3);
    // Newest first
    assert!(recent[0].id > recent[1].id);
    assert!(recent[1].id > recent[2].id);
}

#[tokio::test]
async fn test_one_non_failed_step_per_kind() {
    let (store, cycle_id) = store_with_cycle().await;
    let step = NewStep {
        cycle_id,
        kind: StepKind::L2Swap,
        chain_id: 1135,
    };

    let first = store.insert_step(&step, t0()).await.unwrap();

    // A second non-failed L2_SWAP step violates the unique index
    assert!(store.insert_step(&step, t0()).await.is_err());

    // After the first fails, a retry row is allowed
    store
        .update_step_failed(first, "simulation failed", t0())
        .await
        .unwrap();
    let second = store.insert_step(&step, t0()).await.unwrap();
    assert_ne!(first, second);

    let active = store
        .find_active_step(cycle_id, StepKind::L2Swap)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.id, second);
}

#[tokio::test]
async fn test_step_lifecycle_and_ledger() {
    let (store, cycle_id) = store_with_cycle().await;
    let step_id = store
        .insert_step(
            &NewStep {
                cycle_id,
                kind: StepKind::L1Swap,
                chain_id: 1,
            },
            t0(),
        )
        .await
        .unwrap();

    store
        .update_step_submitted(step_id, "0xabc123", t0())
        .await
        .unwrap();
    store
        .update_step_confirmed(step_id, Some("21000"), Some("1000000000"), t0())
        .await
        .unwrap();

    let step = store.get_step(step_id).await.unwrap().unwrap();
    assert!(step.is_confirmed());
    assert_eq!(step.tx_hash.as_deref(), Some("0xabc123"));
    assert_eq!(
        step.gas_cost().unwrap().unwrap().to_string(),
        "21000000000000"
    );

    store
        .insert_ledger(
            &NewLedgerEntry {
                cycle_id,
                step_id,
                kind: "GAS".into(),
                chain_id: 1,
                token: "NATIVE".into(),
                amount: "21000000000000".into(),
                tx_hash: Some("0xabc123".into()),
            },
            t0(),
        )
        .await
        .unwrap();

    let ledger = store.get_ledger_for_cycle(cycle_id).await.unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].amount, "21000000000000");
}

#[tokio::test]
async fn test_withdrawal_data_round_trip() {
    let (store, cycle_id) = store_with_cycle().await;
    let step_id = store
        .insert_step(
            &NewStep {
                cycle_id,
                kind: StepKind::BridgeOut,
                chain_id: 1135,
            },
            t0(),
        )
        .await
        .unwrap();

    store
        .set_step_withdrawal(step_id, "0xdead", "{\"nonce\":\"0x1\"}", t0())
        .await
        .unwrap();
    let step = store.get_step(step_id).await.unwrap().unwrap();
    assert_eq!(step.withdrawal_hash.as_deref(), Some("0xdead"));
    assert!(step.withdrawal_envelope.unwrap().contains("nonce"));
}

#[tokio::test]
async fn test_schema_upgrades_legacy_database_in_place() {
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;

    let path = std::env::temp_dir().join(format!(
        "keeper-upgrade-{}-{}.db",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .subsec_nanos()
    ));
    let _ = std::fs::remove_file(&path);

    // Hand-craft a legacy database: cycles without last_error, steps
    // without withdrawal_envelope/message_guid, and a keeper_lock table
    // predating hostname tracking, with rows in all three.
    {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .unwrap()
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();

        sqlx::query(
            r#"
            CREATE TABLE cycles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                token TEXT NOT NULL,
                input_amount TEXT NOT NULL,
                x_out TEXT,
                usdc_out TEXT,
                vcred_out TEXT,
                state TEXT NOT NULL DEFAULT 'DETECTED',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        sqlx::query(
            r#"
            CREATE TABLE steps (
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
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        sqlx::query(
            r#"
            CREATE TABLE keeper_lock (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                acquired_at TEXT NOT NULL,
                pid INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        sqlx::query(
            r#"
            INSERT INTO cycles (token, input_amount, state, created_at, updated_at)
            VALUES ('WETH', '10000000', 'ON_L1', $1, $1)
            "#,
        )
        .bind(t0())
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            r#"
            INSERT INTO steps (cycle_id, kind, chain_id, tx_hash, status, created_at, updated_at)
            VALUES (1, 'L2_SWAP', 1135, '0xabc', 'confirmed', $1, $1)
            "#,
        )
        .bind(t0())
        .execute(&pool)
        .await
        .unwrap();
        // A live-PID row that would refuse acquisition if it survived
        sqlx::query(r#"INSERT INTO keeper_lock (id, acquired_at, pid) VALUES (1, $1, $2)"#)
            .bind(t0())
            .bind(std::process::id() as i64)
            .execute(&pool)
            .await
            .unwrap();

        pool.close().await;
    }

    // Opening the store upgrades the file in place
    let store = Store::open(&path).await.unwrap();

    // Legacy rows survive; the added columns read back as NULL
    let cycle = store.get_cycle(1).await.unwrap().unwrap();
    assert_eq!(cycle.token, "WETH");
    assert_eq!(cycle.input_amount, "10000000");
    assert_eq!(cycle.state().unwrap(), CycleState::OnL1);
    assert!(cycle.last_error.is_none());

    let step = store.get_step(1).await.unwrap().unwrap();
    assert_eq!(step.tx_hash.as_deref(), Some("0xabc"));
    assert!(step.is_confirmed());
    assert!(step.withdrawal_envelope.is_none());
    assert!(step.message_guid.is_none());

    // The added columns are writable through the normal API
    store.fail_cycle(1, "execution reverted", t0()).await.unwrap();
    let cycle = store.get_cycle(1).await.unwrap().unwrap();
    assert_eq!(cycle.last_error.as_deref(), Some("execution reverted"));

    store.set_step_message_guid(1, "0x0909", t0()).await.unwrap();
    let step = store.get_step(1).await.unwrap().unwrap();
    assert_eq!(step.message_guid.as_deref(), Some("0x0909"));

    // The pre-hostname lock table holds no durable data, so it was
    // dropped and recreated: the old row (our own living PID) is gone
    // and acquisition succeeds
    let hostname = lock::local_hostname();
    store
        .acquire_lock(std::process::id() as i64, &hostname, t0())
        .await
        .unwrap();

    drop(store);
    let _ = std::fs::remove_file(&path);
    let _ = std::fs::remove_file(format!("{}-wal", path.display()));
    let _ = std::fs::remove_file(format!("{}-shm", path.display()));
}

#[tokio::test]
async fn test_lock_refuses_living_local_holder() {
    let store = Store::open_in_memory().await.unwrap();
    let hostname = lock::local_hostname();
    let our_pid = std::process::id() as i64;

    store.acquire_lock(our_pid, &hostname, t0()).await.unwrap();

    // A second keeper on the same host sees a living holder and refuses
    let err = store
        .acquire_lock(our_pid + 1, &hostname, t0() + Duration::seconds(5))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already running"));
}

#[tokio::test]
async fn test_lock_reclaims_dead_and_foreign_holders() {
    let store = Store::open_in_memory().await.unwrap();
    let hostname = lock::local_hostname();
    let our_pid = std::process::id() as i64;

    // Dead local process (PID 0 never runs)
    store.acquire_lock(0, &hostname, t0()).await.unwrap();
    store
        .acquire_lock(our_pid, &hostname, t0() + Duration::seconds(1))
        .await
        .unwrap();
    store.release_lock(our_pid, &hostname).await.unwrap();

    // Foreign host is stale regardless of PID
    store
        .acquire_lock(our_pid, "some-other-host", t0())
        .await
        .unwrap();
    store
        .acquire_lock(our_pid, &hostname, t0() + Duration::seconds(2))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_release_only_removes_own_lock() {
    let store = Store::open_in_memory().await.unwrap();
    let hostname = lock::local_hostname();
    let our_pid = std::process::id() as i64;

    store.acquire_lock(our_pid, &hostname, t0()).await.unwrap();

    // A different (pid, hostname) pair must not release our lock
    store.release_lock(our_pid, "some-other-host").await.unwrap();
    let err = store
        .acquire_lock(our_pid + 1, &hostname, t0())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already running"));
}
