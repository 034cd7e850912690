//! Startup recovery
//!
//! After the lock is acquired, scan FAILED cycles whose target-token
//! balance on L1 still matches the recorded bridge output. Those funds are
//! stranded mid-cycle; rewinding the cycle to ON_L1 lets the reconciler
//! retry the L1 swap, possibly through a different provider. The balance is
//! compared against the expected amount (within the bridge arrival
//! tolerance), not merely zero, so unrelated transfers cannot resurrect a
//! cycle.

use chrono::{DateTime, Utc};
use eyre::Result;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::db::Store;
use crate::gateway::ChainGateway;
use crate::logsink::LogSinks;
use crate::math::apply_tolerance_bps;
use crate::types::CycleState;
use evmkit_rs::registry::TokenRegistry;

/// Rewind recoverable FAILED cycles to ON_L1. Returns how many were
/// rewound.
pub async fn run_recovery(
    store: &Store,
    gateway: &Arc<dyn ChainGateway>,
    registry: &Arc<TokenRegistry>,
    tolerance_bps: u64,
    sinks: &Arc<LogSinks>,
    now: DateTime<Utc>,
) -> Result<u32> {
    let failed = store.get_cycles_by_state(CycleState::Failed).await?;
    let mut recovered = 0u32;

    for cycle in failed {
        let Some(expected) = cycle.x_out_amount()? else {
            continue;
        };
        if expected.is_zero() {
            continue;
        }

        let token = match registry.get(&cycle.token) {
            Ok(token) => token,
            Err(_) => continue,
        };
        let Ok(l1_address) = registry.address_on(token, registry.l1_chain_id) else {
            continue;
        };

        let balance = gateway
            .token_balance(registry.l1_chain_id, l1_address)
            .await?;
        let floor = apply_tolerance_bps(expected, tolerance_bps);
        if balance < floor {
            continue;
        }

        info!(
            cycle_id = cycle.id,
            token = %cycle.token,
            balance = %balance,
            expected = %expected,
            "Recovering failed cycle: funds still on L1, rewinding to ON_L1"
        );
        store
            .update_cycle_state(cycle.id, CycleState::OnL1, now)
            .await?;
        sinks.diag(
            "info",
            "cycle recovered",
            json!({
                "cycle_id": cycle.id,
                "token": cycle.token,
                "balance": balance.to_string(),
                "expected": expected.to_string(),
            }),
        );
        recovered += 1;
    }

    Ok(recovered)
}
