//! Provider liveness probes
//!
//! Health is one representative cheap read per provider: quoters for the
//! DEX venues, fee quoting for the attested bridge, proven-withdrawal
//! lookups for the tunnel portal, and block numbers for the RPCs. Latency
//! classifies the result: under 2 s is healthy, under 3 s degraded, and
//! anything slower (or erroring) is flagged.

#![allow(dead_code)]

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::bridges::BridgeProvider;
use crate::gateway::ChainGateway;
use crate::swaps::SwapProvider;

/// Latency threshold below which a probe is healthy.
pub const HEALTHY_LATENCY_MS: u64 = 2_000;

/// Latency threshold below which a probe is merely degraded.
pub const DEGRADED_LATENCY_MS: u64 = 3_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Error,
}

/// Result of a single provider probe.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub status: HealthStatus,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProviderHealth {
    pub fn ok(latency_ms: u64) -> Self {
        Self {
            status: classify_latency(latency_ms),
            latency_ms,
            error: None,
        }
    }

    pub fn error(latency_ms: u64, error: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Error,
            latency_ms,
            error: Some(error.into()),
        }
    }
}

/// Map probe latency to a status.
pub fn classify_latency(latency_ms: u64) -> HealthStatus {
    if latency_ms < HEALTHY_LATENCY_MS {
        HealthStatus::Ok
    } else if latency_ms < DEGRADED_LATENCY_MS {
        HealthStatus::Degraded
    } else {
        HealthStatus::Error
    }
}

/// Run a probe, timing it and folding errors into the result.
pub async fn probe<F, Fut, T>(f: F) -> ProviderHealth
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = eyre::Result<T>>,
{
    let started = Instant::now();
    let result = f().await;
    let latency_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(_) => ProviderHealth::ok(latency_ms),
        Err(e) => ProviderHealth::error(latency_ms, e.to_string()),
    }
}

/// One provider's probe result, named for the report.
#[derive(Debug, Clone, Serialize)]
pub struct NamedHealth {
    pub name: String,
    #[serde(flatten)]
    pub health: ProviderHealth,
}

/// Probe every provider and both RPCs in parallel.
pub async fn snapshot(
    swaps: &[Arc<dyn SwapProvider>],
    bridges: &[Arc<dyn BridgeProvider>],
    gateway: &Arc<dyn ChainGateway>,
    l1_chain_id: u64,
    l2_chain_id: u64,
) -> Vec<NamedHealth> {
    let swap_probes = swaps.iter().map(|p| {
        let p = p.clone();
        async move {
            NamedHealth {
                name: format!("swap:{}", p.name()),
                health: p.check_health().await,
            }
        }
    });

    let bridge_probes = bridges.iter().map(|p| {
        let p = p.clone();
        async move {
            NamedHealth {
                name: format!("bridge:{}", p.name()),
                health: p.check_health().await,
            }
        }
    });

    let rpc_probes = [l1_chain_id, l2_chain_id].map(|chain_id| {
        let gateway = gateway.clone();
        async move {
            NamedHealth {
                name: format!("rpc:{}", chain_id),
                health: probe(|| async { gateway.block_number(chain_id).await }).await,
            }
        }
    });

    let (mut swap_results, bridge_results, rpc_results) = futures::join!(
        join_all(swap_probes),
        join_all(bridge_probes),
        join_all(rpc_probes.into_iter())
    );

    swap_results.extend(bridge_results);
    swap_results.extend(rpc_results);
    swap_results
}
