//! Swap provider set
//!
//! Uniform quoting and execution over heterogeneous venues: HTTP aggregator
//! APIs, the on-chain Uniswap V3 quoter used for reference pricing, and an
//! intent-style provider that settles through a pre-signed off-chain order.
//!
//! Quotes carry a pre-built transaction and age out after the configured
//! TTL; execution always re-checks allowance, simulates, then dispatches
//! with a managed nonce.

#![allow(dead_code)]

pub mod cow;
pub mod kyber;
pub mod openocean;
pub mod univ3;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::{eyre, Result};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::gateway::{ChainGateway, PreparedTx, TxOutcome};
use crate::health::ProviderHealth;

/// A swap quote request.
#[derive(Debug, Clone)]
pub struct SwapRequest {
    pub chain_id: u64,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    pub sender: Address,
    pub slippage_bps: u64,
}

/// A priced, executable transaction proposal from a swap provider.
#[derive(Debug, Clone)]
pub struct SwapQuote {
    pub provider: &'static str,
    pub chain_id: u64,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    pub amount_out: U256,
    pub tx: PreparedTx,
    /// Contract needing ERC-20 allowance before dispatch
    pub spender: Address,
    pub quoted_at: DateTime<Utc>,
    pub price_impact_bps: Option<i64>,
    /// Intent providers: the off-chain order this quote settles through
    pub order_uid: Option<String>,
}

impl SwapQuote {
    /// A quote older than the TTL must not be dispatched.
    pub fn is_stale(&self, now: DateTime<Utc>, ttl_ms: u64) -> bool {
        let age = now.signed_duration_since(self.quoted_at);
        age.num_milliseconds() > ttl_ms as i64
    }
}

/// Terminal and non-terminal states of an intent order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Open,
    Fulfilled,
    Cancelled,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Open)
    }
}

/// A swap venue: quoting plus (for intent providers) order polling.
#[async_trait]
pub trait SwapProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn supports_chain(&self, chain_id: u64) -> bool;

    async fn quote(&self, request: &SwapRequest) -> Result<SwapQuote>;

    /// Poll an intent order; non-intent providers never issue order UIDs.
    async fn poll_order(&self, _uid: &str) -> Result<OrderStatus> {
        Err(eyre!("{} does not issue intent orders", self.name()))
    }

    /// One cheap representative read for the liveness probe.
    async fn check_health(&self) -> ProviderHealth;
}

/// Query all providers supporting the chain in parallel; return the quote
/// with the largest amount_out. Providers that error or report no route
/// are skipped with a warning.
pub async fn best_swap_quote(
    providers: &[Arc<dyn SwapProvider>],
    request: &SwapRequest,
) -> Result<SwapQuote> {
    let eligible: Vec<&Arc<dyn SwapProvider>> = providers
        .iter()
        .filter(|p| p.supports_chain(request.chain_id))
        .collect();

    if eligible.is_empty() {
        return Err(eyre!("No swap provider supports chain {}", request.chain_id));
    }

    let results = join_all(eligible.iter().map(|p| async {
        let quote = p.quote(request).await;
        (p.name(), quote)
    }))
    .await;

    let mut best: Option<SwapQuote> = None;
    for (name, result) in results {
        match result {
            Ok(quote) => {
                debug!(
                    provider = name,
                    amount_out = %quote.amount_out,
                    "Quote received"
                );
                let better = match &best {
                    Some(current) => quote.amount_out > current.amount_out,
                    None => true,
                };
                if better {
                    best = Some(quote);
                }
            }
            Err(e) => {
                warn!(provider = name, error = %e, "Swap provider quote failed, skipping");
            }
        }
    }

    best.ok_or_else(|| eyre!("No route: every swap provider failed or returned nothing"))
}

/// Whether an error is the no-route case: the action is skipped and the
/// reconciler simply tries again later, rather than failing the cycle.
pub fn is_no_route_error(error: &eyre::Report) -> bool {
    error.to_string().contains("No route")
}

/// Result of a completed swap dispatch.
#[derive(Debug, Clone)]
pub struct SwapExecution {
    pub outcome: TxOutcome,
}

/// Drives the approve -> simulate -> dispatch pipeline for a quote.
pub struct SwapExecutor {
    gateway: Arc<dyn ChainGateway>,
    quotes_ttl_ms: u64,
    /// Bound on intent-order fulfillment polling
    order_poll_timeout: Duration,
}

impl SwapExecutor {
    pub fn new(gateway: Arc<dyn ChainGateway>, quotes_ttl_ms: u64) -> Self {
        Self {
            gateway,
            quotes_ttl_ms,
            order_poll_timeout: Duration::from_secs(120),
        }
    }

    /// Phase one: refuse stale quotes, top up allowance, simulate, and
    /// dispatch. Returns as soon as the node accepts the tx so the caller
    /// can persist the hash before waiting on the receipt. Staleness is a
    /// wall-clock property of the quote, checked at dispatch time.
    pub async fn prepare_and_send(&self, quote: &SwapQuote) -> Result<alloy::primitives::B256> {
        if quote.is_stale(Utc::now(), self.quotes_ttl_ms) {
            return Err(eyre!(
                "Quote from {} is stale (quoted at {}); re-quote required",
                quote.provider,
                quote.quoted_at
            ));
        }

        // 1. Allowance
        let allowance = self
            .gateway
            .token_allowance(quote.chain_id, quote.token_in, quote.spender)
            .await?;
        if allowance < quote.amount_in {
            info!(
                chain_id = quote.chain_id,
                token = %quote.token_in,
                spender = %quote.spender,
                amount = %quote.amount_in,
                "Allowance short, approving"
            );
            let approval = self
                .gateway
                .approve(quote.chain_id, quote.token_in, quote.spender, quote.amount_in)
                .await?;
            debug!(tx_hash = %approval.tx_hash_hex(), "Approve confirmed");
        }

        // 2. Simulate
        self.gateway.simulate(quote.chain_id, &quote.tx).await?;

        // 3. Dispatch
        self.gateway.send(quote.chain_id, &quote.tx).await
    }

    /// Phase two: wait for the swap receipt and, for intent orders, for the
    /// off-chain fill. The provider is only consulted for order polling.
    pub async fn confirm(
        &self,
        provider: &dyn SwapProvider,
        quote: &SwapQuote,
        tx_hash: alloy::primitives::B256,
    ) -> Result<SwapExecution> {
        let outcome = self.gateway.wait_for_receipt(quote.chain_id, tx_hash).await?;
        if !outcome.success {
            return Err(eyre!(
                "execution reverted: swap tx {} failed on-chain",
                outcome.tx_hash_hex()
            ));
        }

        if let Some(uid) = &quote.order_uid {
            self.await_order(provider, uid).await?;
        }

        Ok(SwapExecution { outcome })
    }

    async fn await_order(&self, provider: &dyn SwapProvider, uid: &str) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.order_poll_timeout;
        loop {
            match provider.poll_order(uid).await? {
                OrderStatus::Fulfilled => return Ok(()),
                OrderStatus::Cancelled => {
                    return Err(eyre!("Intent order {} was cancelled", uid));
                }
                OrderStatus::Expired => {
                    return Err(eyre!("Intent order {} expired unfilled", uid));
                }
                OrderStatus::Open => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(eyre!("timeout waiting for intent order {} to fill", uid));
                    }
                    tokio::time::sleep(Duration::from_secs(3)).await;
                }
            }
        }
    }
}
