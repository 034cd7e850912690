//! Opportunity planner
//!
//! Price discovery across the L2 aggregators plus a two-sided comparison
//! against L1 reference pricing. For each configured target token the
//! planner quotes source -> X on L2 and USDC -> X on L1; a positive
//! discount in basis points qualifies the token, and the sizing search
//! then picks the largest profitable input.

#![allow(dead_code)]

pub mod sizing;

use alloy::primitives::{Address, U256};
use eyre::Result;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::math::{discount_bps, one_token, rescale};
use crate::swaps::{best_swap_quote, SwapProvider, SwapRequest};
use evmkit_rs::registry::TokenRegistry;

pub use sizing::{find_optimal_size, SizedTrade, SizingParams};

/// A qualifying arbitrage opening on one target token.
#[derive(Debug, Clone)]
pub struct Opportunity {
    pub token: String,
    pub l2_amount_out: U256,
    pub ref_amount_out: U256,
    pub discount_bps: i64,
    pub input_amount: U256,
}

pub struct Planner {
    /// All swap providers (aggregators on both chains)
    providers: Vec<Arc<dyn SwapProvider>>,
    /// On-chain reference quoter, tried before the aggregator ensemble
    reference: Arc<dyn SwapProvider>,
    registry: Arc<TokenRegistry>,
    sender: Address,
    slippage_bps: u64,
}

impl Planner {
    pub fn new(
        providers: Vec<Arc<dyn SwapProvider>>,
        reference: Arc<dyn SwapProvider>,
        registry: Arc<TokenRegistry>,
        sender: Address,
        slippage_bps: u64,
    ) -> Self {
        Self {
            providers,
            reference,
            registry,
            sender,
            slippage_bps,
        }
    }

    /// Quote source -> X on L2 (best aggregator) and USDC -> X on L1
    /// (reference quoter, aggregator ensemble as fallback) for the same
    /// input value. Returns `(l2_out, ref_out)` in target-token units.
    pub async fn quote_pair(&self, token_symbol: &str, input: U256) -> Result<(U256, U256)> {
        let source = self.registry.source_token();
        let usdc = self.registry.usdc();
        let target = self.registry.get(token_symbol)?;

        let l2_request = SwapRequest {
            chain_id: self.registry.l2_chain_id,
            token_in: source.l2_address,
            token_out: target.l2_address,
            amount_in: input,
            sender: self.sender,
            slippage_bps: self.slippage_bps,
        };

        // Source and USDC are both stables; align decimals by integer rescale
        let usdc_input = rescale(input, source.decimals, usdc.decimals);
        let ref_request = SwapRequest {
            chain_id: self.registry.l1_chain_id,
            token_in: usdc.l1_address,
            token_out: target.l1_address,
            amount_in: usdc_input,
            sender: self.sender,
            slippage_bps: self.slippage_bps,
        };

        let (l2_quote, ref_out) = futures::join!(
            best_swap_quote(&self.providers, &l2_request),
            self.reference_quote(&ref_request)
        );

        Ok((l2_quote?.amount_out, ref_out?))
    }

    /// The on-chain quoter wins when it answers; otherwise the aggregator
    /// ensemble prices the reference side.
    async fn reference_quote(&self, request: &SwapRequest) -> Result<U256> {
        match self.reference.quote(request).await {
            Ok(quote) => Ok(quote.amount_out),
            Err(e) => {
                debug!(error = %e, "Reference quoter unavailable, falling back to aggregators");
                let quote = best_swap_quote(&self.providers, request).await?;
                Ok(quote.amount_out)
            }
        }
    }

    /// Survey all target tokens at `test_size` and return qualifying
    /// opportunities sorted by discount descending (symbol as tie-break).
    pub async fn detect(&self, test_size: U256) -> Vec<Opportunity> {
        let mut opportunities = Vec::new();

        for target in self.registry.targets() {
            match self.quote_pair(target.symbol, test_size).await {
                Ok((l2_out, ref_out)) => {
                    let bps = discount_bps(l2_out, ref_out);
                    debug!(
                        token = target.symbol,
                        l2_out = %l2_out,
                        ref_out = %ref_out,
                        discount_bps = bps,
                        "Opportunity surveyed"
                    );
                    if bps > 0 {
                        opportunities.push(Opportunity {
                            token: target.symbol.to_string(),
                            l2_amount_out: l2_out,
                            ref_amount_out: ref_out,
                            discount_bps: bps,
                            input_amount: test_size,
                        });
                    }
                }
                Err(e) => {
                    warn!(token = target.symbol, error = %e, "Survey quote failed, skipping token");
                }
            }
        }

        sort_opportunities(&mut opportunities);
        opportunities
    }

    /// Size an opportunity against the available balance and configured
    /// bounds. Returns `None` when no size clears the profit requirement.
    ///
    /// `min_profit` arrives in source-token minor units and is converted
    /// into target-token units through the opportunity's observed reference
    /// rate, since the sizing search compares target-token outputs.
    pub async fn size(
        &self,
        opportunity: &Opportunity,
        available_balance: U256,
        min_input: U256,
        max_input_cap: U256,
        min_profit: U256,
        max_quote_calls: u32,
    ) -> Result<Option<SizedTrade>> {
        let cap = max_input_cap.min(available_balance);
        if cap < min_input {
            debug!(
                token = %opportunity.token,
                balance = %available_balance,
                "Balance below minimum input; skipping"
            );
            return Ok(None);
        }

        let min_profit_target = if opportunity.input_amount.is_zero() {
            U256::ZERO
        } else {
            opportunity.ref_amount_out * min_profit / opportunity.input_amount
        };

        let source_decimals = self.registry.source_token().decimals;
        let params = SizingParams {
            min_input,
            max_input_cap: cap,
            min_profit: min_profit_target,
            granularity: one_token(source_decimals),
            max_quote_calls,
        };

        let token = opportunity.token.clone();
        find_optimal_size(&params, |size| {
            let token = token.clone();
            async move { self.quote_pair(&token, size).await }
        })
        .await
    }
}

/// Higher discount first; lexicographic token symbol on equality.
pub fn sort_opportunities(opportunities: &mut [Opportunity]) {
    opportunities.sort_by(|a, b| {
        b.discount_bps
            .cmp(&a.discount_bps)
            .then_with(|| a.token.cmp(&b.token))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opp(token: &str, bps: i64) -> Opportunity {
        Opportunity {
            token: token.to_string(),
            l2_amount_out: U256::from(1u64),
            ref_amount_out: U256::from(1u64),
            discount_bps: bps,
            input_amount: U256::from(1u64),
        }
    }

    #[test]
    fn test_sort_by_discount_descending() {
        let mut opportunities = vec![opp("WETH", 50), opp("WBTC", 120)];
        sort_opportunities(&mut opportunities);
        assert_eq!(opportunities[0].token, "WBTC");
        assert_eq!(opportunities[1].token, "WETH");
    }

    #[test]
    fn test_tie_breaks_lexicographically() {
        let mut opportunities = vec![opp("WETH", 75), opp("WBTC", 75), opp("ARB", 75)];
        sort_opportunities(&mut opportunities);
        let symbols: Vec<&str> = opportunities.iter().map(|o| o.token.as_str()).collect();
        assert_eq!(symbols, vec!["ARB", "WBTC", "WETH"]);
    }
}
