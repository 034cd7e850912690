//! On-chain Uniswap V3 reference provider
//!
//! Quotes through QuoterV2 across the standard fee tiers; the first tier
//! that returns without reverting wins. The executable leg routes through
//! SwapRouter02 with a slippage-floored minimum output.

use alloy::primitives::aliases::{U160, U24};
use alloy::primitives::{address, Address, U256};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use chrono::Utc;
use eyre::{eyre, Result};
use std::sync::Arc;
use tracing::debug;

use super::{SwapProvider, SwapQuote, SwapRequest};
use crate::gateway::PreparedTx;
use crate::health::{probe, ProviderHealth};
use crate::math::apply_tolerance_bps;
use evmkit_rs::client::EvmClientWithSigner;
use evmkit_rs::contracts::{IQuoterV2, ISwapRouter};

/// Fee tiers tried in order, in hundredths of a bip.
pub const FEE_TIERS: [u16; 3] = [500, 3000, 10000];

/// Ethereum mainnet QuoterV2.
const QUOTER_ADDRESS: Address = address!("61fFE014bA17989E743c5F6cB21bF9697530B21e");

/// Ethereum mainnet SwapRouter02.
const ROUTER_ADDRESS: Address = address!("68b3465833fb72A70ecDF485E0e4C7bD8665Fc45");

pub struct UniV3QuoterProvider {
    l1: Arc<EvmClientWithSigner>,
    quoter: Address,
    router: Address,
}

impl UniV3QuoterProvider {
    pub fn new(l1: Arc<EvmClientWithSigner>) -> Self {
        Self {
            l1,
            quoter: QUOTER_ADDRESS,
            router: ROUTER_ADDRESS,
        }
    }

    /// Quote one fee tier; reverts propagate as errors.
    async fn quote_tier(
        &self,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        fee: u16,
    ) -> Result<U256> {
        let contract = IQuoterV2::new(self.quoter, &self.l1.provider);
        let params = IQuoterV2::QuoteExactInputSingleParams {
            tokenIn: token_in,
            tokenOut: token_out,
            amountIn: amount_in,
            fee: U24::from(fee),
            sqrtPriceLimitX96: U160::ZERO,
        };
        let result = contract
            .quoteExactInputSingle(params)
            .call()
            .await
            .map_err(|e| eyre!("Quoter tier {} reverted: {}", fee, e))?;
        Ok(result.amountOut)
    }

    /// First non-reverting tier and its output.
    async fn best_tier(
        &self,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
    ) -> Result<(u16, U256)> {
        for fee in FEE_TIERS {
            match self.quote_tier(token_in, token_out, amount_in, fee).await {
                Ok(amount_out) if !amount_out.is_zero() => {
                    debug!(fee, amount_out = %amount_out, "Quoter tier answered");
                    return Ok((fee, amount_out));
                }
                Ok(_) => continue,
                Err(e) => {
                    debug!(fee, error = %e, "Quoter tier reverted, trying next");
                    continue;
                }
            }
        }
        Err(eyre!("No quoter fee tier returned a route"))
    }
}

#[async_trait]
impl SwapProvider for UniV3QuoterProvider {
    fn name(&self) -> &'static str {
        "univ3"
    }

    fn supports_chain(&self, chain_id: u64) -> bool {
        chain_id == self.l1.chain_id
    }

    async fn quote(&self, request: &SwapRequest) -> Result<SwapQuote> {
        if request.chain_id != self.l1.chain_id {
            return Err(eyre!("UniV3 reference quoter is L1-only"));
        }

        let (fee, amount_out) = self
            .best_tier(request.token_in, request.token_out, request.amount_in)
            .await?;

        let min_out = apply_tolerance_bps(amount_out, request.slippage_bps);
        let call = ISwapRouter::exactInputSingleCall {
            params: ISwapRouter::ExactInputSingleParams {
                tokenIn: request.token_in,
                tokenOut: request.token_out,
                fee: U24::from(fee),
                recipient: request.sender,
                amountIn: request.amount_in,
                amountOutMinimum: min_out,
                sqrtPriceLimitX96: U160::ZERO,
            },
        };

        Ok(SwapQuote {
            provider: self.name(),
            chain_id: request.chain_id,
            token_in: request.token_in,
            token_out: request.token_out,
            amount_in: request.amount_in,
            amount_out,
            tx: PreparedTx {
                to: self.router,
                data: call.abi_encode().into(),
                value: U256::ZERO,
            },
            spender: self.router,
            quoted_at: Utc::now(),
            price_impact_bps: None,
            order_uid: None,
        })
    }

    async fn check_health(&self) -> ProviderHealth {
        probe(|| async { self.l1.get_block_number().await }).await
    }
}
