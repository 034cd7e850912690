//! KyberSwap aggregator provider
//!
//! Two-request flow: fetch the best route summary, then have the API encode
//! it into router calldata for our sender.

use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use chrono::Utc;
use eyre::{eyre, Result, WrapErr};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

use super::{SwapProvider, SwapQuote, SwapRequest};
use crate::gateway::PreparedTx;
use crate::health::{probe, ProviderHealth};
use crate::retry::{is_transient, with_retry, RetryConfig};

const API_BASE: &str = "https://aggregator-api.kyberswap.com";

pub struct KyberProvider {
    client: reqwest::Client,
    l1_chain_id: u64,
    l2_chain_id: u64,
}

#[derive(Debug, Deserialize)]
struct RouteResponse {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<RouteData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteData {
    route_summary: Value,
    router_address: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BuildRequest<'a> {
    route_summary: &'a Value,
    sender: String,
    recipient: String,
    slippage_tolerance: u64,
}

#[derive(Debug, Deserialize)]
struct BuildResponse {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<BuildData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildData {
    data: String,
    router_address: String,
    amount_out: String,
}

impl KyberProvider {
    pub fn new(l1_chain_id: u64, l2_chain_id: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .wrap_err("Failed to build Kyber HTTP client")?;
        Ok(Self {
            client,
            l1_chain_id,
            l2_chain_id,
        })
    }

    fn chain_slug(&self, chain_id: u64) -> Option<&'static str> {
        match chain_id {
            1 => Some("ethereum"),
            1135 => Some("lisk"),
            _ => None,
        }
    }
}

#[async_trait]
impl SwapProvider for KyberProvider {
    fn name(&self) -> &'static str {
        "kyber"
    }

    fn supports_chain(&self, chain_id: u64) -> bool {
        (chain_id == self.l1_chain_id || chain_id == self.l2_chain_id)
            && self.chain_slug(chain_id).is_some()
    }

    async fn quote(&self, request: &SwapRequest) -> Result<SwapQuote> {
        let slug = self
            .chain_slug(request.chain_id)
            .ok_or_else(|| eyre!("Kyber does not cover chain {}", request.chain_id))?;

        // 1. Best route
        let routes_url = format!("{}/{}/api/v1/routes", API_BASE, slug);
        let query = [
            ("tokenIn", format!("{:#x}", request.token_in)),
            ("tokenOut", format!("{:#x}", request.token_out)),
            ("amountIn", request.amount_in.to_string()),
        ];
        let route = with_retry(&RetryConfig::default(), is_transient, || async {
            self.client
                .get(&routes_url)
                .query(&query)
                .send()
                .await
                .wrap_err("Kyber route request failed")?
                .error_for_status()
                .wrap_err("Kyber route request errored")?
                .json::<RouteResponse>()
                .await
                .wrap_err("Kyber route response was not valid JSON")
        })
        .await?;

        if route.code != 0 {
            return Err(eyre!("Kyber route error {}: {}", route.code, route.message));
        }
        let route_data = route
            .data
            .ok_or_else(|| eyre!("Kyber returned no route"))?;

        // 2. Encode for our sender
        let build_url = format!("{}/{}/api/v1/route/build", API_BASE, slug);
        let build_request = BuildRequest {
            route_summary: &route_data.route_summary,
            sender: format!("{:#x}", request.sender),
            recipient: format!("{:#x}", request.sender),
            slippage_tolerance: request.slippage_bps,
        };
        let build = with_retry(&RetryConfig::default(), is_transient, || async {
            self.client
                .post(&build_url)
                .json(&build_request)
                .send()
                .await
                .wrap_err("Kyber build request failed")?
                .error_for_status()
                .wrap_err("Kyber build request errored")?
                .json::<BuildResponse>()
                .await
                .wrap_err("Kyber build response was not valid JSON")
        })
        .await?;

        if build.code != 0 {
            return Err(eyre!("Kyber build error {}: {}", build.code, build.message));
        }
        let build_data = build
            .data
            .ok_or_else(|| eyre!("Kyber build returned no transaction"))?;

        let router = Address::from_str(&build_data.router_address)
            .or_else(|_| Address::from_str(&route_data.router_address))
            .wrap_err("Invalid Kyber router address")?;
        let calldata = Bytes::from(
            hex::decode(build_data.data.trim_start_matches("0x"))
                .wrap_err("Invalid Kyber calldata")?,
        );
        let amount_out =
            U256::from_str(&build_data.amount_out).wrap_err("Invalid amountOut in response")?;

        Ok(SwapQuote {
            provider: self.name(),
            chain_id: request.chain_id,
            token_in: request.token_in,
            token_out: request.token_out,
            amount_in: request.amount_in,
            amount_out,
            tx: PreparedTx {
                to: router,
                data: calldata,
                value: U256::ZERO,
            },
            spender: router,
            quoted_at: Utc::now(),
            price_impact_bps: None,
            order_uid: None,
        })
    }

    async fn check_health(&self) -> ProviderHealth {
        let slug = self.chain_slug(self.l1_chain_id).unwrap_or("ethereum");
        let url = format!("{}/{}/api/v1/routes", API_BASE, slug);
        probe(|| async {
            // A parameterless GET yields a 4xx quickly; reachability is what
            // the probe measures, so only transport errors count.
            self.client
                .get(&url)
                .send()
                .await
                .wrap_err("Kyber unreachable")?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_chains() {
        let provider = KyberProvider::new(1, 1135).unwrap();
        assert!(provider.supports_chain(1));
        assert!(provider.supports_chain(1135));
        assert!(!provider.supports_chain(56));
    }

    #[test]
    fn test_chain_slugs() {
        let provider = KyberProvider::new(1, 1135).unwrap();
        assert_eq!(provider.chain_slug(1), Some("ethereum"));
        assert_eq!(provider.chain_slug(1135), Some("lisk"));
        assert_eq!(provider.chain_slug(42161), None);
    }
}
