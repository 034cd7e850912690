//! OpenOcean aggregator provider
//!
//! Single-request quote API: the response carries both the priced output
//! and the pre-built router transaction.

use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use chrono::Utc;
use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use super::{SwapProvider, SwapQuote, SwapRequest};
use crate::gateway::PreparedTx;
use crate::health::{probe, ProviderHealth};
use crate::retry::{is_transient, with_retry, RetryConfig};

const API_BASE: &str = "https://open-api.openocean.finance/v4";

/// Gas price hint sent with quote requests, in gwei. The router tx we
/// dispatch carries its own fee fields; this only steers route selection.
const GAS_PRICE_HINT_GWEI: u64 = 1;

pub struct OpenOceanProvider {
    client: reqwest::Client,
    l1_chain_id: u64,
    l2_chain_id: u64,
}

#[derive(Debug, Deserialize)]
struct OoResponse {
    code: i64,
    data: Option<OoSwapData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OoSwapData {
    to: String,
    data: String,
    value: String,
    out_amount: String,
    #[serde(default)]
    price_impact: Option<String>,
}

impl OpenOceanProvider {
    pub fn new(l1_chain_id: u64, l2_chain_id: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .wrap_err("Failed to build OpenOcean HTTP client")?;
        Ok(Self {
            client,
            l1_chain_id,
            l2_chain_id,
        })
    }

    fn chain_slug(&self, chain_id: u64) -> Option<&'static str> {
        match chain_id {
            1 => Some("eth"),
            1135 => Some("lisk"),
            _ => None,
        }
    }

    /// Percent string for the API, e.g. 50 bps -> "0.5".
    fn slippage_percent(bps: u64) -> String {
        format!("{}.{:02}", bps / 100, bps % 100)
    }
}

#[async_trait]
impl SwapProvider for OpenOceanProvider {
    fn name(&self) -> &'static str {
        "openocean"
    }

    fn supports_chain(&self, chain_id: u64) -> bool {
        (chain_id == self.l1_chain_id || chain_id == self.l2_chain_id)
            && self.chain_slug(chain_id).is_some()
    }

    async fn quote(&self, request: &SwapRequest) -> Result<SwapQuote> {
        let slug = self
            .chain_slug(request.chain_id)
            .ok_or_else(|| eyre!("OpenOcean does not cover chain {}", request.chain_id))?;

        let url = format!("{}/{}/swap", API_BASE, slug);
        let query = [
            ("inTokenAddress", format!("{:#x}", request.token_in)),
            ("outTokenAddress", format!("{:#x}", request.token_out)),
            ("amountDecimals", request.amount_in.to_string()),
            ("gasPrice", GAS_PRICE_HINT_GWEI.to_string()),
            ("slippage", Self::slippage_percent(request.slippage_bps)),
            ("account", format!("{:#x}", request.sender)),
        ];
        let response = with_retry(&RetryConfig::default(), is_transient, || async {
            self.client
                .get(&url)
                .query(&query)
                .send()
                .await
                .wrap_err("OpenOcean request failed")?
                .error_for_status()
                .wrap_err("OpenOcean returned an error status")?
                .json::<OoResponse>()
                .await
                .wrap_err("OpenOcean response was not valid JSON")
        })
        .await?;

        if response.code != 200 {
            return Err(eyre!(
                "OpenOcean error {}: {}",
                response.code,
                response.error.unwrap_or_default()
            ));
        }
        let data = response
            .data
            .ok_or_else(|| eyre!("OpenOcean returned no route"))?;

        let to = Address::from_str(&data.to).wrap_err("Invalid router address")?;
        let calldata = Bytes::from(
            hex::decode(data.data.trim_start_matches("0x"))
                .wrap_err("Invalid router calldata")?,
        );
        let amount_out =
            U256::from_str(&data.out_amount).wrap_err("Invalid outAmount in response")?;
        let value = U256::from_str(&data.value).unwrap_or(U256::ZERO);

        // priceImpact arrives as a percent string like "0.31"; keep bps
        let price_impact_bps = data
            .price_impact
            .as_deref()
            .and_then(parse_percent_to_bps);

        Ok(SwapQuote {
            provider: self.name(),
            chain_id: request.chain_id,
            token_in: request.token_in,
            token_out: request.token_out,
            amount_in: request.amount_in,
            amount_out,
            tx: PreparedTx {
                to,
                data: calldata,
                value,
            },
            spender: to,
            quoted_at: Utc::now(),
            price_impact_bps,
            order_uid: None,
        })
    }

    async fn check_health(&self) -> ProviderHealth {
        let slug = self.chain_slug(self.l2_chain_id).unwrap_or("eth");
        let url = format!("{}/{}/tokenList", API_BASE, slug);
        probe(|| async {
            self.client
                .get(&url)
                .send()
                .await
                .wrap_err("OpenOcean unreachable")?
                .error_for_status()
                .wrap_err("OpenOcean token list errored")?;
            Ok(())
        })
        .await
    }
}

/// "0.31" (percent) -> 31 bps. Integer parsing only; malformed input is None.
fn parse_percent_to_bps(s: &str) -> Option<i64> {
    let s = s.trim().trim_end_matches('%');
    let negative = s.starts_with('-');
    let s = s.trim_start_matches('-');
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let frac_padded = format!("{:0<2}", frac);
    let frac2: i64 = frac_padded.get(..2)?.parse().ok()?;
    let bps = whole * 100 + frac2;
    Some(if negative { -bps } else { bps })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slippage_percent() {
        assert_eq!(OpenOceanProvider::slippage_percent(50), "0.50");
        assert_eq!(OpenOceanProvider::slippage_percent(125), "1.25");
        assert_eq!(OpenOceanProvider::slippage_percent(0), "0.00");
    }

    #[test]
    fn test_parse_percent_to_bps() {
        assert_eq!(parse_percent_to_bps("0.31"), Some(31));
        assert_eq!(parse_percent_to_bps("1.5"), Some(150));
        assert_eq!(parse_percent_to_bps("2"), Some(200));
        assert_eq!(parse_percent_to_bps("-0.05"), Some(-5));
        assert_eq!(parse_percent_to_bps("abc"), None);
    }

    #[test]
    fn test_supported_chains() {
        let provider = OpenOceanProvider::new(1, 1135).unwrap();
        assert!(provider.supports_chain(1));
        assert!(provider.supports_chain(1135));
        assert!(!provider.supports_chain(137));
    }
}
