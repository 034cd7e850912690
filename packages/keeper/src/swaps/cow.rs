//! CoW Protocol intent provider (L1)
//!
//! Intent-style execution: the quote issues an off-chain order, the
//! executable leg is a `setPreSignature` call on the settlement contract,
//! and fulfillment is observed by polling the order until it reaches a
//! terminal status.

use alloy::primitives::{address, Address, Bytes, U256};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use chrono::Utc;
use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use std::time::Duration;

use super::{OrderStatus, SwapProvider, SwapQuote, SwapRequest};
use crate::gateway::PreparedTx;
use crate::health::{probe, ProviderHealth};
use crate::retry::{is_transient, with_retry, RetryConfig};
use evmkit_rs::contracts::ICowSettlement;

const API_BASE: &str = "https://api.cow.fi/mainnet/api/v1";

/// GPv2Settlement on Ethereum mainnet.
const SETTLEMENT_ADDRESS: Address = address!("9008D19f58AAbD9eD0D60971565AA8510560ab41");

/// GPv2VaultRelayer: the contract that pulls sell tokens, hence the spender.
const VAULT_RELAYER_ADDRESS: Address = address!("C92E8bdf79f0507f65a392b0ab4667716BFE0110");

pub struct CowProvider {
    client: reqwest::Client,
    l1_chain_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    quote: QuoteBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteBody {
    sell_token: String,
    buy_token: String,
    sell_amount: String,
    buy_amount: String,
    valid_to: u64,
    fee_amount: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderDetail {
    status: String,
}

impl CowProvider {
    pub fn new(l1_chain_id: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .wrap_err("Failed to build CoW HTTP client")?;
        Ok(Self { client, l1_chain_id })
    }
}

#[async_trait]
impl SwapProvider for CowProvider {
    fn name(&self) -> &'static str {
        "cow"
    }

    fn supports_chain(&self, chain_id: u64) -> bool {
        chain_id == self.l1_chain_id
    }

    async fn quote(&self, request: &SwapRequest) -> Result<SwapQuote> {
        if request.chain_id != self.l1_chain_id {
            return Err(eyre!("CoW orders settle on L1 only"));
        }

        let from = format!("{:#x}", request.sender);

        // 1. Price the sell order. Order creation below is NOT retried: a
        // replay could place two live orders.
        let quote_body = json!({
            "sellToken": format!("{:#x}", request.token_in),
            "buyToken": format!("{:#x}", request.token_out),
            "sellAmountBeforeFee": request.amount_in.to_string(),
            "kind": "sell",
            "from": from,
            "signingScheme": "presign",
        });
        let quote: QuoteResponse = with_retry(&RetryConfig::default(), is_transient, || async {
            self.client
                .post(format!("{}/quote", API_BASE))
                .json(&quote_body)
                .send()
                .await
                .wrap_err("CoW quote request failed")?
                .error_for_status()
                .wrap_err("CoW quote request errored")?
                .json()
                .await
                .wrap_err("CoW quote response was not valid JSON")
        })
        .await?;

        let buy_amount =
            U256::from_str(&quote.quote.buy_amount).wrap_err("Invalid buyAmount in quote")?;

        // 2. Create the order; the API returns its UID
        let uid: String = self
            .client
            .post(format!("{}/orders", API_BASE))
            .json(&json!({
                "sellToken": quote.quote.sell_token,
                "buyToken": quote.quote.buy_token,
                "sellAmount": quote.quote.sell_amount,
                "buyAmount": quote.quote.buy_amount,
                "validTo": quote.quote.valid_to,
                "feeAmount": quote.quote.fee_amount,
                "kind": "sell",
                "partiallyFillable": false,
                "receiver": from,
                "from": from,
                "signingScheme": "presign",
                "signature": "0x",
                "appData": "{}",
            }))
            .send()
            .await
            .wrap_err("CoW order creation failed")?
            .error_for_status()
            .wrap_err("CoW order creation errored")?
            .json()
            .await
            .wrap_err("CoW order UID was not valid JSON")?;

        // 3. The executable leg is the presignature
        let uid_bytes = Bytes::from(
            hex::decode(uid.trim_start_matches("0x")).wrap_err("Invalid order UID hex")?,
        );
        let call = ICowSettlement::setPreSignatureCall {
            orderUid: uid_bytes,
            signed: true,
        };

        Ok(SwapQuote {
            provider: self.name(),
            chain_id: request.chain_id,
            token_in: request.token_in,
            token_out: request.token_out,
            amount_in: request.amount_in,
            amount_out: buy_amount,
            tx: PreparedTx {
                to: SETTLEMENT_ADDRESS,
                data: call.abi_encode().into(),
                value: U256::ZERO,
            },
            spender: VAULT_RELAYER_ADDRESS,
            quoted_at: Utc::now(),
            price_impact_bps: None,
            order_uid: Some(uid),
        })
    }

    async fn poll_order(&self, uid: &str) -> Result<OrderStatus> {
        let detail: OrderDetail = self
            .client
            .get(format!("{}/orders/{}", API_BASE, uid))
            .send()
            .await
            .wrap_err("CoW order poll failed")?
            .error_for_status()
            .wrap_err("CoW order poll errored")?
            .json()
            .await
            .wrap_err("CoW order detail was not valid JSON")?;

        Ok(match detail.status.as_str() {
            "fulfilled" => OrderStatus::Fulfilled,
            "cancelled" => OrderStatus::Cancelled,
            "expired" => OrderStatus::Expired,
            _ => OrderStatus::Open,
        })
    }

    async fn check_health(&self) -> ProviderHealth {
        probe(|| async {
            self.client
                .get(format!("{}/version", API_BASE))
                .send()
                .await
                .wrap_err("CoW API unreachable")?
                .error_for_status()
                .wrap_err("CoW API version errored")?;
            Ok(())
        })
        .await
    }
}
