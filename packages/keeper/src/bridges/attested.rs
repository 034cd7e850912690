//! Attested bridge (LayerZero-style OFT pools)
//!
//! Transfers are fee-quoted through the pool's `quoteSend` and submitted
//! with the quoted native value; ERC-20 sends additionally need pool
//! allowance. There is no prove/finalize leg: completion is detected purely
//! by the destination-side balance.

use alloy::primitives::{Address, B256, U256};
use alloy::providers::Provider;
use alloy::sol_types::{SolCall, SolEvent};
use async_trait::async_trait;
use eyre::WrapErr;
use std::sync::Arc;
use tracing::{debug, info};

use super::{BridgeDirection, BridgeError, BridgeProvider, BridgeSend};
use crate::gateway::{ChainGateway, PreparedTx, TxOutcome};
use crate::health::{probe, ProviderHealth};
use crate::math::apply_tolerance_bps;
use evmkit_rs::client::EvmClientWithSigner;
use evmkit_rs::contracts::IOFT;
use evmkit_rs::registry::{BridgeRoute, TokenInfo, TokenRegistry};

/// Minimum-received tolerance applied to `minAmountLD`, in basis points.
const MIN_AMOUNT_TOLERANCE_BPS: u64 = 50;

pub struct AttestedBridge {
    gateway: Arc<dyn ChainGateway>,
    l1: Arc<EvmClientWithSigner>,
    l2: Arc<EvmClientWithSigner>,
    registry: Arc<TokenRegistry>,
    /// LayerZero endpoint ids for the chain pair
    l1_eid: u32,
    l2_eid: u32,
}

impl AttestedBridge {
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        l1: Arc<EvmClientWithSigner>,
        l2: Arc<EvmClientWithSigner>,
        registry: Arc<TokenRegistry>,
        l1_eid: u32,
        l2_eid: u32,
    ) -> Self {
        Self {
            gateway,
            l1,
            l2,
            registry,
            l1_eid,
            l2_eid,
        }
    }

    fn wallet_as_bytes32(&self) -> B256 {
        let mut bytes = [0u8; 32];
        bytes[12..].copy_from_slice(self.gateway.wallet_address().as_slice());
        B256::from(bytes)
    }

    /// Pool, source chain id, and destination eid for a direction.
    fn resolve(
        &self,
        token: &TokenInfo,
        direction: BridgeDirection,
    ) -> Result<(Address, u64, u32), BridgeError> {
        match direction {
            BridgeDirection::L2ToL1 => {
                let pool = token
                    .oft_pool_l2
                    .ok_or(BridgeError::Unsupported("token has no L2 OFT pool"))?;
                Ok((pool, self.l2.chain_id, self.l1_eid))
            }
            BridgeDirection::L1ToL2 => {
                let pool = token
                    .oft_pool_l1
                    .ok_or(BridgeError::Unsupported("token has no L1 OFT pool"))?;
                Ok((pool, self.l1.chain_id, self.l2_eid))
            }
        }
    }

    fn send_param(&self, dst_eid: u32, amount: U256) -> IOFT::SendParam {
        IOFT::SendParam {
            dstEid: dst_eid,
            to: self.wallet_as_bytes32(),
            amountLD: amount,
            minAmountLD: apply_tolerance_bps(amount, MIN_AMOUNT_TOLERANCE_BPS),
            extraOptions: Default::default(),
            composeMsg: Default::default(),
            oftCmd: Default::default(),
        }
    }

    async fn quote_native_fee(
        &self,
        pool: Address,
        src_chain: u64,
        param: &IOFT::SendParam,
    ) -> Result<U256, BridgeError> {
        let fee = if src_chain == self.l2.chain_id {
            let contract = IOFT::new(pool, &self.l2.provider);
            contract
                .quoteSend(param.clone(), false)
                .call()
                .await
                .map_err(BridgeError::other)?
                .fee
        } else {
            let contract = IOFT::new(pool, &self.l1.provider);
            contract
                .quoteSend(param.clone(), false)
                .call()
                .await
                .map_err(BridgeError::other)?
                .fee
        };
        Ok(fee.nativeFee)
    }

    /// Pull the message GUID out of the send receipt's OFTSent event.
    async fn extract_guid(&self, src_chain: u64, outcome: &TxOutcome) -> Option<B256> {
        let receipt = if src_chain == self.l2.chain_id {
            self.l2.provider.get_transaction_receipt(outcome.tx_hash).await
        } else {
            self.l1.provider.get_transaction_receipt(outcome.tx_hash).await
        };

        let receipt = receipt.ok().flatten()?;
        for log in receipt.inner.logs() {
            if log.topics().first() == Some(&IOFT::OFTSent::SIGNATURE_HASH) {
                return log.topics().get(1).copied();
            }
        }
        None
    }
}

#[async_trait]
impl BridgeProvider for AttestedBridge {
    fn name(&self) -> &'static str {
        "attested"
    }

    fn route(&self) -> BridgeRoute {
        BridgeRoute::Attested
    }

    async fn estimate_fee(
        &self,
        token: &TokenInfo,
        amount: U256,
        direction: BridgeDirection,
    ) -> Result<U256, BridgeError> {
        let (pool, src_chain, dst_eid) = self.resolve(token, direction)?;
        let param = self.send_param(dst_eid, amount);
        self.quote_native_fee(pool, src_chain, &param).await
    }

    async fn send(
        &self,
        token: &TokenInfo,
        amount: U256,
        direction: BridgeDirection,
    ) -> Result<BridgeSend, BridgeError> {
        let (pool, src_chain, dst_eid) = self.resolve(token, direction)?;
        let token_address = self
            .registry
            .address_on(token, src_chain)
            .map_err(BridgeError::other)?;

        // ERC-20 sends need pool allowance on top of the native fee
        let allowance = self
            .gateway
            .token_allowance(src_chain, token_address, pool)
            .await
            .map_err(BridgeError::other)?;
        if allowance < amount {
            debug!(token = token.symbol, pool = %pool, "Approving OFT pool");
            self.gateway
                .approve(src_chain, token_address, pool, amount)
                .await
                .map_err(BridgeError::other)?;
        }

        let param = self.send_param(dst_eid, amount);
        let native_fee = self.quote_native_fee(pool, src_chain, &param).await?;

        let call = IOFT::sendCall {
            sendParam: param,
            fee: IOFT::MessagingFee {
                nativeFee: native_fee,
                lzTokenFee: U256::ZERO,
            },
            refundAddress: self.gateway.wallet_address(),
        };

        let tx = PreparedTx {
            to: pool,
            data: call.abi_encode().into(),
            value: native_fee,
        };

        let outcome = self
            .gateway
            .send_and_confirm(src_chain, &tx)
            .await
            .map_err(BridgeError::other)?;
        if !outcome.success {
            return Err(BridgeError::Other(format!(
                "execution reverted: OFT send {}",
                outcome.tx_hash_hex()
            )));
        }

        let guid = self.extract_guid(src_chain, &outcome).await;
        info!(
            token = token.symbol,
            amount = %amount,
            tx_hash = %outcome.tx_hash_hex(),
            guid = ?guid,
            "Attested bridge send confirmed"
        );

        Ok(BridgeSend {
            outcome,
            message_guid: guid,
            withdrawal_hash: None,
            envelope: None,
        })
    }

    async fn detect_arrival(
        &self,
        token: &TokenInfo,
        dest_chain_id: u64,
        min_expected: U256,
    ) -> Result<bool, BridgeError> {
        let address = self
            .registry
            .address_on(token, dest_chain_id)
            .map_err(BridgeError::other)?;
        let balance = self
            .gateway
            .token_balance(dest_chain_id, address)
            .await
            .map_err(BridgeError::other)?;
        Ok(balance >= min_expected)
    }

    async fn check_health(&self) -> ProviderHealth {
        // quoteSend on the USDC pool is the representative read
        let usdc = self.registry.usdc().clone();
        probe(|| async {
            let (pool, src_chain, dst_eid) =
                self.resolve(&usdc, BridgeDirection::L2ToL1).map_err(|e| {
                    eyre::eyre!("{}", e)
                })?;
            let param = self.send_param(dst_eid, U256::from(1_000_000u64));
            self.quote_native_fee(pool, src_chain, &param)
                .await
                .wrap_err("quoteSend probe failed")?;
            Ok(())
        })
        .await
    }
}
