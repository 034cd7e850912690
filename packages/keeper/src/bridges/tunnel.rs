//! Optimistic-rollup tunnel bridge
//!
//! The slow path out of L2: `withdraw` on the L2 standard bridge emits a
//! `MessagePassed` envelope, which must later be proven against a published
//! L2 output root on L1 and, once the challenge period has elapsed,
//! finalized through the portal. Until the output root covering the
//! withdrawal is posted, prove attempts fail with the distinguished
//! `OUTPUT_NOT_READY` error and are retried on later ticks.

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{address, Address, B256, U256};
use alloy::providers::Provider;
use alloy::rpc::types::BlockTransactionsKind;
use alloy::sol_types::{SolCall, SolEvent};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use super::{BridgeDirection, BridgeError, BridgeProvider, BridgeSend};
use crate::gateway::{ChainGateway, PreparedTx, TxOutcome};
use crate::health::{probe, ProviderHealth};
use evmkit_rs::client::EvmClientWithSigner;
use evmkit_rs::contracts::{IL2StandardBridge, IL2ToL1MessagePasser, IL2OutputOracle, IOptimismPortal};
use evmkit_rs::registry::{BridgeRoute, TokenInfo, TokenRegistry};
use evmkit_rs::withdrawal::{withdrawal_hash, withdrawal_storage_slot, WithdrawalEnvelope};

/// Predeploys shared by every OP-stack rollup.
const L2_STANDARD_BRIDGE: Address = address!("4200000000000000000000000000000000000010");
const L2_TO_L1_MESSAGE_PASSER: Address = address!("4200000000000000000000000000000000000016");

/// Gas forwarded to the L1 leg of the withdrawal.
const WITHDRAW_MIN_GAS_LIMIT: u32 = 200_000;

pub struct TunnelBridge {
    gateway: Arc<dyn ChainGateway>,
    l1: Arc<EvmClientWithSigner>,
    l2: Arc<EvmClientWithSigner>,
    registry: Arc<TokenRegistry>,
    /// OptimismPortal on L1
    portal: Address,
    /// L2OutputOracle on L1
    output_oracle: Address,
}

impl TunnelBridge {
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        l1: Arc<EvmClientWithSigner>,
        l2: Arc<EvmClientWithSigner>,
        registry: Arc<TokenRegistry>,
        portal: Address,
        output_oracle: Address,
    ) -> Self {
        Self {
            gateway,
            l1,
            l2,
            registry,
            portal,
            output_oracle,
        }
    }

    /// Decode the MessagePassed event out of the withdraw receipt.
    async fn extract_envelope(
        &self,
        outcome: &TxOutcome,
    ) -> Result<(WithdrawalEnvelope, B256), BridgeError> {
        let receipt = self
            .l2
            .provider
            .get_transaction_receipt(outcome.tx_hash)
            .await
            .map_err(BridgeError::other)?
            .ok_or_else(|| BridgeError::Other("withdraw receipt disappeared".into()))?;

        let l2_block_number = receipt
            .block_number
            .ok_or_else(|| BridgeError::Other("withdraw receipt has no block number".into()))?;

        for log in receipt.inner.logs() {
            if log.address() != L2_TO_L1_MESSAGE_PASSER {
                continue;
            }
            if log.topics().first() != Some(&IL2ToL1MessagePasser::MessagePassed::SIGNATURE_HASH) {
                continue;
            }
            let event = IL2ToL1MessagePasser::MessagePassed::decode_log(&log.inner, true)
                .map_err(BridgeError::other)?
                .data;

            let envelope = WithdrawalEnvelope {
                nonce: event.nonce,
                sender: event.sender,
                target: event.target,
                value: event.value,
                gas_limit: event.gasLimit,
                data: event.data.clone(),
                l2_block_number,
            };
            return Ok((envelope, event.withdrawalHash));
        }

        Err(BridgeError::Other(
            "withdraw receipt carried no MessagePassed event".into(),
        ))
    }

    fn withdrawal_tx(envelope: &WithdrawalEnvelope) -> IOptimismPortal::WithdrawalTransaction {
        IOptimismPortal::WithdrawalTransaction {
            nonce: envelope.nonce,
            sender: envelope.sender,
            target: envelope.target,
            value: envelope.value,
            gasLimit: envelope.gas_limit,
            data: envelope.data.clone(),
        }
    }
}

#[async_trait]
impl BridgeProvider for TunnelBridge {
    fn name(&self) -> &'static str {
        "tunnel"
    }

    fn route(&self) -> BridgeRoute {
        BridgeRoute::Tunnel
    }

    async fn estimate_fee(
        &self,
        _token: &TokenInfo,
        _amount: U256,
        direction: BridgeDirection,
    ) -> Result<U256, BridgeError> {
        match direction {
            // Withdrawals pay only L2 gas at submission
            BridgeDirection::L2ToL1 => Ok(U256::ZERO),
            BridgeDirection::L1ToL2 => Err(BridgeError::Unsupported("tunnel deposits")),
        }
    }

    async fn send(
        &self,
        token: &TokenInfo,
        amount: U256,
        direction: BridgeDirection,
    ) -> Result<BridgeSend, BridgeError> {
        if direction != BridgeDirection::L2ToL1 {
            return Err(BridgeError::Unsupported("tunnel deposits"));
        }

        let l2_chain = self.l2.chain_id;
        let allowance = self
            .gateway
            .token_allowance(l2_chain, token.l2_address, L2_STANDARD_BRIDGE)
            .await
            .map_err(BridgeError::other)?;
        if allowance < amount {
            debug!(token = token.symbol, "Approving L2 standard bridge");
            self.gateway
                .approve(l2_chain, token.l2_address, L2_STANDARD_BRIDGE, amount)
                .await
                .map_err(BridgeError::other)?;
        }

        let call = IL2StandardBridge::withdrawToCall {
            l2Token: token.l2_address,
            to: self.gateway.wallet_address(),
            amount,
            minGasLimit: WITHDRAW_MIN_GAS_LIMIT,
            extraData: Default::default(),
        };
        let tx = PreparedTx {
            to: L2_STANDARD_BRIDGE,
            data: call.abi_encode().into(),
            value: U256::ZERO,
        };

        let outcome = self
            .gateway
            .send_and_confirm(l2_chain, &tx)
            .await
            .map_err(BridgeError::other)?;
        if !outcome.success {
            return Err(BridgeError::Other(format!(
                "execution reverted: withdraw {}",
                outcome.tx_hash_hex()
            )));
        }

        let (envelope, hash) = self.extract_envelope(&outcome).await?;
        info!(
            token = token.symbol,
            amount = %amount,
            tx_hash = %outcome.tx_hash_hex(),
            withdrawal_hash = %hash,
            l2_block = envelope.l2_block_number,
            "Tunnel withdrawal submitted"
        );

        Ok(BridgeSend {
            outcome,
            message_guid: None,
            withdrawal_hash: Some(hash),
            envelope: Some(envelope),
        })
    }

    async fn prove(&self, envelope: &WithdrawalEnvelope) -> Result<TxOutcome, BridgeError> {
        let oracle = IL2OutputOracle::new(self.output_oracle, &self.l1.provider);

        // Readiness: an output root covering the withdrawal block must exist
        let latest = oracle
            .latestBlockNumber()
            .call()
            .await
            .map_err(BridgeError::other)?
            ._0;
        if latest < U256::from(envelope.l2_block_number) {
            return Err(BridgeError::OutputNotReady);
        }

        let index = oracle
            .getL2OutputIndexAfter(U256::from(envelope.l2_block_number))
            .call()
            .await
            .map_err(BridgeError::other)?
            ._0;
        let proposal = oracle
            .getL2Output(index)
            .call()
            .await
            .map_err(BridgeError::other)?
            ._0;
        let output_block: u64 = proposal
            .l2BlockNumber
            .try_into()
            .map_err(|_| BridgeError::Other("output block number overflow".into()))?;

        // Output-root proof components come from the L2 block the proposal
        // commits to, plus a storage proof of the sentMessages slot.
        let block = self
            .l2
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(output_block), BlockTransactionsKind::Hashes)
            .await
            .map_err(BridgeError::other)?
            .ok_or_else(|| BridgeError::Other(format!("L2 block {} not found", output_block)))?;

        let hash = withdrawal_hash(envelope);
        let slot = withdrawal_storage_slot(hash);
        let proof_response = self
            .l2
            .provider
            .get_proof(L2_TO_L1_MESSAGE_PASSER, vec![slot])
            .block_id(output_block.into())
            .await
            .map_err(BridgeError::other)?;

        let storage_proof = proof_response
            .storage_proof
            .first()
            .ok_or_else(|| BridgeError::Other("proof response missing storage proof".into()))?
            .proof
            .clone();

        let output_root_proof = IOptimismPortal::OutputRootProof {
            version: B256::ZERO,
            stateRoot: block.header.state_root,
            messagePasserStorageRoot: proof_response.storage_hash,
            latestBlockhash: block.header.hash,
        };

        let call = IOptimismPortal::proveWithdrawalTransactionCall {
            tx: Self::withdrawal_tx(envelope),
            l2OutputIndex: index,
            outputRootProof: output_root_proof,
            withdrawalProof: storage_proof,
        };
        let tx = PreparedTx {
            to: self.portal,
            data: call.abi_encode().into(),
            value: U256::ZERO,
        };

        let outcome = self
            .gateway
            .send_and_confirm(self.l1.chain_id, &tx)
            .await
            .map_err(BridgeError::other)?;
        if !outcome.success {
            return Err(BridgeError::Other(format!(
                "execution reverted: prove {}",
                outcome.tx_hash_hex()
            )));
        }

        info!(
            withdrawal_hash = %hash,
            l2_output_index = %index,
            tx_hash = %outcome.tx_hash_hex(),
            "Withdrawal proven"
        );
        Ok(outcome)
    }

    async fn finalize(&self, envelope: &WithdrawalEnvelope) -> Result<TxOutcome, BridgeError> {
        let hash = withdrawal_hash(envelope);
        let portal = IOptimismPortal::new(self.portal, &self.l1.provider);

        let proven = portal
            .provenWithdrawals(hash)
            .call()
            .await
            .map_err(BridgeError::other)?
            ._0;
        if proven.timestamp == 0 {
            return Err(BridgeError::NotProven);
        }

        let call = IOptimismPortal::finalizeWithdrawalTransactionCall {
            tx: Self::withdrawal_tx(envelope),
        };
        let tx = PreparedTx {
            to: self.portal,
            data: call.abi_encode().into(),
            value: U256::ZERO,
        };

        let outcome = self
            .gateway
            .send_and_confirm(self.l1.chain_id, &tx)
            .await
            .map_err(BridgeError::other)?;
        if !outcome.success {
            return Err(BridgeError::Other(format!(
                "execution reverted: finalize {}",
                outcome.tx_hash_hex()
            )));
        }

        info!(
            withdrawal_hash = %hash,
            tx_hash = %outcome.tx_hash_hex(),
            "Withdrawal finalized"
        );
        Ok(outcome)
    }

    async fn is_proven(&self, envelope: &WithdrawalEnvelope) -> Result<bool, BridgeError> {
        let hash = withdrawal_hash(envelope);
        let portal = IOptimismPortal::new(self.portal, &self.l1.provider);
        let proven = portal
            .provenWithdrawals(hash)
            .call()
            .await
            .map_err(BridgeError::other)?
            ._0;
        Ok(proven.timestamp != 0)
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
        // provenWithdrawals is the portal's cheapest read
        probe(|| async {
            let portal = IOptimismPortal::new(self.portal, &self.l1.provider);
            portal
                .provenWithdrawals(B256::ZERO)
                .call()
                .await
                .map_err(|e| eyre::eyre!("portal probe failed: {}", e))?;
            Ok(())
        })
        .await
    }
}
