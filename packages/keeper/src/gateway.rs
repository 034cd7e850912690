//! Wallet / chain gateway
//!
//! Uniform typed access to both chains' reads and writes. The reconciler
//! and swap executor depend on the [`ChainGateway`] trait, so integration
//! tests can substitute scripted chain state; [`EvmGateway`] is the real
//! implementation over the alloy clients.

#![allow(dead_code)]

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::Provider;
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use evmkit_rs::client::EvmClientWithSigner;
use evmkit_rs::erc20::{self, approve_calldata};
use evmkit_rs::nonce::NonceManager;

/// A transaction ready for dispatch, as returned by swap providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTx {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

/// Outcome of a mined transaction.
#[derive(Debug, Clone)]
pub struct TxOutcome {
    pub tx_hash: B256,
    pub success: bool,
    pub gas_used: u128,
    pub effective_gas_price: u128,
}

impl TxOutcome {
    pub fn tx_hash_hex(&self) -> String {
        format!("{:#x}", self.tx_hash)
    }
}

/// Typed access to both chains for the money-moving paths.
#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// The operator wallet address.
    fn wallet_address(&self) -> Address;

    async fn native_balance(&self, chain_id: u64) -> Result<U256>;

    async fn token_balance(&self, chain_id: u64, token: Address) -> Result<U256>;

    async fn token_allowance(
        &self,
        chain_id: u64,
        token: Address,
        spender: Address,
    ) -> Result<U256>;

    /// Submit an ERC-20 approve with a managed nonce and wait for its receipt.
    async fn approve(
        &self,
        chain_id: u64,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<TxOutcome>;

    /// Read-only preflight of a prepared tx from the wallet account.
    /// A revert surfaces as an error containing "simulation failed".
    async fn simulate(&self, chain_id: u64, tx: &PreparedTx) -> Result<()>;

    /// Dispatch a prepared tx with a managed nonce; returns as soon as the
    /// node accepts it so the hash can be persisted before the receipt wait.
    async fn send(&self, chain_id: u64, tx: &PreparedTx) -> Result<B256>;

    /// Wait for a submitted hash to mine, bounded by the configured timeout.
    async fn wait_for_receipt(&self, chain_id: u64, tx_hash: B256) -> Result<TxOutcome>;

    /// Dispatch and wait in one call, for paths that persist the hash
    /// through other means.
    async fn send_and_confirm(&self, chain_id: u64, tx: &PreparedTx) -> Result<TxOutcome> {
        let hash = self.send(chain_id, tx).await?;
        self.wait_for_receipt(chain_id, hash).await
    }

    /// Single receipt poll for a previously submitted hash. `Ok(None)` means
    /// still pending.
    async fn get_receipt(&self, chain_id: u64, tx_hash: &str) -> Result<Option<TxOutcome>>;

    /// Drop the cached nonce for a chain (recovery after a failed send).
    async fn reset_nonce(&self, chain_id: u64);

    async fn block_number(&self, chain_id: u64) -> Result<u64>;
}

/// Production gateway over the signing alloy clients for the chain pair.
pub struct EvmGateway {
    l1: Arc<EvmClientWithSigner>,
    l2: Arc<EvmClientWithSigner>,
    nonces: NonceManager,
    receipt_timeout: Duration,
}

impl EvmGateway {
    pub fn new(
        l1: Arc<EvmClientWithSigner>,
        l2: Arc<EvmClientWithSigner>,
        receipt_timeout: Duration,
    ) -> Self {
        Self {
            l1,
            l2,
            nonces: NonceManager::new(),
            receipt_timeout,
        }
    }

    fn client(&self, chain_id: u64) -> Result<&Arc<EvmClientWithSigner>> {
        if chain_id == self.l1.chain_id {
            Ok(&self.l1)
        } else if chain_id == self.l2.chain_id {
            Ok(&self.l2)
        } else {
            Err(eyre!("No client for chain {}", chain_id))
        }
    }

    async fn dispatch(&self, chain_id: u64, tx: &PreparedTx) -> Result<B256> {
        let client = self.client(chain_id)?;
        let nonce = self
            .nonces
            .next_nonce(chain_id, || async { client.get_transaction_count().await })
            .await?;

        let request = TransactionRequest::default()
            .to(tx.to)
            .input(tx.data.clone().into())
            .value(tx.value)
            .nonce(nonce);

        debug!(chain_id, to = %tx.to, nonce, value = %tx.value, "Dispatching transaction");

        let pending = client
            .provider
            .send_transaction(request)
            .await
            .map_err(|e| eyre!("Failed to send transaction: {}", e))?;

        let tx_hash = *pending.tx_hash();
        info!(chain_id, tx_hash = %tx_hash, "Transaction sent");
        Ok(tx_hash)
    }
}

#[async_trait]
impl ChainGateway for EvmGateway {
    fn wallet_address(&self) -> Address {
        self.l2.signer_address
    }

    async fn native_balance(&self, chain_id: u64) -> Result<U256> {
        let client = self.client(chain_id)?;
        client.get_balance(client.signer_address).await
    }

    async fn token_balance(&self, chain_id: u64, token: Address) -> Result<U256> {
        let client = self.client(chain_id)?;
        erc20::get_token_balance(&client.provider, token, client.signer_address).await
    }

    async fn token_allowance(
        &self,
        chain_id: u64,
        token: Address,
        spender: Address,
    ) -> Result<U256> {
        let client = self.client(chain_id)?;
        erc20::get_token_allowance(&client.provider, token, client.signer_address, spender).await
    }

    async fn approve(
        &self,
        chain_id: u64,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<TxOutcome> {
        let tx = PreparedTx {
            to: token,
            data: approve_calldata(spender, amount),
            value: U256::ZERO,
        };
        let hash = self.send(chain_id, &tx).await?;
        let outcome = self.wait_for_receipt(chain_id, hash).await?;
        if !outcome.success {
            return Err(eyre!("Approve transaction reverted"));
        }
        Ok(outcome)
    }

    async fn simulate(&self, chain_id: u64, tx: &PreparedTx) -> Result<()> {
        let client = self.client(chain_id)?;
        let request = TransactionRequest::default()
            .from(client.signer_address)
            .to(tx.to)
            .input(tx.data.clone().into())
            .value(tx.value);

        client
            .provider
            .call(&request)
            .await
            .map_err(|e| eyre!("simulation failed: {}", e))?;
        Ok(())
    }

    async fn send(&self, chain_id: u64, tx: &PreparedTx) -> Result<B256> {
        match self.dispatch(chain_id, tx).await {
            Ok(hash) => Ok(hash),
            Err(e) => {
                // A failed send may leave the cached nonce ahead of the chain
                self.nonces.reset(chain_id).await;
                Err(e)
            }
        }
    }

    async fn wait_for_receipt(&self, chain_id: u64, tx_hash: B256) -> Result<TxOutcome> {
        let client = self.client(chain_id)?;
        let deadline = tokio::time::Instant::now() + self.receipt_timeout;

        loop {
            let receipt = client
                .provider
                .get_transaction_receipt(tx_hash)
                .await
                .map_err(|e| eyre!("Failed to poll receipt for {:#x}: {}", tx_hash, e))?;

            if let Some(receipt) = receipt {
                return Ok(TxOutcome {
                    tx_hash,
                    success: receipt.status(),
                    gas_used: receipt.gas_used,
                    effective_gas_price: receipt.effective_gas_price,
                });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(eyre!("Receipt wait timed out for {:#x}", tx_hash));
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }

    async fn get_receipt(&self, chain_id: u64, tx_hash: &str) -> Result<Option<TxOutcome>> {
        let client = self.client(chain_id)?;
        let hash: B256 = tx_hash
            .parse()
            .wrap_err_with(|| format!("Invalid tx hash {}", tx_hash))?;

        let receipt = client
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| eyre!("Failed to poll receipt: {}", e))?;

        Ok(receipt.map(|r| TxOutcome {
            tx_hash: hash,
            success: r.status(),
            gas_used: r.gas_used,
            effective_gas_price: r.effective_gas_price,
        }))
    }

    async fn reset_nonce(&self, chain_id: u64) {
        self.nonces.reset(chain_id).await;
    }

    async fn block_number(&self, chain_id: u64) -> Result<u64> {
        self.client(chain_id)?.get_block_number().await
    }
}
