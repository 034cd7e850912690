//! EVM RPC Client Wrapper
//!
//! Provides high-level clients for interacting with the L1 and L2 chains via
//! JSON-RPC. RPC URLs accept comma-separated fallback lists; the first URL is
//! the primary and the rest are kept for manual failover.

use alloy::{
    network::EthereumWallet,
    primitives::{Address, U256},
    providers::{Provider, ProviderBuilder, RootProvider},
    signers::local::PrivateKeySigner,
    transports::http::{Client, Http},
};
use eyre::{eyre, Result};
use tracing::info;

/// Parse a comma-separated RPC URL string into individual trimmed URLs.
pub fn parse_rpc_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Read-only EVM RPC client
pub struct EvmClientReadOnly {
    /// The alloy provider
    pub provider: RootProvider<Http<Client>>,
    /// Chain ID
    pub chain_id: u64,
    /// Fallback RPC URLs (primary excluded), kept for manual failover
    pub fallback_urls: Vec<String>,
}

impl EvmClientReadOnly {
    /// Create a new read-only EVM client from a (possibly comma-separated) URL list.
    pub fn new(rpc_urls: &str, chain_id: u64) -> Result<Self> {
        let urls = parse_rpc_urls(rpc_urls);
        let primary = urls
            .first()
            .ok_or_else(|| eyre!("At least one RPC URL is required"))?;

        let provider = ProviderBuilder::new().on_http(
            primary
                .parse()
                .map_err(|e| eyre!("Invalid RPC URL {}: {}", primary, e))?,
        );

        info!(rpc_url = %primary, chain_id, "Created read-only EVM client");

        Ok(Self {
            provider,
            chain_id,
            fallback_urls: urls[1..].to_vec(),
        })
    }

    /// Get the current block number
    pub async fn get_block_number(&self) -> Result<u64> {
        let block = self.provider.get_block_number().await?;
        Ok(block)
    }

    /// Get the native balance of an address
    pub async fn get_balance(&self, address: Address) -> Result<U256> {
        let balance = self.provider.get_balance(address).await?;
        Ok(balance)
    }

    /// Get the chain ID from the RPC
    pub async fn get_chain_id(&self) -> Result<u64> {
        let chain_id = self.provider.get_chain_id().await?;
        Ok(chain_id)
    }
}

/// EVM RPC client with signing capabilities
pub struct EvmClientWithSigner {
    /// The alloy provider with wallet
    #[allow(clippy::type_complexity)]
    pub provider: alloy::providers::fillers::FillProvider<
        alloy::providers::fillers::JoinFill<
            alloy::providers::Identity,
            alloy::providers::fillers::WalletFiller<EthereumWallet>,
        >,
        RootProvider<Http<Client>>,
        Http<Client>,
        alloy::network::Ethereum,
    >,
    /// Chain ID
    pub chain_id: u64,
    /// Signer address
    pub signer_address: Address,
    /// Fallback RPC URLs (primary excluded)
    pub fallback_urls: Vec<String>,
}

impl EvmClientWithSigner {
    /// Create a new EVM client with signing capabilities
    pub fn new(rpc_urls: &str, chain_id: u64, private_key: &str) -> Result<Self> {
        let urls = parse_rpc_urls(rpc_urls);
        let primary = urls
            .first()
            .ok_or_else(|| eyre!("At least one RPC URL is required"))?;

        let signer: PrivateKeySigner = private_key
            .parse()
            .map_err(|e| eyre!("Invalid private key: {}", e))?;

        let address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let provider = ProviderBuilder::new().wallet(wallet).on_http(
            primary
                .parse()
                .map_err(|e| eyre!("Invalid RPC URL {}: {}", primary, e))?,
        );

        info!(
            rpc_url = %primary,
            chain_id,
            address = %address,
            "Created EVM client with signer"
        );

        Ok(Self {
            provider,
            chain_id,
            signer_address: address,
            fallback_urls: urls[1..].to_vec(),
        })
    }

    /// Get the current block number
    pub async fn get_block_number(&self) -> Result<u64> {
        let block = self.provider.get_block_number().await?;
        Ok(block)
    }

    /// Get the native balance of an address
    pub async fn get_balance(&self, address: Address) -> Result<U256> {
        let balance = self.provider.get_balance(address).await?;
        Ok(balance)
    }

    /// Get the on-chain transaction count (pending) for the signer
    pub async fn get_transaction_count(&self) -> Result<u64> {
        let count = self
            .provider
            .get_transaction_count(self.signer_address)
            .pending()
            .await?;
        Ok(count)
    }
}

/// Unified EVM client that can be either read-only or with signer
pub enum EvmClient {
    ReadOnly(EvmClientReadOnly),
    WithSigner(EvmClientWithSigner),
}

impl EvmClient {
    /// Create a new read-only EVM client
    pub fn new_readonly(rpc_urls: &str, chain_id: u64) -> Result<Self> {
        Ok(EvmClient::ReadOnly(EvmClientReadOnly::new(
            rpc_urls, chain_id,
        )?))
    }

    /// Create a new EVM client with signing capabilities
    pub fn new_with_signer(rpc_urls: &str, chain_id: u64, private_key: &str) -> Result<Self> {
        Ok(EvmClient::WithSigner(EvmClientWithSigner::new(
            rpc_urls, chain_id, private_key,
        )?))
    }

    /// Get the current block number
    pub async fn get_block_number(&self) -> Result<u64> {
        match self {
            EvmClient::ReadOnly(c) => c.get_block_number().await,
            EvmClient::WithSigner(c) => c.get_block_number().await,
        }
    }

    /// Get the native balance of an address
    pub async fn get_balance(&self, address: Address) -> Result<U256> {
        match self {
            EvmClient::ReadOnly(c) => c.get_balance(address).await,
            EvmClient::WithSigner(c) => c.get_balance(address).await,
        }
    }

    /// Check if the client has a signer
    pub fn has_signer(&self) -> bool {
        matches!(self, EvmClient::WithSigner(_))
    }

    /// Get the signer address (None if read-only)
    pub fn get_signer_address(&self) -> Option<Address> {
        match self {
            EvmClient::ReadOnly(_) => None,
            EvmClient::WithSigner(c) => Some(c.signer_address),
        }
    }
}
