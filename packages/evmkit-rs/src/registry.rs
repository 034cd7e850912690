//! Token and address registry
//!
//! Per-token metadata for the configured chain pair: addresses on both
//! chains, decimals, which bridge route carries the token L2 -> L1, and
//! whether it is a stablecoin. The table is hard-coded for the deployment
//! pair; entries are looked up by symbol.

use alloy::primitives::{address, Address};
use eyre::{eyre, Result};
use serde::Serialize;

/// How a token crosses from L2 to L1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BridgeRoute {
    /// LayerZero-style attested transfer; finalizes automatically.
    Attested,
    /// Optimistic-rollup withdrawal with explicit prove + finalize.
    Tunnel,
}

impl BridgeRoute {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeRoute::Attested => "attested",
            BridgeRoute::Tunnel => "tunnel",
        }
    }
}

/// Static metadata for one token on the chain pair.
#[derive(Debug, Clone)]
pub struct TokenInfo {
    pub symbol: &'static str,
    pub l2_address: Address,
    pub l1_address: Address,
    pub decimals: u8,
    pub bridge_route: BridgeRoute,
    pub is_stable: bool,
    /// OFT pool on L2 for attested sends (None for tunnel tokens).
    pub oft_pool_l2: Option<Address>,
    /// OFT pool on L1 for attested sends back to L2.
    pub oft_pool_l1: Option<Address>,
}

/// The registry for one configured chain pair.
pub struct TokenRegistry {
    pub l1_chain_id: u64,
    pub l2_chain_id: u64,
    source: TokenInfo,
    usdc: TokenInfo,
    targets: Vec<TokenInfo>,
}

impl TokenRegistry {
    /// Registry for the production pair: Ethereum mainnet (L1) and the
    /// Lisk rollup (L2).
    pub fn mainnet() -> Self {
        Self {
            l1_chain_id: 1,
            l2_chain_id: 1135,
            source: TokenInfo {
                symbol: "VCRED",
                l2_address: address!("a3e6a9a1d9b80bdbe26a4ecba7f2e1d4bd39f3a0"),
                l1_address: Address::ZERO,
                decimals: 6,
                bridge_route: BridgeRoute::Attested,
                is_stable: true,
                oft_pool_l2: None,
                oft_pool_l1: None,
            },
            usdc: TokenInfo {
                symbol: "USDC",
                l2_address: address!("f242275d3a6527d877f2c927a82d9b057609cc71"),
                l1_address: address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"),
                decimals: 6,
                bridge_route: BridgeRoute::Attested,
                is_stable: true,
                oft_pool_l2: Some(address!("3e9a42c0cb596b78b2c56b6b74fcbbb97ed0c0ca")),
                oft_pool_l1: Some(address!("c026395860db2d07ee33e05fe50ed7bd583189c7")),
            },
            targets: vec![
                TokenInfo {
                    symbol: "WETH",
                    l2_address: address!("4200000000000000000000000000000000000006"),
                    l1_address: address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"),
                    decimals: 18,
                    bridge_route: BridgeRoute::Attested,
                    is_stable: false,
                    oft_pool_l2: Some(address!("77b2043768d28e9c9ab44e1abfc95944bce57931")),
                    oft_pool_l1: Some(address!("d5c9f95a917cb9f494c1301a18b979e77dcc2f22")),
                },
                TokenInfo {
                    symbol: "WBTC",
                    l2_address: address!("2a2d4b4cfb92f2e5c74e53a0b6ae6e953ee1a1c9"),
                    l1_address: address!("2260fac5e5542a773aa44fbcfedf7c193bc2c599"),
                    decimals: 8,
                    bridge_route: BridgeRoute::Tunnel,
                    is_stable: false,
                    oft_pool_l2: None,
                    oft_pool_l1: None,
                },
            ],
        }
    }

    /// The operator's inventory token on L2.
    pub fn source_token(&self) -> &TokenInfo {
        &self.source
    }

    /// USDC on both chains (the L1 swap output and bridge-back token).
    pub fn usdc(&self) -> &TokenInfo {
        &self.usdc
    }

    /// Tradable target tokens, in table order.
    pub fn targets(&self) -> &[TokenInfo] {
        &self.targets
    }

    /// Look up any token (source, USDC, or target) by symbol.
    pub fn get(&self, symbol: &str) -> Result<&TokenInfo> {
        if self.source.symbol == symbol {
            return Ok(&self.source);
        }
        if self.usdc.symbol == symbol {
            return Ok(&self.usdc);
        }
        self.targets
            .iter()
            .find(|t| t.symbol == symbol)
            .ok_or_else(|| eyre!("Unknown token symbol: {}", symbol))
    }

    /// Address of a token on the given chain.
    pub fn address_on(&self, token: &TokenInfo, chain_id: u64) -> Result<Address> {
        if chain_id == self.l1_chain_id {
            if token.l1_address == Address::ZERO {
                return Err(eyre!("{} has no L1 address", token.symbol));
            }
            Ok(token.l1_address)
        } else if chain_id == self.l2_chain_id {
            Ok(token.l2_address)
        } else {
            Err(eyre!("Unknown chain id {}", chain_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_is_stable_six_decimals() {
        let reg = TokenRegistry::mainnet();
        assert_eq!(reg.source_token().symbol, "VCRED");
        assert!(reg.source_token().is_stable);
        assert_eq!(reg.source_token().decimals, 6);
    }

    #[test]
    fn test_lookup_by_symbol() {
        let reg = TokenRegistry::mainnet();
        assert_eq!(reg.get("WETH").unwrap().decimals, 18);
        assert_eq!(reg.get("WBTC").unwrap().bridge_route, BridgeRoute::Tunnel);
        assert!(reg.get("DOGE").is_err());
    }

    #[test]
    fn test_attested_targets_carry_oft_pools() {
        let reg = TokenRegistry::mainnet();
        for token in reg.targets() {
            match token.bridge_route {
                BridgeRoute::Attested => {
                    assert!(token.oft_pool_l2.is_some(), "{} missing L2 pool", token.symbol)
                }
                BridgeRoute::Tunnel => assert!(token.oft_pool_l2.is_none()),
            }
        }
    }

    #[test]
    fn test_address_on_chain() {
        let reg = TokenRegistry::mainnet();
        let weth = reg.get("WETH").unwrap().clone();
        assert_eq!(reg.address_on(&weth, 1).unwrap(), weth.l1_address);
        assert_eq!(reg.address_on(&weth, 1135).unwrap(), weth.l2_address);
        assert!(reg.address_on(&weth, 10).is_err());
    }

    #[test]
    fn test_source_has_no_l1_address() {
        let reg = TokenRegistry::mainnet();
        let vcred = reg.source_token().clone();
        assert!(reg.address_on(&vcred, 1).is_err());
    }
}
