//! Block-explorer URL helpers
//!
//! The dashboard attaches an explorer link to every step it returns; the
//! mapping from chain id to explorer base URL lives here so it stays next
//! to the rest of the chain metadata.

/// Explorer base URL for a chain id, if one is known.
pub fn explorer_base(chain_id: u64) -> Option<&'static str> {
    match chain_id {
        1 => Some("https://etherscan.io"),
        1135 => Some("https://blockscout.lisk.com"),
        _ => None,
    }
}

/// Explorer URL for a transaction hash (`0x`-prefixed).
pub fn tx_url(chain_id: u64, tx_hash: &str) -> Option<String> {
    explorer_base(chain_id).map(|base| format!("{}/tx/{}", base, tx_hash))
}

/// Explorer URL for an address.
pub fn address_url(chain_id: u64, address: &str) -> Option<String> {
    explorer_base(chain_id).map(|base| format!("{}/address/{}", base, address))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_chains() {
        assert_eq!(
            tx_url(1, "0xabc").as_deref(),
            Some("https://etherscan.io/tx/0xabc")
        );
        assert_eq!(
            address_url(1135, "0xdef").as_deref(),
            Some("https://blockscout.lisk.com/address/0xdef")
        );
    }

    #[test]
    fn test_unknown_chain_yields_none() {
        assert!(tx_url(99999, "0xabc").is_none());
    }
}
