//! ERC-20 Token Helpers
//!
//! Thin wrappers over the IERC20 bindings for balance, allowance, and
//! metadata reads. Approvals are dispatched by the keeper's gateway so the
//! nonce manager stays in the loop; these helpers are read-only.

use crate::contracts::IERC20;
use alloy::{
    primitives::{Address, Bytes, U256},
    providers::Provider,
    sol_types::SolCall,
    transports::Transport,
};
use eyre::{eyre, Result};

/// Get the ERC-20 token balance of an address
pub async fn get_token_balance<T: Transport + Clone, P: Provider<T>>(
    provider: &P,
    token_address: Address,
    account: Address,
) -> Result<U256> {
    let contract = IERC20::new(token_address, provider);
    let balance = contract
        .balanceOf(account)
        .call()
        .await
        .map_err(|e| eyre!("Failed to get balance: {}", e))?;
    Ok(balance._0)
}

/// Get the ERC-20 token allowance
pub async fn get_token_allowance<T: Transport + Clone, P: Provider<T>>(
    provider: &P,
    token_address: Address,
    owner: Address,
    spender: Address,
) -> Result<U256> {
    let contract = IERC20::new(token_address, provider);
    let allowance = contract
        .allowance(owner, spender)
        .call()
        .await
        .map_err(|e| eyre!("Failed to get allowance: {}", e))?;
    Ok(allowance._0)
}

/// Get token decimals
pub async fn get_token_decimals<P: Provider>(provider: &P, token_address: Address) -> Result<u8> {
    let contract = IERC20::new(token_address, provider);
    let decimals = contract
        .decimals()
        .call()
        .await
        .map_err(|e| eyre!("Failed to get decimals: {}", e))?;
    Ok(decimals._0)
}

/// Get token symbol
pub async fn get_token_symbol<P: Provider>(
    provider: &P,
    token_address: Address,
) -> Result<String> {
    let contract = IERC20::new(token_address, provider);
    let symbol = contract
        .symbol()
        .call()
        .await
        .map_err(|e| eyre!("Failed to get symbol: {}", e))?;
    Ok(symbol._0)
}

/// ABI-encoded calldata for `approve(spender, amount)`.
///
/// The keeper dispatches approvals through its managed-nonce path rather
/// than through the contract instance, so it needs the raw calldata.
pub fn approve_calldata(spender: Address, amount: U256) -> Bytes {
    IERC20::approveCall { spender, amount }.abi_encode().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approve_calldata_selector() {
        let data = approve_calldata(Address::ZERO, U256::from(1u64));
        // approve(address,uint256) selector
        assert_eq!(&data[..4], &[0x09, 0x5e, 0xa7, 0xb3]);
        assert_eq!(data.len(), 4 + 32 + 32);
    }
}
