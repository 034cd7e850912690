//! EVMKit-RS: Shared EVM Plumbing for the VCRED Keeper
//!
//! This crate provides everything that talks to a chain but knows nothing
//! about arbitrage:
//!
//! - **Clients** - Read-only and signing EVM clients with RPC fallback lists
//! - **Contracts** - `sol!` bindings for the tokens, quoters, bridges, and
//!   portal contracts the keeper drives
//! - **ERC-20 Helpers** - balance, allowance, approve, metadata reads
//! - **Nonce Manager** - per-chain mutex-guarded nonce cache
//! - **Token Registry** - per-token addresses, decimals, and bridge routes
//! - **Withdrawal** - OP-stack withdrawal hash and envelope encoding
//! - **Redact** - wrapper that keeps secrets out of logs and JSON
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! evmkit-rs = { path = "../evmkit-rs" }
//! ```

pub mod client;
pub mod contracts;
pub mod erc20;
pub mod explorer;
pub mod nonce;
pub mod redact;
pub mod registry;
pub mod withdrawal;

pub use client::{parse_rpc_urls, EvmClient, EvmClientReadOnly, EvmClientWithSigner};
pub use nonce::NonceManager;
pub use redact::Redacted;
pub use registry::{BridgeRoute, TokenInfo, TokenRegistry};
pub use withdrawal::{withdrawal_hash, withdrawal_storage_slot, WithdrawalEnvelope};
