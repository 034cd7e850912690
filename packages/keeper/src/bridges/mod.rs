//! Bridge provider set
//!
//! Two cross-chain transfer variants behind one interface: a LayerZero-style
//! attested bridge that finalizes automatically, and the optimistic-rollup
//! tunnel whose withdrawals need an explicit prove and, after the challenge
//! period, an explicit finalize. Every wallet transaction a bridge dispatches
//! goes through the chain gateway so it consumes a managed nonce.

#![allow(dead_code)]

pub mod attested;
pub mod tunnel;

use alloy::primitives::{B256, U256};
use async_trait::async_trait;
use thiserror::Error;

use crate::gateway::TxOutcome;
use crate::health::ProviderHealth;
use evmkit_rs::registry::{BridgeRoute, TokenInfo};
use evmkit_rs::withdrawal::WithdrawalEnvelope;

/// Errors a bridge operation can surface. `OutputNotReady` is retryable by
/// construction: the reconciler logs it at debug and tries again next tick.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("OUTPUT_NOT_READY: L2 output root not yet published")]
    OutputNotReady,

    #[error("withdrawal not proven yet")]
    NotProven,

    #[error("bridge does not support {0}")]
    Unsupported(&'static str),

    #[error("{0}")]
    Other(String),
}

impl BridgeError {
    pub fn other(e: impl std::fmt::Display) -> Self {
        BridgeError::Other(e.to_string())
    }

    /// Retryable without marking the cycle failed.
    pub fn is_retryable(&self) -> bool {
        match self {
            BridgeError::OutputNotReady | BridgeError::NotProven => true,
            BridgeError::Unsupported(_) => false,
            BridgeError::Other(message) => crate::retry::is_transient(message),
        }
    }
}

/// Which way a transfer moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeDirection {
    L2ToL1,
    L1ToL2,
}

/// Result of submitting a bridge transfer.
#[derive(Debug, Clone)]
pub struct BridgeSend {
    pub outcome: TxOutcome,
    /// Attested bridges: the cross-chain message GUID
    pub message_guid: Option<B256>,
    /// Tunnel: the withdrawal hash identifying the message on L1
    pub withdrawal_hash: Option<B256>,
    /// Tunnel: the envelope needed to prove and finalize
    pub envelope: Option<WithdrawalEnvelope>,
}

/// A cross-chain transfer venue.
#[async_trait]
pub trait BridgeProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn route(&self) -> BridgeRoute;

    /// Native fee required to submit a transfer.
    async fn estimate_fee(
        &self,
        token: &TokenInfo,
        amount: U256,
        direction: BridgeDirection,
    ) -> Result<U256, BridgeError>;

    /// Submit the transfer and wait for the source-side receipt.
    async fn send(
        &self,
        token: &TokenInfo,
        amount: U256,
        direction: BridgeDirection,
    ) -> Result<BridgeSend, BridgeError>;

    /// Tunnel only: submit the withdrawal proof on L1 once the output root
    /// covering the withdrawal is published.
    async fn prove(&self, _envelope: &WithdrawalEnvelope) -> Result<TxOutcome, BridgeError> {
        Err(BridgeError::Unsupported("prove"))
    }

    /// Tunnel only: finalize a proven withdrawal after the challenge period.
    async fn finalize(&self, _envelope: &WithdrawalEnvelope) -> Result<TxOutcome, BridgeError> {
        Err(BridgeError::Unsupported("finalize"))
    }

    /// Tunnel only: whether the withdrawal is already proven on L1. Lets a
    /// restart skip a prove it dispatched but never recorded.
    async fn is_proven(&self, _envelope: &WithdrawalEnvelope) -> Result<bool, BridgeError> {
        Ok(false)
    }

    /// Whether the destination wallet balance of `token` has reached
    /// `min_expected` on `dest_chain_id`.
    async fn detect_arrival(
        &self,
        token: &TokenInfo,
        dest_chain_id: u64,
        min_expected: U256,
    ) -> Result<bool, BridgeError>;

    /// One cheap representative read.
    async fn check_health(&self) -> ProviderHealth;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_not_ready_is_retryable() {
        assert!(BridgeError::OutputNotReady.is_retryable());
        assert!(BridgeError::NotProven.is_retryable());
    }

    #[test]
    fn test_unsupported_is_not_retryable() {
        assert!(!BridgeError::Unsupported("prove").is_retryable());
    }

    #[test]
    fn test_other_defers_to_transient_classifier() {
        assert!(BridgeError::other("429 Too Many Requests").is_retryable());
        assert!(!BridgeError::other("execution reverted").is_retryable());
    }

    #[test]
    fn test_output_not_ready_is_distinguished_in_message() {
        assert!(BridgeError::OutputNotReady
            .to_string()
            .contains("OUTPUT_NOT_READY"));
    }
}
