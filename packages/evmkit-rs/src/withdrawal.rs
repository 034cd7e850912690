//! OP-stack withdrawal identity
//!
//! A tunnel withdrawal is identified on L1 by the hash of its message-passed
//! envelope. The hash and the storage slot derived from it must match the
//! portal's Solidity exactly: `keccak256(abi.encode(nonce, sender, target,
//! value, gasLimit, data))` and `keccak256(abi.encode(withdrawalHash, 0))`.

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::sol_types::SolValue;
use serde::{Deserialize, Serialize};

/// The message-passed envelope of a pending L2 -> L1 withdrawal.
///
/// Serialized to JSON in the step row so a restart can prove and finalize
/// a withdrawal it did not initiate in this process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalEnvelope {
    pub nonce: U256,
    pub sender: Address,
    pub target: Address,
    pub value: U256,
    pub gas_limit: U256,
    pub data: Bytes,
    /// L2 block the withdrawal was included in. Transport metadata for
    /// output-root readiness checks; not part of the withdrawal hash.
    pub l2_block_number: u64,
}

/// Hash of the withdrawal transaction, matching `Hashing.hashWithdrawal`.
pub fn withdrawal_hash(w: &WithdrawalEnvelope) -> B256 {
    let encoded = (
        w.nonce,
        w.sender,
        w.target,
        w.value,
        w.gas_limit,
        w.data.clone(),
    )
        .abi_encode();
    keccak256(encoded)
}

/// Storage slot in the L2ToL1MessagePasser `sentMessages` mapping for a
/// withdrawal hash (mapping at slot 0).
pub fn withdrawal_storage_slot(hash: B256) -> B256 {
    let encoded = (hash, U256::ZERO).abi_encode();
    keccak256(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WithdrawalEnvelope {
        WithdrawalEnvelope {
            nonce: U256::from(42u64),
            sender: Address::repeat_byte(0x11),
            target: Address::repeat_byte(0x22),
            value: U256::ZERO,
            gas_limit: U256::from(200_000u64),
            data: Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]),
            l2_block_number: 1_234,
        }
    }

    #[test]
    fn test_block_number_does_not_affect_hash() {
        let mut w = sample();
        let base = withdrawal_hash(&w);
        w.l2_block_number = 9_999;
        assert_eq!(withdrawal_hash(&w), base);
    }

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(withdrawal_hash(&sample()), withdrawal_hash(&sample()));
    }

    #[test]
    fn test_hash_depends_on_every_field() {
        let base = withdrawal_hash(&sample());

        let mut w = sample();
        w.nonce = U256::from(43u64);
        assert_ne!(withdrawal_hash(&w), base);

        let mut w = sample();
        w.sender = Address::repeat_byte(0x33);
        assert_ne!(withdrawal_hash(&w), base);

        let mut w = sample();
        w.data = Bytes::from(vec![0x00]);
        assert_ne!(withdrawal_hash(&w), base);
    }

    #[test]
    fn test_storage_slot_differs_from_hash() {
        let hash = withdrawal_hash(&sample());
        let slot = withdrawal_storage_slot(hash);
        assert_ne!(slot, hash);
        // Same hash always maps to the same slot
        assert_eq!(slot, withdrawal_storage_slot(hash));
    }

    #[test]
    fn test_envelope_json_round_trip() {
        let w = sample();
        let json = serde_json::to_string(&w).unwrap();
        let back: WithdrawalEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, w);
        // The identity must survive persistence
        assert_eq!(withdrawal_hash(&back), withdrawal_hash(&w));
    }
}
