//! Core domain types shared across the keeper
//!
//! The cycle state machine and step taxonomy are persisted as their
//! SCREAMING_SNAKE string forms; the enums here are the only place those
//! strings are defined.

use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one arbitrage cycle. Transitions follow the DAG driven by
/// the reconciler; `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CycleState {
    Detected,
    L2SwapDone,
    BridgeOutSent,
    BridgeOutProveRequired,
    BridgeOutProved,
    BridgeOutFinalizeRequired,
    OnL1,
    L1SwapDone,
    UsdcBridgeBackSent,
    OnL2Usdc,
    L2CloseSwapDone,
    Completed,
    Failed,
}

impl CycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleState::Detected => "DETECTED",
            CycleState::L2SwapDone => "L2_SWAP_DONE",
            CycleState::BridgeOutSent => "BRIDGE_OUT_SENT",
            CycleState::BridgeOutProveRequired => "BRIDGE_OUT_PROVE_REQUIRED",
            CycleState::BridgeOutProved => "BRIDGE_OUT_PROVED",
            CycleState::BridgeOutFinalizeRequired => "BRIDGE_OUT_FINALIZE_REQUIRED",
            CycleState::OnL1 => "ON_L1",
            CycleState::L1SwapDone => "L1_SWAP_DONE",
            CycleState::UsdcBridgeBackSent => "USDC_BRIDGE_BACK_SENT",
            CycleState::OnL2Usdc => "ON_L2_USDC",
            CycleState::L2CloseSwapDone => "L2_CLOSE_SWAP_DONE",
            CycleState::Completed => "COMPLETED",
            CycleState::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "DETECTED" => CycleState::Detected,
            "L2_SWAP_DONE" => CycleState::L2SwapDone,
            "BRIDGE_OUT_SENT" => CycleState::BridgeOutSent,
            "BRIDGE_OUT_PROVE_REQUIRED" => CycleState::BridgeOutProveRequired,
            "BRIDGE_OUT_PROVED" => CycleState::BridgeOutProved,
            "BRIDGE_OUT_FINALIZE_REQUIRED" => CycleState::BridgeOutFinalizeRequired,
            "ON_L1" => CycleState::OnL1,
            "L1_SWAP_DONE" => CycleState::L1SwapDone,
            "USDC_BRIDGE_BACK_SENT" => CycleState::UsdcBridgeBackSent,
            "ON_L2_USDC" => CycleState::OnL2Usdc,
            "L2_CLOSE_SWAP_DONE" => CycleState::L2CloseSwapDone,
            "COMPLETED" => CycleState::Completed,
            "FAILED" => CycleState::Failed,
            other => return Err(eyre!("Unknown cycle state: {}", other)),
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CycleState::Completed | CycleState::Failed)
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One externally observable action taken for a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepKind {
    L2Swap,
    BridgeOut,
    BridgeProve,
    BridgeFinalize,
    L1Swap,
    BridgeBack,
    CloseSwap,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::L2Swap => "L2_SWAP",
            StepKind::BridgeOut => "BRIDGE_OUT",
            StepKind::BridgeProve => "BRIDGE_PROVE",
            StepKind::BridgeFinalize => "BRIDGE_FINALIZE",
            StepKind::L1Swap => "L1_SWAP",
            StepKind::BridgeBack => "BRIDGE_BACK",
            StepKind::CloseSwap => "CLOSE_SWAP",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "L2_SWAP" => StepKind::L2Swap,
            "BRIDGE_OUT" => StepKind::BridgeOut,
            "BRIDGE_PROVE" => StepKind::BridgeProve,
            "BRIDGE_FINALIZE" => StepKind::BridgeFinalize,
            "L1_SWAP" => StepKind::L1Swap,
            "BRIDGE_BACK" => StepKind::BridgeBack,
            "CLOSE_SWAP" => StepKind::CloseSwap,
            other => return Err(eyre!("Unknown step kind: {}", other)),
        })
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Submission lifecycle of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    Submitted,
    Confirmed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Submitted => "submitted",
            StepStatus::Confirmed => "confirmed",
            StepStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "pending" => StepStatus::Pending,
            "submitted" => StepStatus::Submitted,
            "confirmed" => StepStatus::Confirmed,
            "failed" => StepStatus::Failed,
            other => return Err(eyre!("Unknown step status: {}", other)),
        })
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_state_round_trip() {
        let all = [
            CycleState::Detected,
            CycleState::L2SwapDone,
            CycleState::BridgeOutSent,
            CycleState::BridgeOutProveRequired,
            CycleState::BridgeOutProved,
            CycleState::BridgeOutFinalizeRequired,
            CycleState::OnL1,
            CycleState::L1SwapDone,
            CycleState::UsdcBridgeBackSent,
            CycleState::OnL2Usdc,
            CycleState::L2CloseSwapDone,
            CycleState::Completed,
            CycleState::Failed,
        ];
        for state in all {
            assert_eq!(CycleState::parse(state.as_str()).unwrap(), state);
        }
    }

    #[test]
    fn test_only_completed_and_failed_are_terminal() {
        assert!(CycleState::Completed.is_terminal());
        assert!(CycleState::Failed.is_terminal());
        assert!(!CycleState::Detected.is_terminal());
        assert!(!CycleState::OnL1.is_terminal());
    }

    #[test]
    fn test_step_kind_round_trip() {
        for kind in [
            StepKind::L2Swap,
            StepKind::BridgeOut,
            StepKind::BridgeProve,
            StepKind::BridgeFinalize,
            StepKind::L1Swap,
            StepKind::BridgeBack,
            StepKind::CloseSwap,
        ] {
            assert_eq!(StepKind::parse(kind.as_str()).unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_strings_rejected() {
        assert!(CycleState::parse("BOGUS").is_err());
        assert!(StepKind::parse("").is_err());
        assert!(StepStatus::parse("done").is_err());
    }
}
