#![allow(dead_code)]

use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;

use crate::types::{CycleState, StepKind, StepStatus};

// Note: amounts are stored as TEXT holding decimal integer minor units.
// They are parsed to U256 at the edges; no floating point ever touches a
// persisted amount.

/// One arbitrage attempt.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Cycle {
    pub id: i64,
    /// Target token symbol (X)
    pub token: String,
    /// Source-token input in minor units
    pub input_amount: String,
    /// Observed X received on L2
    pub x_out: Option<String>,
    /// Observed USDC received on L1
    pub usdc_out: Option<String>,
    /// Observed source token received back on L2
    pub vcred_out: Option<String>,
    pub state: String,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cycle {
    pub fn state(&self) -> Result<CycleState> {
        CycleState::parse(&self.state)
    }

    pub fn input(&self) -> Result<U256> {
        parse_amount(&self.input_amount)
    }

    pub fn x_out_amount(&self) -> Result<Option<U256>> {
        self.x_out.as_deref().map(parse_amount).transpose()
    }

    pub fn usdc_out_amount(&self) -> Result<Option<U256>> {
        self.usdc_out.as_deref().map(parse_amount).transpose()
    }

    pub fn vcred_out_amount(&self) -> Result<Option<U256>> {
        self.vcred_out.as_deref().map(parse_amount).transpose()
    }
}

/// For inserting new cycles
#[derive(Debug, Clone)]
pub struct NewCycle {
    pub token: String,
    pub input_amount: String,
}

/// One externally observable action taken for a cycle.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Step {
    pub id: i64,
    pub cycle_id: i64,
    pub kind: String,
    pub chain_id: i64,
    pub tx_hash: Option<String>,
    pub status: String,
    pub gas_used: Option<String>,
    pub effective_gas_price: Option<String>,
    pub error: Option<String>,
    /// Tunnel withdrawals: the withdrawal hash identifying the message
    pub withdrawal_hash: Option<String>,
    /// Tunnel withdrawals: JSON-serialized envelope for prove/finalize
    pub withdrawal_envelope: Option<String>,
    /// Attested bridges: cross-chain message GUID from the send receipt
    pub message_guid: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Step {
    pub fn kind(&self) -> Result<StepKind> {
        StepKind::parse(&self.kind)
    }

    pub fn status(&self) -> Result<StepStatus> {
        StepStatus::parse(&self.status)
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == StepStatus::Confirmed.as_str()
    }

    /// Gas spent in wei: gas_used * effective_gas_price, when both present.
    pub fn gas_cost(&self) -> Result<Option<U256>> {
        match (&self.gas_used, &self.effective_gas_price) {
            (Some(gas), Some(price)) => Ok(Some(parse_amount(gas)? * parse_amount(price)?)),
            _ => Ok(None),
        }
    }
}

/// For inserting new steps
#[derive(Debug, Clone)]
pub struct NewStep {
    pub cycle_id: i64,
    pub kind: StepKind,
    pub chain_id: i64,
}

/// Append-only financial record.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub cycle_id: i64,
    pub step_id: i64,
    pub kind: String,
    pub chain_id: i64,
    pub token: String,
    pub amount: String,
    pub tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn amount_u256(&self) -> Result<U256> {
        parse_amount(&self.amount)
    }
}

/// For inserting new ledger entries
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub cycle_id: i64,
    pub step_id: i64,
    pub kind: String,
    pub chain_id: i64,
    pub token: String,
    pub amount: String,
    pub tx_hash: Option<String>,
}

/// Ledger entry kind for gas spend records.
pub const LEDGER_KIND_GAS: &str = "GAS";

/// The single-instance lock row.
#[derive(Debug, Clone, FromRow)]
pub struct KeeperLock {
    pub id: i64,
    pub acquired_at: DateTime<Utc>,
    pub pid: i64,
    pub hostname: String,
}

/// Parse a decimal TEXT amount into U256.
pub fn parse_amount(s: &str) -> Result<U256> {
    U256::from_str(s).map_err(|_| eyre!("Invalid amount in store: {}", s))
}
