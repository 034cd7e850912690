//! Cycle accounting
//!
//! Pure functions over store rows: per-cycle P&L from the recorded input
//! and output amounts plus gas ledger entries, and daily/lifetime folds
//! over completed cycles. Gas is kept per chain in native wei; converting
//! it into source-token units requires an observed market rate and is
//! always labeled as a conversion, never folded in silently.

#![allow(dead_code)]

use alloy::primitives::{I256, U256};
use chrono::{DateTime, Utc};
use eyre::Result;
use serde::Serialize;

use crate::db::models::{Cycle, LedgerEntry, Step, LEDGER_KIND_GAS};
use crate::types::CycleState;

/// Profit and loss of a single cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CyclePnl {
    /// Source-token input (minor units)
    pub input: U256,
    /// Source-token received at close (minor units)
    pub output: U256,
    /// output - input, signed
    pub gross: I256,
    /// Gas spent on L2, native wei
    pub gas_l2: U256,
    /// Gas spent on L1, native wei
    pub gas_l1: U256,
    /// Gas converted to source-token units at the observed market rate,
    /// when a rate was supplied
    pub gas_in_source: Option<U256>,
    /// gross minus converted gas; equals gross when no rate was supplied
    pub net: I256,
}

/// Observed market rate for converting native gas into source-token units.
/// `source_per_native` is how many source minor units one native wei buys,
/// expressed as a numerator/denominator pair to stay in integers.
#[derive(Debug, Clone, Copy)]
pub struct GasRate {
    pub source_units_numerator: U256,
    pub native_wei_denominator: U256,
}

impl GasRate {
    pub fn convert(&self, native_wei: U256) -> U256 {
        if self.native_wei_denominator.is_zero() {
            return U256::ZERO;
        }
        native_wei * self.source_units_numerator / self.native_wei_denominator
    }
}

fn to_signed(value: U256) -> I256 {
    I256::try_from(value).unwrap_or(I256::MAX)
}

/// Sum gas ledger entries for one chain.
fn gas_on_chain(ledger: &[LedgerEntry], chain_id: u64) -> Result<U256> {
    let mut total = U256::ZERO;
    for entry in ledger {
        if entry.kind == LEDGER_KIND_GAS && entry.chain_id == chain_id as i64 {
            total += entry.amount_u256()?;
        }
    }
    Ok(total)
}

/// P&L for one cycle from its row and ledger. `output` falls back to zero
/// for cycles that never closed.
pub fn cycle_pnl(
    cycle: &Cycle,
    ledger: &[LedgerEntry],
    l1_chain_id: u64,
    l2_chain_id: u64,
    gas_rate: Option<GasRate>,
) -> Result<CyclePnl> {
    let input = cycle.input()?;
    let output = cycle.vcred_out_amount()?.unwrap_or(U256::ZERO);
    let gross = to_signed(output) - to_signed(input);

    let gas_l1 = gas_on_chain(ledger, l1_chain_id)?;
    let gas_l2 = gas_on_chain(ledger, l2_chain_id)?;

    let gas_in_source = gas_rate.map(|rate| rate.convert(gas_l1 + gas_l2));
    let net = match gas_in_source {
        Some(gas) => gross - to_signed(gas),
        None => gross,
    };

    Ok(CyclePnl {
        input,
        output,
        gross,
        gas_l2,
        gas_l1,
        gas_in_source,
        net,
    })
}

/// Aggregate P&L over a set of cycles.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregatePnl {
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub total_input: U256,
    pub total_output: U256,
    pub gross: I256,
    pub gas_l2: U256,
    pub gas_l1: U256,
    pub net: I256,
}

/// Fold completed cycles into an aggregate; failed cycles are counted but
/// contribute no amounts (their funds are handled by recovery).
pub fn aggregate_pnl(
    cycles: &[(Cycle, Vec<LedgerEntry>)],
    l1_chain_id: u64,
    l2_chain_id: u64,
    gas_rate: Option<GasRate>,
) -> Result<AggregatePnl> {
    let mut agg = AggregatePnl::default();

    for (cycle, ledger) in cycles {
        match cycle.state()? {
            CycleState::Completed => {
                let pnl = cycle_pnl(cycle, ledger, l1_chain_id, l2_chain_id, gas_rate)?;
                agg.cycles_completed += 1;
                agg.total_input += pnl.input;
                agg.total_output += pnl.output;
                agg.gross += pnl.gross;
                agg.gas_l2 += pnl.gas_l2;
                agg.gas_l1 += pnl.gas_l1;
                agg.net += pnl.net;
            }
            CycleState::Failed => {
                agg.cycles_failed += 1;
            }
            _ => {}
        }
    }

    Ok(agg)
}

/// Whether a timestamp falls on the given UTC day.
pub fn is_same_utc_day(ts: DateTime<Utc>, day: DateTime<Utc>) -> bool {
    ts.date_naive() == day.date_naive()
}

/// Record a gas ledger amount for a confirmed step, if its receipt carried
/// gas data.
pub fn gas_ledger_amount(step: &Step) -> Result<Option<U256>> {
    step.gas_cost()
}
