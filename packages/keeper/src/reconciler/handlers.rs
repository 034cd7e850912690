//! Per-state cycle handlers
//!
//! Every handler is idempotent by reading before writing: it first looks
//! for an existing non-failed step of the expected kind (a submitted step
//! is re-polled for its receipt, never re-sent), then checks on-chain state
//! where the effect can be observed directly, and only then dispatches a
//! wallet transaction against the tick's action budget.

use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use eyre::{eyre, Result};
use serde_json::json;
use tracing::{debug, info, warn};

use super::Reconciler;
use crate::bridges::{BridgeDirection, BridgeError, BridgeSend};
use crate::db::models::{Cycle, NewLedgerEntry, NewStep, Step, LEDGER_KIND_GAS};
use crate::gateway::TxOutcome;
use crate::metrics;
use crate::notify::NotifyEvent;
use crate::swaps::{best_swap_quote, is_no_route_error, SwapQuote, SwapRequest};
use crate::types::{CycleState, StepKind, StepStatus};
use evmkit_rs::registry::BridgeRoute;
use evmkit_rs::withdrawal::WithdrawalEnvelope;

/// Default slippage for cycle swaps, in basis points.
const SWAP_SLIPPAGE_BPS: u64 = 50;

/// What the idempotency lookup found for a (cycle, kind).
enum StepResolution {
    /// No usable prior attempt; a fresh dispatch is required
    NeedsDispatch,
    /// A submitted tx is still waiting for its receipt
    StillPending,
    /// A confirmed step exists; advance without sending anything
    Confirmed(Step),
}

impl Reconciler {
    /// Advance one cycle by at most one transition.
    pub(crate) async fn advance_cycle(
        &self,
        cycle: &Cycle,
        now: DateTime<Utc>,
        budget: &mut u32,
    ) -> Result<()> {
        match cycle.state()? {
            CycleState::Detected => self.handle_detected(cycle, now, budget).await,
            CycleState::L2SwapDone => self.handle_l2_swap_done(cycle, now, budget).await,
            CycleState::BridgeOutSent => self.handle_bridge_out_sent(cycle, now).await,
            CycleState::BridgeOutProveRequired => {
                self.handle_prove_required(cycle, now, budget).await
            }
            CycleState::BridgeOutProved => self.handle_proved(cycle, now).await,
            CycleState::BridgeOutFinalizeRequired => {
                self.handle_finalize_required(cycle, now, budget).await
            }
            CycleState::OnL1 => self.handle_on_l1(cycle, now, budget).await,
            CycleState::L1SwapDone => self.handle_l1_swap_done(cycle, now, budget).await,
            CycleState::UsdcBridgeBackSent => self.handle_bridge_back_sent(cycle, now).await,
            CycleState::OnL2Usdc => self.handle_on_l2_usdc(cycle, now, budget).await,
            CycleState::L2CloseSwapDone => self.handle_close_done(cycle, now).await,
            CycleState::Completed | CycleState::Failed => Ok(()),
        }
    }

    /// Idempotency lookup. A submitted step gets one receipt poll; a
    /// receipt revert is cycle-fatal; a pending step with no hash was never
    /// accepted by a node and is retired so a fresh attempt can be made.
    async fn resolve_step(
        &self,
        cycle: &Cycle,
        kind: StepKind,
        now: DateTime<Utc>,
    ) -> Result<StepResolution> {
        let Some(step) = self.store.find_active_step(cycle.id, kind).await? else {
            return Ok(StepResolution::NeedsDispatch);
        };

        match step.status()? {
            StepStatus::Confirmed => Ok(StepResolution::Confirmed(step)),
            StepStatus::Submitted => {
                let Some(tx_hash) = step.tx_hash.clone() else {
                    // Submitted rows always carry a hash; treat as pending
                    self.store
                        .update_step_failed(step.id, "submitted step lost its tx hash", now)
                        .await?;
                    return Ok(StepResolution::NeedsDispatch);
                };
                match self
                    .gateway
                    .get_receipt(step.chain_id as u64, &tx_hash)
                    .await?
                {
                    Some(outcome) if outcome.success => {
                        info!(
                            cycle_id = cycle.id,
                            kind = %kind,
                            tx_hash = %tx_hash,
                            "Resumed step confirmed on-chain"
                        );
                        self.record_confirmed(cycle, &step, &outcome, now).await?;
                        let step = self
                            .store
                            .get_step(step.id)
                            .await?
                            .ok_or_else(|| eyre!("step {} vanished", step.id))?;
                        Ok(StepResolution::Confirmed(step))
                    }
                    Some(outcome) => {
                        self.store
                            .update_step_failed(step.id, "execution reverted on confirmation", now)
                            .await?;
                        Err(eyre!(
                            "execution reverted: {} tx {} reverted on confirmation",
                            kind,
                            outcome.tx_hash_hex()
                        ))
                    }
                    None => {
                        debug!(cycle_id = cycle.id, kind = %kind, tx_hash = %tx_hash, "Receipt still pending");
                        Ok(StepResolution::StillPending)
                    }
                }
            }
            StepStatus::Pending => {
                warn!(
                    cycle_id = cycle.id,
                    kind = %kind,
                    "Pending step had no submitted tx; retiring it"
                );
                self.store
                    .update_step_failed(step.id, "no tx submitted before restart", now)
                    .await?;
                Ok(StepResolution::NeedsDispatch)
            }
            StepStatus::Failed => Ok(StepResolution::NeedsDispatch),
        }
    }

    /// Confirm a step and append its gas ledger entry.
    async fn record_confirmed(
        &self,
        cycle: &Cycle,
        step: &Step,
        outcome: &TxOutcome,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.store
            .update_step_confirmed(
                step.id,
                Some(&outcome.gas_used.to_string()),
                Some(&outcome.effective_gas_price.to_string()),
                now,
            )
            .await?;

        let gas_wei = U256::from(outcome.gas_used) * U256::from(outcome.effective_gas_price);
        self.store
            .insert_ledger(
                &NewLedgerEntry {
                    cycle_id: cycle.id,
                    step_id: step.id,
                    kind: LEDGER_KIND_GAS.into(),
                    chain_id: step.chain_id,
                    token: "NATIVE".into(),
                    amount: gas_wei.to_string(),
                    tx_hash: Some(outcome.tx_hash_hex()),
                },
                now,
            )
            .await?;

        self.sinks.money(
            "TX_CONFIRMED",
            json!({
                "cycle_id": cycle.id,
                "step": step.kind,
                "chain_id": step.chain_id,
                "tx_hash": outcome.tx_hash_hex(),
                "gas_wei": gas_wei.to_string(),
            }),
        );
        self.notifier
            .notify(
                NotifyEvent::TxConfirmed,
                json!({
                    "cycle_id": cycle.id,
                    "step": step.kind,
                    "tx_hash": outcome.tx_hash_hex(),
                }),
            )
            .await;
        Ok(())
    }

    /// Dispatch one swap leg: best quote, step row, send (persisting the
    /// hash before the receipt wait), confirm, gas ledger. Returns the
    /// observed output delta, or None when the action was skipped.
    #[allow(clippy::too_many_arguments)]
    async fn run_swap_step(
        &self,
        cycle: &Cycle,
        kind: StepKind,
        chain_id: u64,
        token_in: alloy::primitives::Address,
        token_out: alloy::primitives::Address,
        amount_in: U256,
        now: DateTime<Utc>,
        budget: &mut u32,
    ) -> Result<Option<(SwapQuote, U256)>> {
        if *budget == 0 {
            debug!(cycle_id = cycle.id, kind = %kind, "Action budget exhausted; deferring");
            return Ok(None);
        }

        // Pre-send guard: the input must actually be in the wallet
        let balance = self.gateway.token_balance(chain_id, token_in).await?;
        if balance < amount_in {
            return Err(eyre!(
                "insufficient balance for {}: have {}, need {}",
                kind,
                balance,
                amount_in
            ));
        }

        let request = SwapRequest {
            chain_id,
            token_in,
            token_out,
            amount_in,
            sender: self.gateway.wallet_address(),
            slippage_bps: SWAP_SLIPPAGE_BPS,
        };
        let quote = match best_swap_quote(&self.swap_providers, &request).await {
            Ok(quote) => quote,
            Err(e) if is_no_route_error(&e) => {
                debug!(cycle_id = cycle.id, kind = %kind, "No route; action skipped this tick");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let provider = self
            .swap_providers
            .iter()
            .find(|p| p.name() == quote.provider)
            .ok_or_else(|| eyre!("winning provider {} disappeared", quote.provider))?
            .clone();

        let step_id = self
            .store
            .insert_step(
                &NewStep {
                    cycle_id: cycle.id,
                    kind,
                    chain_id: chain_id as i64,
                },
                now,
            )
            .await?;
        *budget -= 1;
        metrics::record_action(kind.as_str());

        let before_out = self.gateway.token_balance(chain_id, token_out).await?;

        let tx_hash = match self.executor.prepare_and_send(&quote).await {
            Ok(hash) => hash,
            Err(e) => {
                self.store
                    .update_step_failed(step_id, &e.to_string(), now)
                    .await?;
                return Err(e);
            }
        };
        self.store
            .update_step_submitted(step_id, &format!("{:#x}", tx_hash), now)
            .await?;
        self.notifier
            .notify(
                NotifyEvent::TxSubmitted,
                json!({
                    "cycle_id": cycle.id,
                    "step": kind.as_str(),
                    "tx_hash": format!("{:#x}", tx_hash),
                    "provider": quote.provider,
                }),
            )
            .await;

        let execution = match self.executor.confirm(provider.as_ref(), &quote, tx_hash).await {
            Ok(execution) => execution,
            Err(e) => {
                self.store
                    .update_step_failed(step_id, &e.to_string(), now)
                    .await?;
                return Err(e);
            }
        };

        let step = self
            .store
            .get_step(step_id)
            .await?
            .ok_or_else(|| eyre!("step {} vanished", step_id))?;
        self.record_confirmed(cycle, &step, &execution.outcome, now)
            .await?;

        let after_out = self.gateway.token_balance(chain_id, token_out).await?;
        let observed_out = after_out.saturating_sub(before_out);
        Ok(Some((quote, observed_out)))
    }

    // ============ DETECTED: swap source -> X on L2 ============

    async fn handle_detected(
        &self,
        cycle: &Cycle,
        now: DateTime<Utc>,
        budget: &mut u32,
    ) -> Result<()> {
        let target = self.registry.get(&cycle.token)?;
        let source = self.registry.source_token();

        match self.resolve_step(cycle, StepKind::L2Swap, now).await? {
            StepResolution::Confirmed(_) => {
                // Crash-resumed: observe the swap effect from the balance
                if cycle.x_out.is_none() {
                    let balance = self
                        .gateway
                        .token_balance(self.registry.l2_chain_id, target.l2_address)
                        .await?;
                    self.store
                        .update_cycle_amounts(cycle.id, Some(&balance.to_string()), None, None, now)
                        .await?;
                }
                self.store
                    .update_cycle_state(cycle.id, CycleState::L2SwapDone, now)
                    .await?;
                Ok(())
            }
            StepResolution::StillPending => Ok(()),
            StepResolution::NeedsDispatch => {
                let result = self
                    .run_swap_step(
                        cycle,
                        StepKind::L2Swap,
                        self.registry.l2_chain_id,
                        source.l2_address,
                        target.l2_address,
                        cycle.input()?,
                        now,
                        budget,
                    )
                    .await?;
                if let Some((_, observed_out)) = result {
                    self.store
                        .update_cycle_amounts(
                            cycle.id,
                            Some(&observed_out.to_string()),
                            None,
                            None,
                            now,
                        )
                        .await?;
                    self.store
                        .update_cycle_state(cycle.id, CycleState::L2SwapDone, now)
                        .await?;
                }
                Ok(())
            }
        }
    }

    // ============ L2_SWAP_DONE: bridge X out to L1 ============

    async fn handle_l2_swap_done(
        &self,
        cycle: &Cycle,
        now: DateTime<Utc>,
        budget: &mut u32,
    ) -> Result<()> {
        let target = self.registry.get(&cycle.token)?;
        let route = target.bridge_route;
        let next_state = match route {
            BridgeRoute::Attested => CycleState::BridgeOutSent,
            BridgeRoute::Tunnel => CycleState::BridgeOutProveRequired,
        };

        match self.resolve_step(cycle, StepKind::BridgeOut, now).await? {
            StepResolution::Confirmed(_) => {
                self.store.update_cycle_state(cycle.id, next_state, now).await?;
                Ok(())
            }
            StepResolution::StillPending => Ok(()),
            StepResolution::NeedsDispatch => {
                if *budget == 0 {
                    return Ok(());
                }
                let amount = cycle
                    .x_out_amount()?
                    .ok_or_else(|| eyre!("cycle {} has no recorded x_out", cycle.id))?;

                // Pre-send guard doubles as the double-send tripwire: if the
                // balance is short, a prior send may be in flight
                let balance = self
                    .gateway
                    .token_balance(self.registry.l2_chain_id, target.l2_address)
                    .await?;
                if balance < amount {
                    return Err(eyre!(
                        "insufficient balance to bridge out: have {}, need {}",
                        balance,
                        amount
                    ));
                }

                let step_id = self
                    .store
                    .insert_step(
                        &NewStep {
                            cycle_id: cycle.id,
                            kind: StepKind::BridgeOut,
                            chain_id: self.registry.l2_chain_id as i64,
                        },
                        now,
                    )
                    .await?;
                *budget -= 1;
                metrics::record_action(StepKind::BridgeOut.as_str());

                let bridge = self.bridge_for(route);
                let sent = match bridge
                    .send(target, amount, BridgeDirection::L2ToL1)
                    .await
                {
                    Ok(sent) => sent,
                    Err(e) => {
                        self.store
                            .update_step_failed(step_id, &e.to_string(), now)
                            .await?;
                        return Err(eyre!("{}", e));
                    }
                };

                self.finish_bridge_step(cycle, step_id, &sent, now).await?;
                self.store.update_cycle_state(cycle.id, next_state, now).await?;
                Ok(())
            }
        }
    }

    /// Shared bookkeeping for a confirmed bridge send.
    async fn finish_bridge_step(
        &self,
        cycle: &Cycle,
        step_id: i64,
        sent: &BridgeSend,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.store
            .update_step_submitted(step_id, &sent.outcome.tx_hash_hex(), now)
            .await?;
        if let Some(guid) = sent.message_guid {
            self.store
                .set_step_message_guid(step_id, &format!("{:#x}", guid), now)
                .await?;
        }
        if let (Some(hash), Some(envelope)) = (sent.withdrawal_hash, &sent.envelope) {
            let envelope_json = serde_json::to_string(envelope)?;
            self.store
                .set_step_withdrawal(step_id, &format!("{:#x}", hash), &envelope_json, now)
                .await?;
        }

        let step = self
            .store
            .get_step(step_id)
            .await?
            .ok_or_else(|| eyre!("step {} vanished", step_id))?;
        self.record_confirmed(cycle, &step, &sent.outcome, now).await
    }

    // ============ BRIDGE_OUT_SENT: watch for attested arrival ============

    async fn handle_bridge_out_sent(&self, cycle: &Cycle, now: DateTime<Utc>) -> Result<()> {
        let target = self.registry.get(&cycle.token)?;
        let expected = cycle
            .x_out_amount()?
            .ok_or_else(|| eyre!("cycle {} has no recorded x_out", cycle.id))?;

        let arrived = self
            .bridge_for(BridgeRoute::Attested)
            .detect_arrival(target, self.registry.l1_chain_id, self.arrival_floor(expected))
            .await
            .map_err(|e| eyre!("{}", e))?;

        if arrived {
            info!(cycle_id = cycle.id, token = %cycle.token, "Bridged funds arrived on L1");
            self.store
                .update_cycle_state(cycle.id, CycleState::OnL1, now)
                .await?;
        }
        Ok(())
    }

    // ============ BRIDGE_OUT_PROVE_REQUIRED: tunnel prove ============

    async fn handle_prove_required(
        &self,
        cycle: &Cycle,
        now: DateTime<Utc>,
        budget: &mut u32,
    ) -> Result<()> {
        match self.resolve_step(cycle, StepKind::BridgeProve, now).await? {
            StepResolution::Confirmed(_) => {
                self.store
                    .update_cycle_state(cycle.id, CycleState::BridgeOutProved, now)
                    .await?;
                return Ok(());
            }
            StepResolution::StillPending => return Ok(()),
            StepResolution::NeedsDispatch => {}
        }

        let envelope = self.withdrawal_envelope(cycle).await?;
        let bridge = self.bridge_for(BridgeRoute::Tunnel);

        // A restart may have lost the prove step while the chain kept it
        if bridge.is_proven(&envelope).await.map_err(|e| eyre!("{}", e))? {
            info!(cycle_id = cycle.id, "Withdrawal already proven on-chain; recording");
            let step_id = self
                .store
                .insert_step(
                    &NewStep {
                        cycle_id: cycle.id,
                        kind: StepKind::BridgeProve,
                        chain_id: self.registry.l1_chain_id as i64,
                    },
                    now,
                )
                .await?;
            self.store
                .update_step_confirmed(step_id, None, None, now)
                .await?;
            self.store
                .update_cycle_state(cycle.id, CycleState::BridgeOutProved, now)
                .await?;
            return Ok(());
        }

        if *budget == 0 {
            return Ok(());
        }

        match bridge.prove(&envelope).await {
            Ok(outcome) => {
                *budget -= 1;
                metrics::record_action(StepKind::BridgeProve.as_str());
                let step_id = self
                    .store
                    .insert_step(
                        &NewStep {
                            cycle_id: cycle.id,
                            kind: StepKind::BridgeProve,
                            chain_id: self.registry.l1_chain_id as i64,
                        },
                        now,
                    )
                    .await?;
                self.store
                    .update_step_submitted(step_id, &outcome.tx_hash_hex(), now)
                    .await?;
                let step = self
                    .store
                    .get_step(step_id)
                    .await?
                    .ok_or_else(|| eyre!("step {} vanished", step_id))?;
                self.record_confirmed(cycle, &step, &outcome, now).await?;
                self.store
                    .update_cycle_state(cycle.id, CycleState::BridgeOutProved, now)
                    .await?;
                self.notifier
                    .notify(
                        NotifyEvent::BridgeProveReady,
                        json!({"cycle_id": cycle.id, "tx_hash": outcome.tx_hash_hex()}),
                    )
                    .await;
                Ok(())
            }
            Err(BridgeError::OutputNotReady) => {
                debug!(cycle_id = cycle.id, "Output root not yet published; retrying next tick");
                self.sinks.diag(
                    "debug",
                    "OUTPUT_NOT_READY",
                    json!({"cycle_id": cycle.id, "token": cycle.token}),
                );
                Ok(())
            }
            Err(e) => {
                *budget -= 1;
                Err(eyre!("{}", e))
            }
        }
    }

    // ============ BRIDGE_OUT_PROVED: wait out the challenge period ============

    async fn handle_proved(&self, cycle: &Cycle, now: DateTime<Utc>) -> Result<()> {
        let prove_step = self
            .store
            .find_active_step(cycle.id, StepKind::BridgeProve)
            .await?
            .ok_or_else(|| eyre!("cycle {} lost its prove step", cycle.id))?;

        let ready_at =
            prove_step.updated_at + chrono::Duration::seconds(self.keeper.challenge_period_secs as i64);
        if now < ready_at {
            debug!(
                cycle_id = cycle.id,
                ready_at = %ready_at,
                "Challenge period still running"
            );
            return Ok(());
        }

        info!(cycle_id = cycle.id, "Challenge period elapsed; finalize required");
        self.store
            .update_cycle_state(cycle.id, CycleState::BridgeOutFinalizeRequired, now)
            .await?;
        self.notifier
            .notify(
                NotifyEvent::BridgeFinalizeReady,
                json!({"cycle_id": cycle.id, "token": cycle.token}),
            )
            .await;
        Ok(())
    }

    // ============ BRIDGE_OUT_FINALIZE_REQUIRED: tunnel finalize ============

    async fn handle_finalize_required(
        &self,
        cycle: &Cycle,
        now: DateTime<Utc>,
        budget: &mut u32,
    ) -> Result<()> {
        match self.resolve_step(cycle, StepKind::BridgeFinalize, now).await? {
            StepResolution::Confirmed(_) => {
                // Finalize landed; funds move on arrival observation
                self.check_l1_arrival(cycle, now).await
            }
            StepResolution::StillPending => Ok(()),
            StepResolution::NeedsDispatch => {
                if *budget == 0 {
                    return Ok(());
                }
                let envelope = self.withdrawal_envelope(cycle).await?;
                let bridge = self.bridge_for(BridgeRoute::Tunnel);

                let step_id = self
                    .store
                    .insert_step(
                        &NewStep {
                            cycle_id: cycle.id,
                            kind: StepKind::BridgeFinalize,
                            chain_id: self.registry.l1_chain_id as i64,
                        },
                        now,
                    )
                    .await?;
                *budget -= 1;
                metrics::record_action(StepKind::BridgeFinalize.as_str());

                match bridge.finalize(&envelope).await {
                    Ok(outcome) => {
                        self.store
                            .update_step_submitted(step_id, &outcome.tx_hash_hex(), now)
                            .await?;
                        let step = self
                            .store
                            .get_step(step_id)
                            .await?
                            .ok_or_else(|| eyre!("step {} vanished", step_id))?;
                        self.record_confirmed(cycle, &step, &outcome, now).await?;
                        self.check_l1_arrival(cycle, now).await
                    }
                    Err(BridgeError::NotProven) => {
                        // The prove landed but its effect is not visible on
                        // L1 yet; retire the attempt and retry next tick
                        debug!(
                            cycle_id = cycle.id,
                            "Withdrawal not yet proven on L1; retrying finalize next tick"
                        );
                        self.sinks.diag(
                            "debug",
                            "NOT_PROVEN",
                            json!({"cycle_id": cycle.id, "token": cycle.token}),
                        );
                        self.store
                            .update_step_failed(step_id, "withdrawal not proven yet", now)
                            .await?;
                        Ok(())
                    }
                    Err(e) => {
                        self.store
                            .update_step_failed(step_id, &e.to_string(), now)
                            .await?;
                        Err(eyre!("{}", e))
                    }
                }
            }
        }
    }

    /// Shared L1 arrival observation for both bridge variants.
    async fn check_l1_arrival(&self, cycle: &Cycle, now: DateTime<Utc>) -> Result<()> {
        let target = self.registry.get(&cycle.token)?;
        let expected = cycle
            .x_out_amount()?
            .ok_or_else(|| eyre!("cycle {} has no recorded x_out", cycle.id))?;

        let arrived = self
            .bridge_for(target.bridge_route)
            .detect_arrival(target, self.registry.l1_chain_id, self.arrival_floor(expected))
            .await
            .map_err(|e| eyre!("{}", e))?;

        if arrived {
            info!(cycle_id = cycle.id, token = %cycle.token, "Funds on L1 wallet");
            self.store
                .update_cycle_state(cycle.id, CycleState::OnL1, now)
                .await?;
        }
        Ok(())
    }

    // ============ ON_L1: swap X -> USDC on L1 ============

    async fn handle_on_l1(
        &self,
        cycle: &Cycle,
        now: DateTime<Utc>,
        budget: &mut u32,
    ) -> Result<()> {
        let target = self.registry.get(&cycle.token)?;
        let usdc = self.registry.usdc();

        match self.resolve_step(cycle, StepKind::L1Swap, now).await? {
            StepResolution::Confirmed(_) => {
                if cycle.usdc_out.is_none() {
                    let balance = self
                        .gateway
                        .token_balance(self.registry.l1_chain_id, usdc.l1_address)
                        .await?;
                    self.store
                        .update_cycle_amounts(cycle.id, None, Some(&balance.to_string()), None, now)
                        .await?;
                }
                self.store
                    .update_cycle_state(cycle.id, CycleState::L1SwapDone, now)
                    .await?;
                Ok(())
            }
            StepResolution::StillPending => Ok(()),
            StepResolution::NeedsDispatch => {
                // Swap what actually arrived, not the pre-bridge figure
                let amount = self
                    .gateway
                    .token_balance(self.registry.l1_chain_id, target.l1_address)
                    .await?;
                if amount.is_zero() {
                    return Err(eyre!("insufficient balance: no {} on L1 to swap", cycle.token));
                }

                let result = self
                    .run_swap_step(
                        cycle,
                        StepKind::L1Swap,
                        self.registry.l1_chain_id,
                        target.l1_address,
                        usdc.l1_address,
                        amount,
                        now,
                        budget,
                    )
                    .await?;
                if let Some((_, observed_out)) = result {
                    self.store
                        .update_cycle_amounts(
                            cycle.id,
                            None,
                            Some(&observed_out.to_string()),
                            None,
                            now,
                        )
                        .await?;
                    self.store
                        .update_cycle_state(cycle.id, CycleState::L1SwapDone, now)
                        .await?;
                }
                Ok(())
            }
        }
    }

    // ============ L1_SWAP_DONE: bridge USDC back to L2 ============

    async fn handle_l1_swap_done(
        &self,
        cycle: &Cycle,
        now: DateTime<Utc>,
        budget: &mut u32,
    ) -> Result<()> {
        let usdc = self.registry.usdc();

        match self.resolve_step(cycle, StepKind::BridgeBack, now).await? {
            StepResolution::Confirmed(_) => {
                self.store
                    .update_cycle_state(cycle.id, CycleState::UsdcBridgeBackSent, now)
                    .await?;
                Ok(())
            }
            StepResolution::StillPending => Ok(()),
            StepResolution::NeedsDispatch => {
                if *budget == 0 {
                    return Ok(());
                }
                let amount = cycle
                    .usdc_out_amount()?
                    .ok_or_else(|| eyre!("cycle {} has no recorded usdc_out", cycle.id))?;

                let balance = self
                    .gateway
                    .token_balance(self.registry.l1_chain_id, usdc.l1_address)
                    .await?;
                if balance < amount {
                    return Err(eyre!(
                        "insufficient balance to bridge back: have {}, need {}",
                        balance,
                        amount
                    ));
                }

                let step_id = self
                    .store
                    .insert_step(
                        &NewStep {
                            cycle_id: cycle.id,
                            kind: StepKind::BridgeBack,
                            chain_id: self.registry.l1_chain_id as i64,
                        },
                        now,
                    )
                    .await?;
                *budget -= 1;
                metrics::record_action(StepKind::BridgeBack.as_str());

                // USDC always rides the attested bridge home
                let sent = match self
                    .bridge_for(BridgeRoute::Attested)
                    .send(usdc, amount, BridgeDirection::L1ToL2)
                    .await
                {
                    Ok(sent) => sent,
                    Err(e) => {
                        self.store
                            .update_step_failed(step_id, &e.to_string(), now)
                            .await?;
                        return Err(eyre!("{}", e));
                    }
                };

                self.finish_bridge_step(cycle, step_id, &sent, now).await?;
                self.store
                    .update_cycle_state(cycle.id, CycleState::UsdcBridgeBackSent, now)
                    .await?;
                Ok(())
            }
        }
    }

    // ============ USDC_BRIDGE_BACK_SENT: watch for L2 arrival ============

    async fn handle_bridge_back_sent(&self, cycle: &Cycle, now: DateTime<Utc>) -> Result<()> {
        let usdc = self.registry.usdc();
        let expected = cycle
            .usdc_out_amount()?
            .ok_or_else(|| eyre!("cycle {} has no recorded usdc_out", cycle.id))?;

        let arrived = self
            .bridge_for(BridgeRoute::Attested)
            .detect_arrival(usdc, self.registry.l2_chain_id, self.arrival_floor(expected))
            .await
            .map_err(|e| eyre!("{}", e))?;

        if arrived {
            info!(cycle_id = cycle.id, "USDC arrived back on L2");
            self.store
                .update_cycle_state(cycle.id, CycleState::OnL2Usdc, now)
                .await?;
        }
        Ok(())
    }

    // ============ ON_L2_USDC: close swap USDC -> source on L2 ============

    async fn handle_on_l2_usdc(
        &self,
        cycle: &Cycle,
        now: DateTime<Utc>,
        budget: &mut u32,
    ) -> Result<()> {
        let usdc = self.registry.usdc();
        let source = self.registry.source_token();

        match self.resolve_step(cycle, StepKind::CloseSwap, now).await? {
            StepResolution::Confirmed(_) => {
                // Crash-resumed: observe the swap effect from the balance
                if cycle.vcred_out.is_none() {
                    let balance = self
                        .gateway
                        .token_balance(self.registry.l2_chain_id, source.l2_address)
                        .await?;
                    self.store
                        .update_cycle_amounts(
                            cycle.id,
                            None,
                            None,
                            Some(&balance.to_string()),
                            now,
                        )
                        .await?;
                }
                self.store
                    .update_cycle_state(cycle.id, CycleState::L2CloseSwapDone, now)
                    .await?;
                Ok(())
            }
            StepResolution::StillPending => Ok(()),
            StepResolution::NeedsDispatch => {
                let amount = self
                    .gateway
                    .token_balance(self.registry.l2_chain_id, usdc.l2_address)
                    .await?;
                if amount.is_zero() {
                    return Err(eyre!("insufficient balance: no USDC on L2 to close with"));
                }

                let result = self
                    .run_swap_step(
                        cycle,
                        StepKind::CloseSwap,
                        self.registry.l2_chain_id,
                        usdc.l2_address,
                        source.l2_address,
                        amount,
                        now,
                        budget,
                    )
                    .await?;
                if let Some((_, observed_out)) = result {
                    self.store
                        .update_cycle_amounts(
                            cycle.id,
                            None,
                            None,
                            Some(&observed_out.to_string()),
                            now,
                        )
                        .await?;
                    self.store
                        .update_cycle_state(cycle.id, CycleState::L2CloseSwapDone, now)
                        .await?;
                }
                Ok(())
            }
        }
    }

    // ============ L2_CLOSE_SWAP_DONE: bookkeeping to COMPLETED ============

    async fn handle_close_done(&self, cycle: &Cycle, now: DateTime<Utc>) -> Result<()> {
        self.store
            .update_cycle_state(cycle.id, CycleState::Completed, now)
            .await?;
        metrics::record_terminal_cycle(CycleState::Completed.as_str());

        let vcred_out = cycle.vcred_out.clone().unwrap_or_default();
        info!(
            cycle_id = cycle.id,
            token = %cycle.token,
            input = %cycle.input_amount,
            vcred_out = %vcred_out,
            "Cycle completed"
        );
        self.sinks.money(
            "CYCLE_COMPLETED",
            json!({
                "cycle_id": cycle.id,
                "token": cycle.token,
                "input_amount": cycle.input_amount,
                "vcred_out": vcred_out,
            }),
        );
        self.notifier
            .notify(
                NotifyEvent::CycleCompleted,
                json!({
                    "cycle_id": cycle.id,
                    "token": cycle.token,
                    "input_amount": cycle.input_amount,
                    "vcred_out": vcred_out,
                }),
            )
            .await;
        Ok(())
    }

    /// Load the withdrawal envelope persisted on the BRIDGE_OUT step.
    async fn withdrawal_envelope(&self, cycle: &Cycle) -> Result<WithdrawalEnvelope> {
        let step = self
            .store
            .find_active_step(cycle.id, StepKind::BridgeOut)
            .await?
            .ok_or_else(|| eyre!("cycle {} has no bridge-out step", cycle.id))?;
        let json = step
            .withdrawal_envelope
            .ok_or_else(|| eyre!("cycle {} bridge-out step has no withdrawal envelope", cycle.id))?;
        let envelope: WithdrawalEnvelope = serde_json::from_str(&json)?;
        Ok(envelope)
    }
}
