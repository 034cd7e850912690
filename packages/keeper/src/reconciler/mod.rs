//! Reconciler
//!
//! The single periodic task that drives every cycle through its state
//! machine. Each tick advances at most a configured number of wallet
//! actions, honors the global and per-token pause flags, and, when budget
//! and capacity allow, asks the planner for a new opportunity to open.
//! A running flag makes overlapping ticks no-op; all persistent effects go
//! through the store, so a restart resumes exactly where the last tick
//! left off.

#![allow(dead_code)]

mod handlers;
pub mod recovery;

use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use eyre::Result;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{KeeperConfig, TradingConfig};
use crate::db::models::NewCycle;
use crate::db::Store;
use crate::gateway::ChainGateway;
use crate::logsink::LogSinks;
use crate::math::format_units;
use crate::metrics;
use crate::notify::{Notifier, NotifyEvent};
use crate::planner::Planner;
use crate::retry::is_transient;
use crate::swaps::{SwapExecutor, SwapProvider};
use crate::types::CycleState;
use crate::bridges::BridgeProvider;
use evmkit_rs::registry::{BridgeRoute, TokenRegistry};

/// Runtime control surface shared with the dashboard API.
#[derive(Debug, Default)]
pub struct ControlState {
    pub paused: bool,
    pub paused_tokens: HashSet<String>,
    pub last_run: Option<DateTime<Utc>>,
}

pub type SharedControl = Arc<RwLock<ControlState>>;

/// What one tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Tick skipped because another tick was still running
    pub overlapped: bool,
    /// Tick skipped because the keeper is paused
    pub paused: bool,
    /// Wallet actions dispatched
    pub actions: u32,
    /// Cycles examined
    pub cycles_seen: u32,
    /// Id of a newly opened cycle, if any
    pub opened_cycle: Option<i64>,
}

pub struct Reconciler {
    pub(crate) store: Store,
    pub(crate) gateway: Arc<dyn ChainGateway>,
    pub(crate) swap_providers: Vec<Arc<dyn SwapProvider>>,
    pub(crate) executor: SwapExecutor,
    pub(crate) attested: Arc<dyn BridgeProvider>,
    pub(crate) tunnel: Arc<dyn BridgeProvider>,
    pub(crate) planner: Planner,
    pub(crate) registry: Arc<TokenRegistry>,
    pub(crate) notifier: Arc<Notifier>,
    pub(crate) sinks: Arc<LogSinks>,
    pub(crate) control: SharedControl,
    pub(crate) trading: TradingConfig,
    pub(crate) keeper: KeeperConfig,
    running: AtomicBool,
    /// Cycles already flagged as stuck, to notify once per incident
    stuck_notified: std::sync::Mutex<HashSet<i64>>,
}

/// A cycle that has not moved for this long is flagged as stuck.
const STUCK_AFTER_SECS: i64 = 2 * 60 * 60;

impl Reconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        gateway: Arc<dyn ChainGateway>,
        swap_providers: Vec<Arc<dyn SwapProvider>>,
        attested: Arc<dyn BridgeProvider>,
        tunnel: Arc<dyn BridgeProvider>,
        planner: Planner,
        registry: Arc<TokenRegistry>,
        notifier: Arc<Notifier>,
        sinks: Arc<LogSinks>,
        control: SharedControl,
        trading: TradingConfig,
        keeper: KeeperConfig,
    ) -> Self {
        let executor = SwapExecutor::new(gateway.clone(), trading.quotes_ttl_ms);
        Self {
            store,
            gateway,
            swap_providers,
            executor,
            attested,
            tunnel,
            planner,
            registry,
            notifier,
            sinks,
            control,
            trading,
            keeper,
            running: AtomicBool::new(false),
            stuck_notified: std::sync::Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn bridge_for(&self, route: BridgeRoute) -> &Arc<dyn BridgeProvider> {
        match route {
            BridgeRoute::Attested => &self.attested,
            BridgeRoute::Tunnel => &self.tunnel,
        }
    }

    /// One reconciliation pass at clock time `now`. Concurrent invocations
    /// no-op; the flag is released on every exit path.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Tick overlapped a running tick; skipping");
            return TickReport {
                overlapped: true,
                ..Default::default()
            };
        }

        let report = self.tick_inner(now).await;
        self.running.store(false, Ordering::SeqCst);
        metrics::record_tick(!report.overlapped);
        report
    }

    async fn tick_inner(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        let (paused, paused_tokens) = {
            let control = self.control.read().await;
            (control.paused, control.paused_tokens.clone())
        };
        if paused {
            debug!("Keeper paused; tick is a no-op");
            report.paused = true;
            self.finish_tick(now).await;
            return report;
        }

        let mut budget = self.keeper.actions_per_tick;

        let cycles = match self.store.get_active_cycles().await {
            Ok(cycles) => cycles,
            Err(e) => {
                warn!(error = %e, "Failed to load active cycles");
                self.notifier
                    .notify(NotifyEvent::Error, json!({"error": e.to_string()}))
                    .await;
                self.finish_tick(now).await;
                return report;
            }
        };
        metrics::ACTIVE_CYCLES.set(cycles.len() as f64);
        self.flag_stuck_cycles(&cycles, now).await;

        for cycle in &cycles {
            report.cycles_seen += 1;
            if paused_tokens.contains(&cycle.token) {
                debug!(cycle_id = cycle.id, token = %cycle.token, "Token paused; skipping cycle");
                continue;
            }

            if let Err(e) = self.advance_cycle(cycle, now, &mut budget).await {
                self.handle_cycle_error(cycle.id, &cycle.token, e, now).await;
            }
        }

        // Open a new cycle when budget and capacity allow
        if budget > 0 {
            match self.maybe_open_cycle(&paused_tokens, now, &mut budget).await {
                Ok(opened) => {
                    report.opened_cycle = opened;
                    if let Some(id) = opened {
                        debug!(cycle_id = id, "Opened new cycle this tick");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Opportunity scan failed");
                }
            }
        }

        report.actions = self.keeper.actions_per_tick - budget;
        self.finish_tick(now).await;
        report
    }

    async fn finish_tick(&self, now: DateTime<Utc>) {
        let mut control = self.control.write().await;
        control.last_run = Some(now);
    }

    /// Flag cycles that have not moved in a long time, once per incident.
    /// Waiting states with legitimate long dwell (the challenge period) are
    /// exempt.
    async fn flag_stuck_cycles(&self, cycles: &[crate::db::models::Cycle], now: DateTime<Utc>) {
        let mut flagged = Vec::new();
        {
            let mut notified = self.stuck_notified.lock().unwrap();
            for cycle in cycles {
                if cycle.state().ok() == Some(CycleState::BridgeOutProved) {
                    continue;
                }
                let idle = now.signed_duration_since(cycle.updated_at).num_seconds();
                if idle > STUCK_AFTER_SECS && notified.insert(cycle.id) {
                    flagged.push((cycle.id, cycle.token.clone(), cycle.state.clone(), idle));
                }
            }
        }

        for (cycle_id, token, state, idle_secs) in flagged {
            warn!(cycle_id, state = %state, idle_secs, "Cycle appears stuck");
            self.sinks.diag(
                "warn",
                "STUCK_DETECTED",
                json!({"cycle_id": cycle_id, "token": token, "state": state, "idle_secs": idle_secs}),
            );
            self.notifier
                .notify(
                    NotifyEvent::StuckDetected,
                    json!({"cycle_id": cycle_id, "token": token, "state": state, "idle_secs": idle_secs}),
                )
                .await;
        }
    }

    /// Classify an advance failure: transient errors leave the cycle state
    /// untouched for the next tick; permanent errors are cycle-fatal.
    async fn handle_cycle_error(
        &self,
        cycle_id: i64,
        token: &str,
        error: eyre::Report,
        now: DateTime<Utc>,
    ) {
        let message = error.to_string();
        if is_transient(&message) {
            warn!(cycle_id, error = %message, "Transient step failure; will retry");
            self.sinks.diag(
                "warn",
                "step retry scheduled",
                json!({"cycle_id": cycle_id, "error": message}),
            );
            return;
        }

        warn!(cycle_id, error = %message, "Permanent step failure; cycle failed");
        if let Err(db_err) = self.store.fail_cycle(cycle_id, &message, now).await {
            warn!(cycle_id, error = %db_err, "Failed to persist cycle failure");
        }
        metrics::record_terminal_cycle(CycleState::Failed.as_str());
        self.sinks.money(
            "CYCLE_FAILED",
            json!({"cycle_id": cycle_id, "token": token, "error": message}),
        );
        self.notifier
            .notify(
                NotifyEvent::CycleFailed,
                json!({"cycle_id": cycle_id, "token": token, "error": message}),
            )
            .await;
    }

    /// Scan for an opportunity and open a cycle if one sizes profitably.
    async fn maybe_open_cycle(
        &self,
        paused_tokens: &HashSet<String>,
        now: DateTime<Utc>,
        budget: &mut u32,
    ) -> Result<Option<i64>> {
        let active = self.store.count_active_cycles().await?;
        if active >= self.trading.max_active_cycles as i64 {
            return Ok(None);
        }

        let source = self.registry.source_token();
        let balance = self
            .gateway
            .token_balance(self.registry.l2_chain_id, source.l2_address)
            .await?;
        if balance < self.trading.min_swap_input {
            info!(
                balance = %format_units(balance, source.decimals),
                "Source balance below minimum input; not opening a cycle"
            );
            return Ok(None);
        }

        let test_size = self.trading.min_swap_input;
        let opportunities = self.planner.detect(test_size).await;
        let best = opportunities
            .into_iter()
            .find(|o| !paused_tokens.contains(&o.token));
        let Some(opportunity) = best else {
            debug!("No qualifying opportunity");
            return Ok(None);
        };

        self.notifier
            .notify(
                NotifyEvent::OpportunityDetected,
                json!({
                    "token": opportunity.token,
                    "discount_bps": opportunity.discount_bps,
                }),
            )
            .await;

        let trade = self
            .planner
            .size(
                &opportunity,
                balance,
                self.trading.min_swap_input,
                self.trading.max_swap_input_cap,
                self.trading.min_profit,
                self.trading.max_quote_calls,
            )
            .await?;
        let Some(trade) = trade else {
            debug!(token = %opportunity.token, "No profitable size; not opening a cycle");
            return Ok(None);
        };

        let cycle_id = self
            .store
            .create_cycle(
                &NewCycle {
                    token: opportunity.token.clone(),
                    input_amount: trade.optimal_input.to_string(),
                },
                now,
            )
            .await?;

        info!(
            cycle_id,
            token = %opportunity.token,
            input = %format_units(trade.optimal_input, source.decimals),
            discount_bps = opportunity.discount_bps,
            "Cycle created"
        );
        self.sinks.money(
            "CYCLE_CREATED",
            json!({
                "cycle_id": cycle_id,
                "token": opportunity.token,
                "input_amount": trade.optimal_input.to_string(),
                "discount_bps": opportunity.discount_bps,
            }),
        );
        self.notifier
            .notify(
                NotifyEvent::CycleCreated,
                json!({
                    "cycle_id": cycle_id,
                    "token": opportunity.token,
                    "input_amount": trade.optimal_input.to_string(),
                }),
            )
            .await;

        // Spend remaining budget on the fresh cycle right away
        if *budget > 0 {
            if let Ok(Some(cycle)) = self.store.get_cycle(cycle_id).await {
                if let Err(e) = self.advance_cycle(&cycle, now, budget).await {
                    self.handle_cycle_error(cycle.id, &cycle.token, e, now).await;
                }
            }
        }

        Ok(Some(cycle_id))
    }

    /// Minimum arrival balance for an expected amount.
    pub(crate) fn arrival_floor(&self, expected: U256) -> U256 {
        crate::math::apply_tolerance_bps(expected, self.keeper.bridge_arrival_tolerance_bps)
    }
}

/// Spawn the periodic tick loop. Returns when `shutdown` resolves.
pub async fn run_loop(
    reconciler: Arc<Reconciler>,
    interval_ms: u64,
    mut shutdown: tokio::sync::mpsc::Receiver<()>,
) {
    let mut interval = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let report = reconciler.tick(Utc::now()).await;
                debug!(?report, "Tick finished");
            }
            _ = shutdown.recv() => {
                info!("Reconciler loop stopping");
                return;
            }
        }
    }
}
