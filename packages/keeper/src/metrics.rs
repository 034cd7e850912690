//! Prometheus metrics for the keeper
//!
//! Exposed on the dashboard port's /metrics endpoint for scraping.

#![allow(dead_code)]

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Gauge, GaugeVec, HistogramVec,
};

lazy_static! {
    // Reconciler
    pub static ref TICKS_TOTAL: CounterVec = register_counter_vec!(
        "keeper_ticks_total",
        "Reconciler ticks, by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref ACTIONS_DISPATCHED: CounterVec = register_counter_vec!(
        "keeper_actions_dispatched_total",
        "Wallet transactions dispatched, by step kind",
        &["kind"]
    ).unwrap();

    pub static ref LAST_TICK_TIMESTAMP: Gauge = register_gauge!(
        "keeper_last_tick_timestamp",
        "Unix timestamp of the last completed tick"
    ).unwrap();

    // Cycles
    pub static ref CYCLES_TERMINAL: CounterVec = register_counter_vec!(
        "keeper_cycles_terminal_total",
        "Cycles reaching a terminal state",
        &["state"]
    ).unwrap();

    pub static ref ACTIVE_CYCLES: Gauge = register_gauge!(
        "keeper_active_cycles",
        "Cycles currently in flight"
    ).unwrap();

    // Providers
    pub static ref PROVIDER_ERRORS: CounterVec = register_counter_vec!(
        "keeper_provider_errors_total",
        "Provider failures, by provider and class",
        &["provider", "class"]
    ).unwrap();

    pub static ref QUOTE_LATENCY: HistogramVec = register_histogram_vec!(
        "keeper_quote_latency_seconds",
        "Swap quote latency by provider",
        &["provider"],
        vec![0.1, 0.25, 0.5, 1.0, 2.0, 3.0, 5.0, 10.0]
    ).unwrap();

    pub static ref PROVIDER_HEALTH: GaugeVec = register_gauge_vec!(
        "keeper_provider_health",
        "Provider health (1 ok, 0.5 degraded, 0 error)",
        &["provider"]
    ).unwrap();

    // Process
    pub static ref UP: Gauge = register_gauge!(
        "keeper_up",
        "Whether the keeper is up and holding the lock"
    ).unwrap();
}

/// Record a completed tick.
pub fn record_tick(ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    TICKS_TOTAL.with_label_values(&[outcome]).inc();
    LAST_TICK_TIMESTAMP.set(chrono::Utc::now().timestamp() as f64);
}

/// Record a dispatched wallet action.
pub fn record_action(kind: &str) {
    ACTIONS_DISPATCHED.with_label_values(&[kind]).inc();
}

/// Record a cycle reaching a terminal state.
pub fn record_terminal_cycle(state: &str) {
    CYCLES_TERMINAL.with_label_values(&[state]).inc();
}

/// Record a provider failure.
pub fn record_provider_error(provider: &str, transient: bool) {
    let class = if transient { "transient" } else { "permanent" };
    PROVIDER_ERRORS.with_label_values(&[provider, class]).inc();
}

/// Record a provider health probe result.
pub fn record_provider_health(provider: &str, status: crate::health::HealthStatus) {
    let value = match status {
        crate::health::HealthStatus::Ok => 1.0,
        crate::health::HealthStatus::Degraded => 0.5,
        crate::health::HealthStatus::Error => 0.0,
    };
    PROVIDER_HEALTH.with_label_values(&[provider]).set(value);
}
