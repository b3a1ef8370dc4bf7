//! Prometheus metrics for the bridge reconciler
//!
//! Exposes metrics on /metrics endpoint for Prometheus scraping.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Gauge, GaugeVec, HistogramVec,
};

lazy_static! {
    // Claim intake
    pub static ref CLAIMS_RECEIVED: CounterVec = register_counter_vec!(
        "reconciler_claims_received_total",
        "Total number of claims received",
        &["action"]
    ).unwrap();

    pub static ref VERIFICATION_FAILURES: CounterVec = register_counter_vec!(
        "reconciler_verification_failures_total",
        "Claims rejected by event verification",
        &["action", "kind"]
    ).unwrap();

    // Destination execution
    pub static ref EXECUTIONS: CounterVec = register_counter_vec!(
        "reconciler_executions_total",
        "Compensating transactions by destination chain and outcome",
        &["chain", "outcome"]
    ).unwrap();

    pub static ref EXECUTION_LATENCY: HistogramVec = register_histogram_vec!(
        "reconciler_execution_latency_seconds",
        "Time from submission to destination receipt",
        &["chain"],
        vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();

    // Retry scheduler
    pub static ref RETRIES: CounterVec = register_counter_vec!(
        "reconciler_retries_total",
        "Retry attempts by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref TERMINAL_FAILURES: CounterVec = register_counter_vec!(
        "reconciler_terminal_failures_total",
        "Records that reached the retry ceiling",
        &["action"]
    ).unwrap();

    pub static ref LAST_SWEEP: Gauge = register_gauge!(
        "reconciler_last_sweep_timestamp",
        "Unix timestamp of the last retry sweep"
    ).unwrap();

    // Endpoint health
    pub static ref FAILOVERS: CounterVec = register_counter_vec!(
        "reconciler_rpc_failovers_total",
        "RPC endpoint failovers",
        &["chain"]
    ).unwrap();

    // Supply audit
    pub static ref SUPPLY: GaugeVec = register_gauge_vec!(
        "reconciler_supply",
        "Locked and minted supply in base units (lossy above 2^53)",
        &["kind"]
    ).unwrap();

    // Health
    pub static ref UP: Gauge = register_gauge!(
        "reconciler_up",
        "Whether the reconciler is up and running"
    ).unwrap();
}

pub fn record_claim_received(action: &str) {
    CLAIMS_RECEIVED.with_label_values(&[action]).inc();
}

pub fn record_verification_failure(action: &str, kind: &str) {
    VERIFICATION_FAILURES.with_label_values(&[action, kind]).inc();
}

/// Record a destination execution outcome
pub fn record_execution(chain: &str, outcome: &str, elapsed_secs: Option<f64>) {
    EXECUTIONS.with_label_values(&[chain, outcome]).inc();
    if let Some(secs) = elapsed_secs {
        EXECUTION_LATENCY.with_label_values(&[chain]).observe(secs);
    }
}

pub fn record_retry(outcome: &str) {
    RETRIES.with_label_values(&[outcome]).inc();
}

pub fn record_terminal_failure(action: &str) {
    TERMINAL_FAILURES.with_label_values(&[action]).inc();
}

pub fn record_sweep() {
    LAST_SWEEP.set(chrono::Utc::now().timestamp() as f64);
}

pub fn record_failover(chain: &str) {
    FAILOVERS.with_label_values(&[chain]).inc();
}

/// Update supply gauges (values beyond f64 precision are approximated)
pub fn record_supply(locked: f64, minted: f64) {
    SUPPLY.with_label_values(&["locked"]).set(locked);
    SUPPLY.with_label_values(&["minted"]).set(minted);
}
