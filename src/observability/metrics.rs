//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define pool and limiter metrics
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `db_pool_connections` (gauge, `state` = idle|active): current pool occupancy
//! - `db_pool_events_total` (counter, `event`): created, reused, failed, timeout, closed, leak
//! - `db_pool_acquire_seconds` (histogram): wait time inside `acquire`
//! - `db_pool_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `rate_limit_decisions_total` (counter, `outcome`): allowed, rate_limited, blacklisted
//! - `rate_limit_blacklisted_clients` (gauge): current blacklist size
//! - `http_requests_total` (counter, `method`, `status`)
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so unit tests need no setup
//! - Low-cardinality labels only (no client ids)

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::CircuitState;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_pool_event(event: &'static str) {
    counter!("db_pool_events_total", "event" => event).increment(1);
}

pub fn record_pool_occupancy(idle: usize, active: usize) {
    gauge!("db_pool_connections", "state" => "idle").set(idle as f64);
    gauge!("db_pool_connections", "state" => "active").set(active as f64);
}

pub fn record_acquire_wait(wait: Duration) {
    histogram!("db_pool_acquire_seconds").record(wait.as_secs_f64());
}

pub fn record_circuit_state(state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    gauge!("db_pool_circuit_state").set(value);
}

pub fn record_rate_limit_decision(outcome: &'static str) {
    counter!("rate_limit_decisions_total", "outcome" => outcome).increment(1);
}

pub fn record_blacklist_size(size: usize) {
    gauge!("rate_limit_blacklisted_clients").set(size as f64);
}

pub fn record_request(method: &str, status: u16) {
    counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}
