//! Metrics collection.
//!
//! # Metrics
//! - `bootstrap_workers_spawned_total` (counter): worker processes started
//! - `bootstrap_worker_exits_total` (counter): worker exits by status
//! - `bootstrap_worker_restarts_total` (counter): replacement workers
//! - `bootstrap_live_workers` (gauge): workers currently supervised
//! - `bootstrap_gate_rejections_total` (counter): requests refused before readiness
//! - `bootstrap_modules_initialized_total` (counter): module inits by module
//! - `bootstrap_rate_limited_total` (counter): requests refused by the IP limiter
//!
//! # Design Decisions
//! - Recorded through the `metrics` facade; the embedding binary installs the exporter
//! - Metric updates are atomic increments

use metrics::{counter, gauge};

pub fn record_worker_spawned(test_runner: bool) {
    counter!("bootstrap_workers_spawned_total", "test_runner" => test_runner.to_string())
        .increment(1);
}

pub fn record_worker_exit(status: Option<i32>) {
    let status = status.map(|s| s.to_string()).unwrap_or_else(|| "signal".to_string());
    counter!("bootstrap_worker_exits_total", "status" => status).increment(1);
}

pub fn record_worker_restart() {
    counter!("bootstrap_worker_restarts_total").increment(1);
}

pub fn record_live_workers(count: usize) {
    gauge!("bootstrap_live_workers").set(count as f64);
}

pub fn record_gate_rejection() {
    counter!("bootstrap_gate_rejections_total").increment(1);
}

pub fn record_module_initialized(module: &str) {
    counter!("bootstrap_modules_initialized_total", "module" => module.to_string()).increment(1);
}

pub fn record_rate_limited() {
    counter!("bootstrap_rate_limited_total").increment(1);
}
