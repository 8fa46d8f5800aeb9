//! Metrics collection and exposition.
//!
//! # Metrics
//! - `wallet_operations_submitted_total` (counter): relay-accepted operations by chain
//! - `wallet_relay_rejections_total` (counter): relay rejections by kind
//! - `wallet_sponsorship_total` (counter): sponsorship outcomes
//! - `wallet_receipts_total` (counter): observed terminal receipt states
//! - `wallet_ceremonies_total` (counter): passkey ceremony outcomes
//! - `wallet_rpc_duration_seconds` (histogram): JSON-RPC latency by method
//! - `wallet_accounts` (gauge): accounts held by the directory

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_operation_submitted(chain_id: u64) {
    metrics::counter!("wallet_operations_submitted_total", "chain_id" => chain_id.to_string())
        .increment(1);
}

pub fn record_relay_rejection(kind: &'static str) {
    metrics::counter!("wallet_relay_rejections_total", "kind" => kind).increment(1);
}

pub fn record_sponsorship(outcome: &'static str) {
    metrics::counter!("wallet_sponsorship_total", "outcome" => outcome).increment(1);
}

pub fn record_receipt(state: &'static str) {
    metrics::counter!("wallet_receipts_total", "state" => state).increment(1);
}

pub fn record_ceremony(outcome: &'static str) {
    metrics::counter!("wallet_ceremonies_total", "outcome" => outcome).increment(1);
}

pub fn record_rpc(method: &str, start: Instant) {
    metrics::histogram!("wallet_rpc_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_account_count(count: usize) {
    metrics::gauge!("wallet_accounts").set(count as f64);
}
