//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `session_lookups_total` (counter): pre-route outcome (resolved/absent/degraded)
//! - `session_mutations_total` (counter): persisted writes/expiries by outcome
//! - `store_connections_total` (counter): pool events (opened/reused/returned/closed)

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!("proxy_requests_total", "method" => method.to_string(), "status" => status.to_string())
        .increment(1);
    histogram!("proxy_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_session_lookup(outcome: &'static str) {
    counter!("session_lookups_total", "outcome" => outcome).increment(1);
}

pub fn record_session_mutation(kind: &'static str, outcome: &'static str) {
    counter!("session_mutations_total", "kind" => kind, "outcome" => outcome).increment(1);
}

pub fn record_store_connection(event: &'static str) {
    counter!("store_connections_total", "event" => event).increment(1);
}
