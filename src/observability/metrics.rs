//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_requests_total` (counter): requests by route, status
//! - `relay_request_duration_seconds` (histogram): time to response head
//! - `relay_stream_events_total` (counter): client events forwarded
//! - `relay_stream_closed_total` (counter): finished streams by outcome
//! - `relay_backend_errors_total` (counter): backend failures by kind
//! - `relay_model_switches_total` (counter): current-model changes
//!
//! # Design Decisions
//! - Recording is a no-op until `init_metrics` installs the exporter
//! - Label values are static strings; no per-request cardinality

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(route: &'static str, status: u16, start: Instant) {
    counter!("relay_requests_total", "route" => route, "status" => status.to_string()).increment(1);
    histogram!("relay_request_duration_seconds", "route" => route)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_stream_event() {
    counter!("relay_stream_events_total").increment(1);
}

pub fn record_stream_closed(outcome: &'static str) {
    counter!("relay_stream_closed_total", "outcome" => outcome).increment(1);
}

pub fn record_backend_error(kind: &'static str) {
    counter!("relay_backend_errors_total", "kind" => kind).increment(1);
}

pub fn record_model_switch() {
    counter!("relay_model_switches_total").increment(1);
}
