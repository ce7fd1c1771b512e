//! Metrics collection and exposition.
//!
//! # Metrics
//! - `transport_requests_total` (counter): logical requests by method, outcome
//! - `transport_request_duration_seconds` (histogram): end-to-end latency
//! - `transport_attempts_total` (counter): exchanges by node, outcome
//! - `transport_node_alive` (gauge): 1=alive, 0=dead, per node
//! - `transport_sniffs_total` (counter): sniffs by reason, outcome
//! - `transport_resurrections_total` (counter): resurrection attempts by
//!   strategy, outcome
//!
//! # Design Decisions
//! - Label values are owned strings; node identities are dynamic
//! - Recording without an installed recorder is a no-op

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

fn outcome(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

/// Record a finished logical request.
pub fn record_request(method: &str, result: &str, start: Instant) {
    metrics::counter!(
        "transport_requests_total",
        "method" => method.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
    metrics::histogram!("transport_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

/// Record one exchange against a node.
pub fn record_attempt(node: &str, success: bool) {
    metrics::counter!(
        "transport_attempts_total",
        "node" => node.to_string(),
        "result" => outcome(success)
    )
    .increment(1);
}

pub fn record_node_health(node: &str, alive: bool) {
    metrics::gauge!("transport_node_alive", "node" => node.to_string()).set(if alive { 1.0 } else { 0.0 });
}

pub fn record_sniff(reason: &str, success: bool) {
    metrics::counter!(
        "transport_sniffs_total",
        "reason" => reason.to_string(),
        "result" => outcome(success)
    )
    .increment(1);
}

pub fn record_resurrection(strategy: &str, alive: bool) {
    metrics::counter!(
        "transport_resurrections_total",
        "strategy" => strategy.to_string(),
        "result" => outcome(alive)
    )
    .increment(1);
}

/// Serve Prometheus metrics on `addr`. Must run inside a tokio runtime.
pub fn install_prometheus_exporter(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    metrics::describe_counter!("transport_requests_total", "Logical requests by method and result");
    metrics::describe_histogram!(
        "transport_request_duration_seconds",
        "End-to-end latency of logical requests, retries included"
    );
    metrics::describe_counter!("transport_attempts_total", "Exchanges against individual nodes");
    metrics::describe_gauge!("transport_node_alive", "1 when the node is alive, 0 when dead");
    metrics::describe_counter!("transport_sniffs_total", "Topology discovery runs");
    metrics::describe_counter!("transport_resurrections_total", "Attempts to revive dead nodes");

    tracing::info!(address = %addr, "Prometheus exporter listening");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_request("GET", "success", Instant::now());
        record_attempt("http://127.0.0.1:9200", false);
        record_node_health("http://127.0.0.1:9200", true);
        record_sniff("sniff-interval", true);
        record_resurrection("ping", false);
    }
}
