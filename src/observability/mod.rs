//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pool, sniffer and transport produce:
//!     → logging.rs (structured tracing events with node and request_id fields)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout via the fmt layer)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through every request-scoped event
//! - Metric updates are no-ops until a recorder is installed
//! - Diagnostics (crate::diagnostics) are the typed channel for callers;
//!   logs and metrics are for operators

pub mod logging;
pub mod metrics;

use std::net::SocketAddr;

use crate::config::ObservabilityConfig;

/// Install logging and, when an address is configured, the Prometheus
/// exporter. Meant to be called once by the embedding application.
pub fn init(config: &ObservabilityConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if !logging::init_logging(config) {
        tracing::debug!("Tracing subscriber already installed");
    }
    if let Some(address) = &config.metrics_address {
        let addr: SocketAddr = address.parse()?;
        metrics::install_prometheus_exporter(addr)?;
    }
    Ok(())
}
