//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the transport.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// Root configuration for a transport instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Client name reported in diagnostics.
    pub name: String,

    /// Initial node list.
    pub nodes: Vec<NodeConfig>,

    /// Retries after the first attempt of a logical request.
    pub max_retries: u32,

    /// Per-attempt timeout in milliseconds.
    pub request_timeout_ms: u64,

    /// Timeout for resurrection pings in milliseconds.
    pub ping_timeout_ms: u64,

    /// Periodic sniff interval in milliseconds (absent = disabled).
    pub sniff_interval_ms: Option<u64>,

    /// Sniff once before the first request.
    pub sniff_on_start: bool,

    /// Sniff after a request exhausts its nodes.
    pub sniff_on_connection_fault: bool,

    /// Path queried for the cluster node list.
    pub sniff_endpoint: String,

    /// How dead nodes are re-admitted.
    pub resurrect_strategy: ResurrectStrategy,

    /// Base resurrection delay in milliseconds.
    pub resurrect_timeout_ms: u64,

    /// Upper bound of the resurrection delay in milliseconds.
    pub resurrect_max_timeout_ms: u64,

    /// Selection order among alive nodes.
    pub node_selector: NodeSelectorKind,

    /// Connection implementation used for every node.
    pub connection: ConnectionKind,

    /// Optional forward proxy.
    pub proxy: Option<ProxyConfig>,

    /// TLS settings for encrypted nodes and proxies.
    pub tls: TlsOptions,

    /// Statuses treated as node failures and retried.
    pub retry_on_status: Vec<u16>,

    /// Optional delay between attempts.
    pub retry_backoff: Option<RetryBackoffConfig>,

    /// Headers sent with every request.
    pub headers: BTreeMap<String, String>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            name: "cluster-transport".to_string(),
            nodes: Vec::new(),
            max_retries: 3,
            request_timeout_ms: 30_000,
            ping_timeout_ms: 3_000,
            sniff_interval_ms: None,
            sniff_on_start: false,
            sniff_on_connection_fault: false,
            sniff_endpoint: "/_nodes/_all/http".to_string(),
            resurrect_strategy: ResurrectStrategy::Ping,
            resurrect_timeout_ms: 60_000,
            // base * 2^5
            resurrect_max_timeout_ms: 1_920_000,
            node_selector: NodeSelectorKind::RoundRobin,
            connection: ConnectionKind::Pooled,
            proxy: None,
            tls: TlsOptions::default(),
            retry_on_status: vec![502, 503, 504],
            retry_backoff: None,
            headers: BTreeMap::new(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl TransportConfig {
    /// Convenience constructor from a list of node URLs.
    pub fn with_nodes<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            nodes: urls.into_iter().map(NodeConfig::new).collect(),
            ..Self::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn sniff_interval(&self) -> Option<Duration> {
        self.sniff_interval_ms.map(Duration::from_millis)
    }

    pub fn resurrect_timeout(&self) -> Duration {
        Duration::from_millis(self.resurrect_timeout_ms)
    }

    pub fn resurrect_max_timeout(&self) -> Duration {
        Duration::from_millis(self.resurrect_max_timeout_ms)
    }
}

/// A node declared in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NodeConfig {
    /// Node URL (e.g., "http://10.0.0.1:9200").
    pub url: String,

    /// Stable node identifier.
    #[serde(default)]
    pub id: Option<String>,

    /// Declared roles.
    #[serde(default)]
    pub roles: Vec<String>,
}

impl NodeConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            id: None,
            roles: Vec::new(),
        }
    }
}

/// Resurrection policy for dead nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResurrectStrategy {
    /// Ping the node before sending real traffic.
    #[default]
    Ping,
    /// Send the next real request and judge by its outcome.
    Optimistic,
    /// Never re-admit through selection.
    None,
}

impl ResurrectStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Optimistic => "optimistic",
            Self::None => "none",
        }
    }
}

impl fmt::Display for ResurrectStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResurrectStrategy {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ping" => Ok(Self::Ping),
            "optimistic" => Ok(Self::Optimistic),
            "none" => Ok(Self::None),
            other => Err(TransportError::Configuration(format!(
                "Invalid resurrect strategy '{}', expected ping, optimistic or none",
                other
            ))),
        }
    }
}

/// Selection order among alive nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeSelectorKind {
    #[default]
    RoundRobin,
    Random,
}

/// Connection implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    /// Keep-alive hyper client.
    #[default]
    Pooled,
    /// Fresh socket per exchange.
    Socket,
    /// reqwest client.
    Reqwest,
}

/// Forward proxy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Proxy URL; credentials may be embedded as userinfo.
    pub url: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

impl ProxyConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

/// TLS configuration for outgoing connections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsOptions {
    /// PEM bundle of trusted CAs; the webpki roots are used when unset.
    pub ca_cert_path: Option<PathBuf>,
}

/// Exponential backoff between attempts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetryBackoffConfig {
    pub base_ms: u64,
    pub max_ms: u64,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Prometheus exporter bind address.
    pub metrics_address: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_address: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.resurrect_strategy, ResurrectStrategy::Ping);
        assert!(config.sniff_interval().is_none());
        assert_eq!(config.retry_on_status, vec![502, 503, 504]);
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("optimistic".parse::<ResurrectStrategy>().unwrap(), ResurrectStrategy::Optimistic);
        assert!(matches!(
            "sometimes".parse::<ResurrectStrategy>(),
            Err(TransportError::Configuration(_))
        ));
    }
}
