//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate node and proxy URLs
//! - Validate value ranges (timeouts > 0, backoff bounds ordered)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: TransportConfig → Result<(), Vec<ValidationError>>

use std::collections::HashSet;
use std::fmt;

use url::Url;

use crate::config::schema::TransportConfig;
use crate::pool::node::normalize_url;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &TransportConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.nodes.is_empty() {
        errors.push(ValidationError::new("nodes", "at least one node is required"));
    }

    let mut identities = HashSet::new();
    for (i, node) in config.nodes.iter().enumerate() {
        let field = format!("nodes[{}].url", i);
        match check_http_url(&node.url) {
            Ok(url) => {
                let identity = node.id.clone().unwrap_or_else(|| normalize_url(&url));
                if !identities.insert(identity.clone()) {
                    errors.push(ValidationError::new(
                        format!("nodes[{}]", i),
                        format!("duplicate node identity '{}'", identity),
                    ));
                }
            }
            Err(msg) => errors.push(ValidationError::new(field, msg)),
        }
    }

    if config.request_timeout_ms == 0 {
        errors.push(ValidationError::new("request_timeout_ms", "must be greater than 0"));
    }
    if config.ping_timeout_ms == 0 {
        errors.push(ValidationError::new("ping_timeout_ms", "must be greater than 0"));
    }
    if config.sniff_interval_ms == Some(0) {
        errors.push(ValidationError::new("sniff_interval_ms", "must be greater than 0 when set"));
    }
    if !config.sniff_endpoint.starts_with('/') {
        errors.push(ValidationError::new("sniff_endpoint", "must start with '/'"));
    }
    if config.resurrect_timeout_ms == 0 {
        errors.push(ValidationError::new("resurrect_timeout_ms", "must be greater than 0"));
    }
    if config.resurrect_max_timeout_ms < config.resurrect_timeout_ms {
        errors.push(ValidationError::new(
            "resurrect_max_timeout_ms",
            "must not be lower than resurrect_timeout_ms",
        ));
    }

    for status in &config.retry_on_status {
        if !(400..=599).contains(status) {
            errors.push(ValidationError::new(
                "retry_on_status",
                format!("{} is not an error status", status),
            ));
        }
    }

    if let Some(backoff) = &config.retry_backoff {
        if backoff.max_ms < backoff.base_ms {
            errors.push(ValidationError::new("retry_backoff.max_ms", "must not be lower than base_ms"));
        }
    }

    if let Some(proxy) = &config.proxy {
        if let Err(msg) = check_http_url(&proxy.url) {
            errors.push(ValidationError::new("proxy.url", msg));
        }
        if proxy.password.is_some() && proxy.username.is_none() {
            errors.push(ValidationError::new("proxy.username", "required when a password is set"));
        }
    }

    if let Some(path) = &config.tls.ca_cert_path {
        if !path.exists() {
            errors.push(ValidationError::new(
                "tls.ca_cert_path",
                format!("file not found: {}", path.display()),
            ));
        }
    }

    for name in config.headers.keys() {
        if axum::http::HeaderName::from_bytes(name.as_bytes()).is_err() {
            errors.push(ValidationError::new("headers", format!("invalid header name '{}'", name)));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_http_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| format!("invalid URL '{}': {}", raw, e))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(format!("unsupported scheme '{}'", other)),
    }
    if url.host_str().is_none() {
        return Err(format!("URL '{}' has no host", raw));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{NodeConfig, ProxyConfig, RetryBackoffConfig};

    #[test]
    fn test_valid_config() {
        let config = TransportConfig::with_nodes(["http://localhost:9200", "https://10.0.0.2:9200"]);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = TransportConfig::with_nodes(["ftp://localhost", "not a url"]);
        config.request_timeout_ms = 0;
        config.retry_on_status = vec![200];
        config.retry_backoff = Some(RetryBackoffConfig { base_ms: 100, max_ms: 10 });
        config.proxy = Some(ProxyConfig::new("socks5://proxy:1080"));

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"nodes[0].url"));
        assert!(fields.contains(&"nodes[1].url"));
        assert!(fields.contains(&"request_timeout_ms"));
        assert!(fields.contains(&"retry_on_status"));
        assert!(fields.contains(&"retry_backoff.max_ms"));
        assert!(fields.contains(&"proxy.url"));
    }

    #[test]
    fn test_empty_and_duplicate_nodes() {
        let config = TransportConfig::default();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "nodes");

        let mut config = TransportConfig::default();
        config.nodes.push(NodeConfig::new("http://a:9200"));
        config.nodes.push(NodeConfig::new("http://a:9200/"));
        let errors = validate_config(&config).unwrap_err();
        assert!(errors[0].message.contains("duplicate"));
    }
}
