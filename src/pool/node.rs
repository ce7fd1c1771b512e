//! Node identity and metadata.

use std::fmt;

use url::Url;

use crate::config::NodeConfig;
use crate::error::{TransportError, TransportResult};

/// Identity key of a node within a pool: the stable id when known,
/// otherwise the normalized URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A backend node of the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub url: Url,
    pub id: Option<String>,
    /// Opaque role tags (master, data, ingest, ml, ...).
    pub roles: Vec<String>,
}

impl Node {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            id: None,
            roles: Vec::new(),
        }
    }

    pub fn parse(url: &str) -> TransportResult<Self> {
        let url = Url::parse(url)
            .map_err(|e| TransportError::Configuration(format!("Invalid node URL '{}': {}", url, e)))?;
        Ok(Self::new(url))
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn from_config(config: &NodeConfig) -> TransportResult<Self> {
        let mut node = Self::parse(&config.url)?.with_roles(config.roles.iter().cloned());
        node.id = config.id.clone();
        Ok(node)
    }

    pub fn identity(&self) -> NodeId {
        match &self.id {
            Some(id) => NodeId(id.clone()),
            None => NodeId(normalize_url(&self.url)),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Master-eligible node that neither holds data nor runs ingest.
    pub fn is_master_only(&self) -> bool {
        self.has_role("master")
            && !self.roles.iter().any(|r| r.starts_with("data"))
            && !self.has_role("ingest")
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&normalize_url(&self.url))
    }
}

/// scheme://host:port/path without credentials, query or trailing slash.
pub fn normalize_url(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let port = url.port_or_known_default().map(|p| format!(":{}", p)).unwrap_or_default();
    format!(
        "{}://{}{}{}",
        url.scheme(),
        host,
        port,
        url.path().trim_end_matches('/')
    )
}

/// Node filter installed by default: skips master-only nodes.
pub fn default_node_filter(node: &Node) -> bool {
    !node.is_master_only()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_prefers_id() {
        let node = Node::parse("http://10.0.0.1:9200").unwrap();
        assert_eq!(node.identity().as_str(), "http://10.0.0.1:9200");

        let node = node.with_id("abc");
        assert_eq!(node.identity(), NodeId::from("abc"));
    }

    #[test]
    fn test_url_normalization() {
        let a = Node::parse("http://user:pw@LOCALHOST:9200/").unwrap();
        let b = Node::parse("http://localhost:9200").unwrap();
        assert_eq!(a.identity(), b.identity());

        let c = Node::parse("https://es.example.com").unwrap();
        assert_eq!(c.identity().as_str(), "https://es.example.com:443");
    }

    #[test]
    fn test_master_only_filter() {
        let base = Node::parse("http://10.0.0.1:9200").unwrap();
        assert!(default_node_filter(&base));

        let master = base.clone().with_roles(["master"]);
        assert!(master.is_master_only());
        assert!(!default_node_filter(&master));

        let master_data = base.clone().with_roles(["master", "data_hot"]);
        assert!(default_node_filter(&master_data));

        let master_ingest = base.with_roles(["master", "ingest"]);
        assert!(default_node_filter(&master_ingest));
    }

    #[test]
    fn test_from_config() {
        let config = NodeConfig {
            url: "http://10.0.0.2:9200".to_string(),
            id: Some("n2".to_string()),
            roles: vec!["data".to_string()],
        };
        let node = Node::from_config(&config).unwrap();
        assert_eq!(node.identity().as_str(), "n2");
        assert!(node.has_role("data"));

        assert!(Node::from_config(&NodeConfig::new("not a url")).is_err());
    }
}
