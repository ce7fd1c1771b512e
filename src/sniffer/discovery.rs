//! Parsing of the nodes-info discovery response.
//!
//! ```json
//! { "nodes": { "<id>": { "name": "n1", "roles": ["data", "ingest"],
//!   "http": { "publish_address": "hostname/10.0.0.1:9200" } } } }
//! ```

use std::collections::BTreeMap;

use serde::Deserialize;
use url::Url;

use crate::error::{TransportError, TransportResult};
use crate::pool::node::Node;

#[derive(Debug, Deserialize)]
struct NodesInfo {
    nodes: BTreeMap<String, NodeInfo>,
}

#[derive(Debug, Deserialize)]
struct NodeInfo {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    http: Option<HttpInfo>,
}

#[derive(Debug, Deserialize)]
struct HttpInfo {
    publish_address: String,
}

/// Parse a discovery body into nodes reachable with `scheme`. Nodes without
/// an http section are skipped.
///
/// A body that yields no reachable node is an error.
pub fn parse_nodes(body: &[u8], scheme: &str) -> TransportResult<Vec<Node>> {
    let info: NodesInfo = serde_json::from_slice(body)
        .map_err(|e| TransportError::Deserialization(format!("Invalid nodes info response: {}", e)))?;

    let mut nodes = Vec::with_capacity(info.nodes.len());
    for (id, node) in info.nodes {
        let Some(http) = node.http else {
            tracing::debug!(node = %id, name = node.name.as_deref().unwrap_or(""), "Skipping node without http");
            continue;
        };
        let address = publish_address(&http.publish_address);
        let url = Url::parse(&format!("{}://{}", scheme, address)).map_err(|e| {
            TransportError::Deserialization(format!("Invalid publish address '{}': {}", http.publish_address, e))
        })?;
        nodes.push(Node::new(url).with_id(id).with_roles(node.roles));
    }
    if nodes.is_empty() {
        return Err(TransportError::Deserialization(
            "Nodes info response lists no node with an http address".to_string(),
        ));
    }
    Ok(nodes)
}

/// `host/ip:port` resolves to `host:port`; `ip:port` is kept as is.
fn publish_address(raw: &str) -> String {
    match raw.split_once('/') {
        Some((host, ip_port)) if !host.is_empty() => match ip_port.rsplit_once(':') {
            Some((_, port)) => format!("{}:{}", host, port),
            None => host.to_string(),
        },
        Some((_, ip_port)) => ip_port.to_string(),
        None => raw.to_string(),
    }
}
