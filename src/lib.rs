//! Cluster-aware HTTP transport.
//!
//! Selects which node of a cluster to talk to, detects and recovers from
//! node failures, rediscovers topology by sniffing, retries failed requests
//! on other nodes and reports every lifecycle event through a typed
//! diagnostics bus.
//!
//! ```no_run
//! use cluster_transport::{RequestOptions, RequestParams, Transport, TransportConfig};
//!
//! # async fn run() -> Result<(), cluster_transport::TransportError> {
//! let transport = Transport::from_config(TransportConfig::with_nodes(["http://localhost:9200"]))?;
//! let response = transport
//!     .request(RequestParams::get("/_cluster/health"), RequestOptions::default())
//!     .await?;
//! println!("{}", response.text());
//! # Ok(())
//! # }
//! ```

// Core
pub mod connection;
pub mod diagnostics;
pub mod pool;
pub mod sniffer;
pub mod transport;

// Cross-cutting concerns
pub mod clock;
pub mod config;
pub mod error;
pub mod health;
pub mod observability;
pub mod resilience;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConnectionKind, NodeConfig, ProxyConfig, ResurrectStrategy, TransportConfig};
pub use connection::{Connection, ConnectionRequest, ConnectionResponse};
pub use diagnostics::{DiagnosticEvent, DiagnosticKind, Diagnostics, ListenerId};
pub use error::{ConnectionError, ConnectionErrorKind, TransportError, TransportResult};
pub use pool::{ConnectionPool, Node, NodeId};
pub use sniffer::SniffReason;
pub use transport::{
    RequestBody, RequestOptions, RequestParams, SniffOutcome, Transport, TransportBuilder, TransportResponse,
};
