//! Connection pool subsystem.
//!
//! # Data Flow
//! ```text
//! Transport attempt
//!     → pool.rs get_connection (exclude tried nodes, apply node filter)
//!         eligible dead node first (probe or trial, per strategy)
//!         else selector among alive nodes:
//!             round_robin.rs (rotate in pool order)
//!             random.rs (uniform pick)
//!     → Lease (connection + admission, releases trial flag on drop)
//!
//! Sniff result
//!     → pool.rs update (add new, drop missing, keep health of survivors)
//! ```
//!
//! # Design Decisions
//! - One mutex guards the whole node set; it is never held across an await
//! - Selection is stateless apart from the selector cursor
//! - Connections are built outside the lock

pub mod node;
#[allow(clippy::module_inception)]
pub mod pool;
pub mod random;
pub mod round_robin;

use std::fmt;

pub use node::{default_node_filter, Node, NodeId};
pub use pool::{ConnectionFactory, ConnectionPool, GetConnectionOptions, Lease, NodeFilter, PoolOptions};

/// Node selection strategy.
pub trait NodeSelector: Send + Sync + fmt::Debug {
    /// Pick one of `candidates`, given as pool positions in ascending order.
    fn select(&self, candidates: &[usize]) -> Option<usize>;
}
