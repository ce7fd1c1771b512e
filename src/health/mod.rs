//! Node health subsystem.
//!
//! # Data Flow
//! ```text
//! Attempt fails (retryable)
//!     → pool marks node dead (state.rs, backoff from resilience)
//!
//! Dead node past resurrect_at:
//!     → resurrect.rs decides admission per strategy
//!         ping:       HEAD / probe, alive when status < 500
//!         optimistic: node handed out for a live trial request
//!         none:       never re-admitted
//!
//! Attempt succeeds on a dead node
//!     → pool marks node alive
//! ```
//!
//! # Design Decisions
//! - Health is per-node and lives inside the pool lock
//! - Expiry of the resurrection timer never revives a node by itself
//! - Only one probe or trial per node is in flight at a time

pub mod resurrect;
pub mod state;

pub use resurrect::{ping, Admission};
pub use state::{NodeHealth, NodeStatus};
