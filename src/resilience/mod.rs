//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Attempt against a node:
//!     → timeouts.rs (per-attempt timeout bounded by the global deadline)
//!     → On failure: retries.rs (classify, check budget, optional pause)
//!     → backoff.rs (resurrection delay for the node marked dead)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every exchange has a deadline
//! - The retry budget is a hard bound regardless of pool size
//! - Backoff saturates instead of overflowing

pub mod backoff;
pub mod retries;
pub mod timeouts;
