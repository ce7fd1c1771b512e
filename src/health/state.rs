//! Node health state machine.
//!
//! # States
//! - Alive: node receives traffic
//! - Dead: node excluded from selection until its resurrection instant
//!
//! # State Transitions
//! ```text
//! Alive → Dead: any retryable failure (dead_count += 1, resurrect_at = now + backoff)
//! Dead  → Dead: further failures push resurrect_at out (capped)
//! Dead  → Alive: explicit mark_alive (probe or trial success)
//! ```
//!
//! Expiry of `resurrect_at` never revives a node by itself; it only makes
//! the node eligible for a probe or trial request.

use std::time::{Duration, Instant};

use crate::resilience::backoff::resurrect_delay;

/// Liveness of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Alive,
    Dead,
}

/// Mutable health record of one node. Lives behind the pool mutex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHealth {
    status: NodeStatus,
    dead_count: u32,
    resurrect_at: Option<Instant>,
    on_trial: bool,
}

impl NodeHealth {
    pub fn alive() -> Self {
        Self {
            status: NodeStatus::Alive,
            dead_count: 0,
            resurrect_at: None,
            on_trial: false,
        }
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn is_alive(&self) -> bool {
        self.status == NodeStatus::Alive
    }

    /// Consecutive failures since the node was last alive.
    pub fn dead_count(&self) -> u32 {
        self.dead_count
    }

    /// Instant before which the node must not be selected.
    pub fn resurrect_at(&self) -> Option<Instant> {
        self.resurrect_at
    }

    /// Whether the node is currently out on a probe or trial request.
    pub fn on_trial(&self) -> bool {
        self.on_trial
    }

    /// Record a failure. Returns the new resurrection delay.
    pub fn mark_dead(&mut self, now: Instant, base: Duration, cap: Duration) -> Duration {
        self.dead_count = self.dead_count.saturating_add(1);
        self.status = NodeStatus::Dead;
        self.on_trial = false;

        let delay = resurrect_delay(self.dead_count, base, cap);
        self.resurrect_at = Some(now + delay);
        delay
    }

    /// Record a success. Returns true if the node was dead.
    pub fn mark_alive(&mut self) -> bool {
        let was_dead = self.status == NodeStatus::Dead;
        self.status = NodeStatus::Alive;
        self.dead_count = 0;
        self.resurrect_at = None;
        self.on_trial = false;
        was_dead
    }

    /// Dead, past its resurrection instant, and not already on trial.
    pub fn is_eligible(&self, now: Instant) -> bool {
        self.status == NodeStatus::Dead
            && !self.on_trial
            && self.resurrect_at.map_or(true, |at| now >= at)
    }

    pub(crate) fn begin_trial(&mut self) {
        self.on_trial = true;
    }

    pub(crate) fn end_trial(&mut self) {
        self.on_trial = false;
    }
}

impl Default for NodeHealth {
    fn default() -> Self {
        Self::alive()
    }
}
