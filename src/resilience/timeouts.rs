//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound each attempt by its own timeout
//! - Bound the whole logical request by an optional global deadline
//!
//! # Design Decisions
//! - Remaining budget is recomputed before every attempt
//! - An exhausted deadline is distinct from a single-attempt timeout

use std::time::{Duration, Instant};

/// Absolute deadline for a logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No global bound.
    pub fn none() -> Self {
        Self(None)
    }

    /// Deadline `budget` after `now`. A budget past the clock's range is
    /// treated as no bound at all.
    pub fn after(now: Instant, budget: Option<Duration>) -> Self {
        Self(budget.and_then(|b| now.checked_add(b)))
    }

    /// Time left at `now`; `None` when unbounded.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(now))
    }

    /// Timeout for the next attempt, or `None` once the deadline is spent.
    pub fn attempt_timeout(&self, per_attempt: Duration, now: Instant) -> Option<Duration> {
        match self.remaining(now) {
            None => Some(per_attempt),
            Some(left) if left.is_zero() => None,
            Some(left) => Some(per_attempt.min(left)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded() {
        let now = Instant::now();
        let deadline = Deadline::none();
        assert_eq!(deadline.attempt_timeout(Duration::from_secs(30), now), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_deadline_shrinks_attempt_timeout() {
        let start = Instant::now();
        let deadline = Deadline::after(start, Some(Duration::from_secs(10)));

        assert_eq!(deadline.attempt_timeout(Duration::from_secs(3), start), Some(Duration::from_secs(3)));
        assert_eq!(
            deadline.attempt_timeout(Duration::from_secs(3), start + Duration::from_secs(8)),
            Some(Duration::from_secs(2))
        );
        assert_eq!(deadline.attempt_timeout(Duration::from_secs(3), start + Duration::from_secs(10)), None);
        assert_eq!(deadline.attempt_timeout(Duration::from_secs(3), start + Duration::from_secs(11)), None);
    }

    #[test]
    fn test_unrepresentable_budget_is_unbounded() {
        let now = Instant::now();
        let deadline = Deadline::after(now, Some(Duration::MAX));

        assert_eq!(deadline, Deadline::none());
        assert_eq!(deadline.remaining(now), None);
        assert_eq!(deadline.attempt_timeout(Duration::from_secs(30), now), Some(Duration::from_secs(30)));
    }
}
