//! Topology discovery ("sniffing").
//!
//! # Data Flow
//! ```text
//! Trigger (on start / interval / connection fault)
//!     → Sniffer::try_begin (at most one sniff in flight)
//!     → Transport sends GET sniff_endpoint to one node, single attempt
//!     → discovery.rs parses the node list
//!     → ConnectionPool::update
//!     → sniff diagnostic (success or swallowed failure)
//! ```
//!
//! # Design Decisions
//! - Overlapping triggers return immediately instead of queueing
//! - Sniff failures never reach the caller; the pool keeps its membership
//! - Interval scheduling is evaluated against the injected clock

pub mod discovery;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub use discovery::parse_nodes;

/// What started a sniff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SniffReason {
    OnStart,
    Interval,
    OnConnectionFault,
    /// Requested explicitly by the caller.
    Manual,
}

impl SniffReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnStart => "sniff-on-start",
            Self::Interval => "sniff-interval",
            Self::OnConnectionFault => "sniff-on-connection-fault",
            Self::Manual => "sniff-manual",
        }
    }
}

impl fmt::Display for SniffReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sniff scheduling and coalescing state of one transport.
#[derive(Debug)]
pub struct Sniffer {
    endpoint: String,
    interval: Option<Duration>,
    next_due: Mutex<Option<Instant>>,
    start_pending: AtomicBool,
    in_flight: AtomicBool,
}

impl Sniffer {
    pub fn new(endpoint: impl Into<String>, interval: Option<Duration>, sniff_on_start: bool, now: Instant) -> Self {
        Self {
            endpoint: endpoint.into(),
            interval,
            next_due: Mutex::new(interval.map(|i| now + i)),
            start_pending: AtomicBool::new(sniff_on_start),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// True exactly once if a startup sniff was requested.
    pub fn take_start_pending(&self) -> bool {
        self.start_pending.swap(false, Ordering::AcqRel)
    }

    /// Whether the interval sniff is due at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        let next = self.next_due.lock().expect("sniffer mutex poisoned");
        next.is_some_and(|at| now >= at)
    }

    /// Push the next interval sniff to `now + interval`.
    pub fn reschedule(&self, now: Instant) {
        if let Some(interval) = self.interval {
            *self.next_due.lock().expect("sniffer mutex poisoned") = Some(now + interval);
        }
    }

    /// Claim the single sniff slot. `None` while another sniff runs.
    pub fn try_begin(&self) -> Option<SniffGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SniffGuard { flag: &self.in_flight })
    }

    pub fn is_sniffing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Releases the sniff slot on drop.
#[derive(Debug)]
pub struct SniffGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for SniffGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coalescing() {
        let sniffer = Sniffer::new("/_nodes/_all/http", None, false, Instant::now());
        let guard = sniffer.try_begin().unwrap();
        assert!(sniffer.is_sniffing());
        assert!(sniffer.try_begin().is_none());
        drop(guard);
        assert!(!sniffer.is_sniffing());
        assert!(sniffer.try_begin().is_some());
    }

    #[test]
    fn test_start_pending_taken_once() {
        let sniffer = Sniffer::new("/_nodes/_all/http", None, true, Instant::now());
        assert!(sniffer.take_start_pending());
        assert!(!sniffer.take_start_pending());
    }

    #[test]
    fn test_interval_schedule() {
        let start = Instant::now();
        let sniffer = Sniffer::new("/_nodes/_all/http", Some(Duration::from_secs(10)), false, start);
        assert!(!sniffer.is_due(start));
        assert!(sniffer.is_due(start + Duration::from_secs(10)));

        sniffer.reschedule(start + Duration::from_secs(10));
        assert!(!sniffer.is_due(start + Duration::from_secs(15)));
        assert!(sniffer.is_due(start + Duration::from_secs(20)));

        let disabled = Sniffer::new("/_nodes/_all/http", None, false, start);
        assert!(!disabled.is_due(start + Duration::from_secs(3600)));
    }

    #[test]
    fn test_reason_names() {
        assert_eq!(SniffReason::OnStart.to_string(), "sniff-on-start");
        assert_eq!(SniffReason::Interval.as_str(), "sniff-interval");
        assert_eq!(SniffReason::OnConnectionFault.as_str(), "sniff-on-connection-fault");
    }
}
