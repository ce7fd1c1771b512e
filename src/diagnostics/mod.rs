//! Diagnostics bus.
//!
//! # Data Flow
//! ```text
//! Transport / sniffer / resurrection
//!     → Diagnostics::emit(event)
//!         → snapshot listeners for event.kind() (once-listeners removed)
//!         → call each in registration order, panics isolated
//! ```
//!
//! # Design Decisions
//! - Closed set of six kinds; unknown names are rejected at subscription
//! - Emission is synchronous; nothing is buffered or persisted
//! - The table lock is released before any listener runs

pub mod events;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

pub use events::{DiagnosticEvent, DiagnosticKind, PhaseMeta, RequestMeta, ResponseMeta, ResurrectMeta, SniffMeta};

use crate::error::TransportResult;

/// Event callback.
pub type Listener = Arc<dyn Fn(&DiagnosticEvent) + Send + Sync>;

/// Handle returned on subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    once: bool,
    listener: Listener,
}

/// Typed publish/subscribe channel for lifecycle events.
#[derive(Default)]
pub struct Diagnostics {
    table: Mutex<[Vec<Registration>; 6]>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for kind in DiagnosticKind::ALL {
            map.entry(&kind.as_str(), &self.listener_count(kind));
        }
        map.finish()
    }
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, [Vec<Registration>; 6]> {
        self.table.lock().expect("diagnostics mutex poisoned")
    }

    fn register(&self, kind: DiagnosticKind, once: bool, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.table()[kind.index()].push(Registration { id, once, listener });
        id
    }

    pub fn on<F>(&self, kind: DiagnosticKind, listener: F) -> ListenerId
    where
        F: Fn(&DiagnosticEvent) + Send + Sync + 'static,
    {
        self.register(kind, false, Arc::new(listener))
    }

    /// Subscribe for the next event of `kind` only.
    pub fn once<F>(&self, kind: DiagnosticKind, listener: F) -> ListenerId
    where
        F: Fn(&DiagnosticEvent) + Send + Sync + 'static,
    {
        self.register(kind, true, Arc::new(listener))
    }

    /// Unsubscribe. Returns false if the listener was not registered.
    pub fn off(&self, kind: DiagnosticKind, id: ListenerId) -> bool {
        let mut table = self.table();
        let slot = &mut table[kind.index()];
        let before = slot.len();
        slot.retain(|r| r.id != id);
        slot.len() != before
    }

    pub fn on_named<F>(&self, name: &str, listener: F) -> TransportResult<ListenerId>
    where
        F: Fn(&DiagnosticEvent) + Send + Sync + 'static,
    {
        let kind: DiagnosticKind = name.parse()?;
        Ok(self.on(kind, listener))
    }

    pub fn once_named<F>(&self, name: &str, listener: F) -> TransportResult<ListenerId>
    where
        F: Fn(&DiagnosticEvent) + Send + Sync + 'static,
    {
        let kind: DiagnosticKind = name.parse()?;
        Ok(self.once(kind, listener))
    }

    pub fn off_named(&self, name: &str, id: ListenerId) -> TransportResult<bool> {
        let kind: DiagnosticKind = name.parse()?;
        Ok(self.off(kind, id))
    }

    pub fn listener_count(&self, kind: DiagnosticKind) -> usize {
        self.table()[kind.index()].len()
    }

    /// Deliver `event` to every listener of its kind.
    pub fn emit(&self, event: &DiagnosticEvent) {
        let kind = event.kind();
        let listeners: Vec<Listener> = {
            let mut table = self.table();
            let slot = &mut table[kind.index()];
            let snapshot = slot.iter().map(|r| Arc::clone(&r.listener)).collect();
            slot.retain(|r| !r.once);
            snapshot
        };

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::error!(event = kind.as_str(), "Diagnostic listener panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use std::sync::atomic::AtomicUsize;

    fn sniff_event() -> DiagnosticEvent {
        DiagnosticEvent::Sniff {
            error: None,
            meta: SniffMeta {
                reason: crate::sniffer::SniffReason::Interval,
                node: None,
                hosts: vec![],
            },
        }
    }

    #[test]
    fn test_on_and_off() {
        let diagnostics = Diagnostics::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let id = diagnostics.on(DiagnosticKind::Sniff, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        diagnostics.emit(&sniff_event());
        diagnostics.emit(&sniff_event());
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        assert!(diagnostics.off(DiagnosticKind::Sniff, id));
        assert!(!diagnostics.off(DiagnosticKind::Sniff, id));
        diagnostics.emit(&sniff_event());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_once_fires_once() {
        let diagnostics = Diagnostics::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        diagnostics.once(DiagnosticKind::Sniff, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        diagnostics.emit(&sniff_event());
        diagnostics.emit(&sniff_event());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(diagnostics.listener_count(DiagnosticKind::Sniff), 0);
    }

    #[test]
    fn test_unknown_name_registers_nothing() {
        let diagnostics = Diagnostics::new();
        let err = diagnostics.on_named("foobar", |_| {}).unwrap_err();
        assert!(matches!(err, TransportError::Configuration(ref m) if m == "The event 'foobar' is not supported."));
        assert!(diagnostics.once_named("foobar", |_| {}).is_err());
        for kind in DiagnosticKind::ALL {
            assert_eq!(diagnostics.listener_count(kind), 0);
        }

        let id = diagnostics.on_named("sniff", |_| {}).unwrap();
        assert!(diagnostics.off_named("foobar", id).is_err());
        assert!(diagnostics.off_named("sniff", id).unwrap());
        let id = diagnostics.on_named("serialize", |_| {}).unwrap();
        assert_eq!(diagnostics.listener_count(DiagnosticKind::Serialization), 1);
        assert!(diagnostics.off_named("serialization", id).unwrap());
        diagnostics.once_named("deserialize", |_| {}).unwrap();
        assert_eq!(diagnostics.listener_count(DiagnosticKind::Deserialization), 1);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let diagnostics = Diagnostics::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = Arc::clone(&order);
        diagnostics.on(DiagnosticKind::Sniff, move |_| o.lock().unwrap().push(1));
        diagnostics.on(DiagnosticKind::Sniff, |_| panic!("listener failure"));
        let o = Arc::clone(&order);
        diagnostics.on(DiagnosticKind::Sniff, move |_| o.lock().unwrap().push(3));

        diagnostics.emit(&sniff_event());
        assert_eq!(*order.lock().unwrap(), vec![1, 3]);
    }

    #[test]
    fn test_kinds_are_independent() {
        let diagnostics = Diagnostics::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        diagnostics.on(DiagnosticKind::Request, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        diagnostics.emit(&sniff_event());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
