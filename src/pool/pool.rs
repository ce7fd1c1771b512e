//! Connection pool.
//!
//! # Responsibilities
//! - Own the deduplicated node set and one connection per node
//! - Track per-node health and resurrection timers
//! - Hand out connections according to the selector and resurrection policy
//! - Reconcile membership against sniff results

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::config::{NodeSelectorKind, ResurrectStrategy};
use crate::connection::Connection;
use crate::error::{TransportError, TransportResult};
use crate::health::{Admission, NodeHealth};
use crate::observability::metrics;
use crate::pool::node::{default_node_filter, Node, NodeId};
use crate::pool::random::Random;
use crate::pool::round_robin::RoundRobin;
use crate::pool::NodeSelector;

/// Predicate deciding whether a node may serve requests.
pub type NodeFilter = Arc<dyn Fn(&Node) -> bool + Send + Sync>;

/// Builds the connection for a node.
pub type ConnectionFactory = Arc<dyn Fn(&Node) -> TransportResult<Arc<dyn Connection>> + Send + Sync>;

/// Pool construction options.
#[derive(Clone)]
pub struct PoolOptions {
    pub resurrect_strategy: ResurrectStrategy,
    pub resurrect_timeout: Duration,
    pub resurrect_max_timeout: Duration,
    pub selector: NodeSelectorKind,
    pub node_filter: NodeFilter,
    pub clock: Arc<dyn Clock>,
    pub factory: ConnectionFactory,
}

impl PoolOptions {
    pub fn new(factory: ConnectionFactory) -> Self {
        Self {
            resurrect_strategy: ResurrectStrategy::default(),
            resurrect_timeout: Duration::from_secs(60),
            resurrect_max_timeout: Duration::from_millis(1_920_000),
            selector: NodeSelectorKind::default(),
            node_filter: Arc::new(default_node_filter),
            clock: Arc::new(SystemClock),
            factory,
        }
    }
}

impl fmt::Debug for PoolOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolOptions")
            .field("resurrect_strategy", &self.resurrect_strategy)
            .field("resurrect_timeout", &self.resurrect_timeout)
            .field("resurrect_max_timeout", &self.resurrect_max_timeout)
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}

/// Selection constraints for one `get_connection` call.
#[derive(Debug, Clone, Default)]
pub struct GetConnectionOptions {
    /// Identities that must not be returned.
    pub exclude: Vec<NodeId>,
}

impl GetConnectionOptions {
    pub fn excluding(exclude: Vec<NodeId>) -> Self {
        Self { exclude }
    }
}

struct PoolEntry {
    node: Node,
    id: NodeId,
    connection: Arc<dyn Connection>,
    health: NodeHealth,
}

#[derive(Default)]
struct PoolState {
    entries: Vec<PoolEntry>,
    closed: bool,
}

impl PoolState {
    fn position(&self, id: &NodeId) -> Option<usize> {
        self.entries.iter().position(|e| &e.id == id)
    }
}

struct PoolInner {
    state: Mutex<PoolState>,
    selector: Box<dyn NodeSelector>,
    options: PoolOptions,
}

/// The node set of one transport. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("nodes", &self.len())
            .field("options", &self.inner.options)
            .finish()
    }
}

impl ConnectionPool {
    pub fn new(options: PoolOptions) -> Self {
        let selector: Box<dyn NodeSelector> = match options.selector {
            NodeSelectorKind::RoundRobin => Box::new(RoundRobin::new()),
            NodeSelectorKind::Random => Box::new(Random),
        };
        Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState::default()),
                selector,
                options,
            }),
        }
    }

    /// Node filters run under this lock. Poisoning is recovered: state is
    /// only mutated after every filter call has returned.
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn resurrect_strategy(&self) -> ResurrectStrategy {
        self.inner.options.resurrect_strategy
    }

    /// Insert a node, or replace the metadata and connection of the node
    /// with the same identity. Health of a replaced node is kept.
    pub fn add_connection(&self, node: Node) -> TransportResult<NodeId> {
        let connection = (self.inner.options.factory)(&node)?;
        let id = node.identity();

        let mut state = self.lock();
        if state.closed {
            return Err(TransportError::Configuration("The connection pool is closed".to_string()));
        }
        match state.position(&id) {
            Some(idx) => {
                let entry = &mut state.entries[idx];
                entry.connection.close();
                entry.node = node;
                entry.connection = connection;
                tracing::debug!(node = %id, "Node replaced");
            }
            None => {
                state.entries.push(PoolEntry {
                    node,
                    id: id.clone(),
                    connection,
                    health: NodeHealth::alive(),
                });
                tracing::debug!(node = %id, "Node added");
                metrics::record_node_health(id.as_str(), true);
            }
        }
        Ok(id)
    }

    /// Remove a node. Returns false if it was not present.
    pub fn remove_connection(&self, id: &NodeId) -> bool {
        let mut state = self.lock();
        match state.position(id) {
            Some(idx) => {
                let entry = state.entries.remove(idx);
                entry.connection.close();
                tracing::debug!(node = %id, "Node removed");
                true
            }
            None => false,
        }
    }

    /// Pick a connection.
    ///
    /// Dead nodes past their resurrection instant are handed out first,
    /// earliest instant first, as a probe or trial depending on the
    /// strategy. Otherwise the selector picks among alive nodes.
    pub fn get_connection(&self, options: &GetConnectionOptions) -> TransportResult<Lease> {
        let now = self.inner.options.clock.now();
        let filter = &self.inner.options.node_filter;
        let mut state = self.lock();

        let selectable =
            |entry: &PoolEntry| !options.exclude.contains(&entry.id) && filter(&entry.node);

        if let Some(admission) = self.inner.options.resurrect_strategy.admission() {
            let eligible = state
                .entries
                .iter()
                .enumerate()
                .filter(|(_, e)| selectable(e) && e.health.is_eligible(now))
                .min_by_key(|(_, e)| e.health.resurrect_at())
                .map(|(idx, _)| idx);

            if let Some(idx) = eligible {
                let entry = &mut state.entries[idx];
                entry.health.begin_trial();
                tracing::debug!(node = %entry.id, admission = admission.as_str(), "Dead node handed out");
                return Ok(self.lease(entry, admission));
            }
        }

        let candidates: Vec<usize> = state
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| selectable(e) && e.health.is_alive())
            .map(|(idx, _)| idx)
            .collect();

        match self.inner.selector.select(&candidates) {
            Some(idx) => Ok(self.lease(&state.entries[idx], Admission::Alive)),
            None => {
                tracing::debug!(
                    nodes = state.entries.len(),
                    excluded = options.exclude.len(),
                    "No living connections"
                );
                Err(TransportError::NoLivingConnections { last_error: None })
            }
        }
    }

    fn lease(&self, entry: &PoolEntry, admission: Admission) -> Lease {
        Lease {
            node: entry.node.clone(),
            id: entry.id.clone(),
            connection: Arc::clone(&entry.connection),
            admission,
            pool: Arc::downgrade(&self.inner),
        }
    }

    /// Record a failure. Returns the resurrection delay, or `None` if the
    /// node is no longer in the pool.
    pub fn mark_dead(&self, id: &NodeId) -> Option<Duration> {
        let now = self.inner.options.clock.now();
        let options = &self.inner.options;
        let mut state = self.lock();
        let idx = state.position(id)?;
        let health = &mut state.entries[idx].health;
        let delay = health.mark_dead(now, options.resurrect_timeout, options.resurrect_max_timeout);

        tracing::warn!(
            node = %id,
            dead_count = health.dead_count(),
            resurrect_in_ms = delay.as_millis() as u64,
            "Node marked dead"
        );
        metrics::record_node_health(id.as_str(), false);
        Some(delay)
    }

    /// Record a success. Returns true if the node was dead.
    pub fn mark_alive(&self, id: &NodeId) -> bool {
        let mut state = self.lock();
        let Some(idx) = state.position(id) else {
            return false;
        };
        let was_dead = state.entries[idx].health.mark_alive();
        if was_dead {
            tracing::info!(node = %id, "Node marked alive");
            metrics::record_node_health(id.as_str(), true);
        }
        was_dead
    }

    /// Reconcile membership with a discovered node list. New nodes join
    /// alive, missing nodes leave, surviving nodes keep their health and
    /// take the fresh metadata.
    pub fn update(&self, fresh: Vec<Node>) -> TransportResult<()> {
        // Connections are built outside the lock
        let mut seen = HashSet::new();
        let mut incoming = Vec::with_capacity(fresh.len());
        for node in fresh {
            let id = node.identity();
            if !seen.insert(id.clone()) {
                continue;
            }
            let needs_connection = {
                let state = self.lock();
                state
                    .position(&id)
                    .map_or(true, |idx| state.entries[idx].node.url != node.url)
            };
            let connection = if needs_connection {
                Some((self.inner.options.factory)(&node)?)
            } else {
                None
            };
            incoming.push((id, node, connection));
        }

        let mut state = self.lock();
        if state.closed {
            return Ok(());
        }

        let mut previous: Vec<PoolEntry> = std::mem::take(&mut state.entries);
        let mut added = 0usize;
        for (id, node, connection) in incoming {
            let existing = previous.iter().position(|e| e.id == id).map(|idx| previous.remove(idx));
            let entry = match (existing, connection) {
                (Some(mut entry), replacement) => {
                    if let Some(connection) = replacement {
                        entry.connection.close();
                        entry.connection = connection;
                    }
                    entry.node = node;
                    entry
                }
                (None, Some(connection)) => {
                    added += 1;
                    metrics::record_node_health(id.as_str(), true);
                    PoolEntry {
                        node,
                        id,
                        connection,
                        health: NodeHealth::alive(),
                    }
                }
                (None, None) => {
                    // Node vanished between the two locks; build it now
                    let connection = (self.inner.options.factory)(&node)?;
                    added += 1;
                    metrics::record_node_health(id.as_str(), true);
                    PoolEntry {
                        node,
                        id,
                        connection,
                        health: NodeHealth::alive(),
                    }
                }
            };
            state.entries.push(entry);
        }

        for stale in &previous {
            stale.connection.close();
        }
        tracing::info!(
            nodes = state.entries.len(),
            added,
            removed = previous.len(),
            "Pool updated"
        );
        Ok(())
    }

    /// Snapshot of the current nodes in pool order.
    pub fn nodes(&self) -> Vec<Node> {
        self.lock().entries.iter().map(|e| e.node.clone()).collect()
    }

    pub fn health(&self, id: &NodeId) -> Option<NodeHealth> {
        let state = self.lock();
        state.position(id).map(|idx| state.entries[idx].health.clone())
    }

    /// Connection of a node, regardless of its health.
    pub fn connection(&self, id: &NodeId) -> Option<Arc<dyn Connection>> {
        let state = self.lock();
        state.position(id).map(|idx| Arc::clone(&state.entries[idx].connection))
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Drop every node and refuse further additions.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        for entry in state.entries.drain(..) {
            entry.connection.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// A connection handed out by the pool.
///
/// A lease on a dead node keeps it out of selection until the lease is
/// resolved with `mark_alive`/`mark_dead` or dropped.
pub struct Lease {
    node: Node,
    id: NodeId,
    connection: Arc<dyn Connection>,
    admission: Admission,
    pool: Weak<PoolInner>,
}

impl Lease {
    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub fn admission(&self) -> Admission {
        self.admission
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("node", &self.id)
            .field("admission", &self.admission)
            .finish()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.admission == Admission::Alive {
            return;
        }
        let Some(pool) = self.pool.upgrade() else {
            return;
        };
        let mut state = pool.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(idx) = state.position(&self.id) {
            let health = &mut state.entries[idx].health;
            if !health.is_alive() {
                health.end_trial();
            }
        }
    }
}
