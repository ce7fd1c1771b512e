//! The transport: one logical request across the cluster.
//!
//! # Responsibilities
//! - Trigger startup, interval and fault sniffs
//! - Select nodes, probing dead ones when the strategy asks for it
//! - Run the bounded retry loop under per-attempt timeouts and a deadline
//! - Report every phase through diagnostics, logs and metrics

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::http::header::{CONTENT_TYPE, USER_AGENT};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use tokio::time;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::loader::load_config;
use crate::config::validation::validate_config;
use crate::config::{ResurrectStrategy, TransportConfig};
use crate::connection::{build_connection, ConnectionOptions, ConnectionRequest, ConnectionResponse, ProxySettings};
use crate::diagnostics::{
    DiagnosticEvent, Diagnostics, PhaseMeta, RequestMeta, ResponseMeta, ResurrectMeta, SniffMeta,
};
use crate::error::{ConnectionErrorKind, TransportError, TransportResult};
use crate::health::{ping, Admission};
use crate::observability::metrics;
use crate::pool::{ConnectionFactory, ConnectionPool, GetConnectionOptions, Lease, Node, NodeFilter, NodeId, PoolOptions};
use crate::resilience::retries::{RetryPolicy, Verdict};
use crate::resilience::timeouts::Deadline;
use crate::sniffer::{parse_nodes, SniffReason, Sniffer};
use crate::transport::request::{RequestBody, RequestOptions, RequestParams};
use crate::transport::response::{ExchangeMeta, TransportResponse};
use crate::transport::serializer::{JsonSerializer, Serializer};

const DEFAULT_USER_AGENT: &str = concat!("cluster-transport/", env!("CARGO_PKG_VERSION"), " (rust)");

/// Result of a sniff call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SniffOutcome {
    /// Another sniff was already running, or the transport is closed.
    Skipped,
    /// The pool now holds this many nodes.
    Updated(usize),
    /// Discovery failed; membership unchanged.
    Failed,
}

/// Builds a [`Transport`] from configuration plus injected collaborators.
pub struct TransportBuilder {
    config: TransportConfig,
    clock: Arc<dyn Clock>,
    node_filter: Option<NodeFilter>,
    connection_factory: Option<ConnectionFactory>,
    serializer: Arc<dyn Serializer>,
    diagnostics: Option<Arc<Diagnostics>>,
}

impl TransportBuilder {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            node_filter: None,
            connection_factory: None,
            serializer: Arc::new(JsonSerializer),
            diagnostics: None,
        }
    }

    /// Time source for resurrection and sniff scheduling.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the default filter, which skips master-only nodes.
    pub fn node_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Node) -> bool + Send + Sync + 'static,
    {
        self.node_filter = Some(Arc::new(filter));
        self
    }

    /// Replace how connections are built for nodes.
    pub fn connection_factory(mut self, factory: ConnectionFactory) -> Self {
        self.connection_factory = Some(factory);
        self
    }

    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Share a diagnostics bus instead of creating one.
    pub fn diagnostics(mut self, diagnostics: Arc<Diagnostics>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn build(self) -> TransportResult<Transport> {
        let config = self.config;
        validate_config(&config).map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
            TransportError::Configuration(messages.join("; "))
        })?;

        let factory: ConnectionFactory = match self.connection_factory {
            Some(factory) => factory,
            None => {
                let options = ConnectionOptions {
                    kind: config.connection,
                    proxy: config.proxy.as_ref().map(ProxySettings::from_config).transpose()?,
                    tls: config.tls.clone(),
                };
                Arc::new(move |node: &Node| build_connection(node, &options))
            }
        };

        let mut pool_options = PoolOptions::new(factory);
        pool_options.resurrect_strategy = config.resurrect_strategy;
        pool_options.resurrect_timeout = config.resurrect_timeout();
        pool_options.resurrect_max_timeout = config.resurrect_max_timeout();
        pool_options.selector = config.node_selector;
        pool_options.clock = Arc::clone(&self.clock);
        if let Some(filter) = self.node_filter {
            pool_options.node_filter = filter;
        }

        let pool = ConnectionPool::new(pool_options);
        for node in &config.nodes {
            pool.add_connection(Node::from_config(node)?)?;
        }

        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Configuration(format!("Invalid header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::Configuration(format!("Invalid value for header '{}': {}", name, e)))?;
            default_headers.insert(name, value);
        }

        let sniffer = Sniffer::new(
            config.sniff_endpoint.clone(),
            config.sniff_interval(),
            config.sniff_on_start,
            self.clock.now(),
        );

        tracing::info!(
            name = %config.name,
            nodes = pool.len(),
            max_retries = config.max_retries,
            resurrect_strategy = %config.resurrect_strategy,
            sniff_on_start = config.sniff_on_start,
            "Transport created"
        );

        Ok(Transport {
            inner: Arc::new(TransportInner {
                name: config.name.clone(),
                retry: RetryPolicy::new(config.max_retries, config.retry_on_status.clone(), config.retry_backoff.clone()),
                request_timeout: config.request_timeout(),
                ping_timeout: config.ping_timeout(),
                sniff_on_connection_fault: config.sniff_on_connection_fault,
                pool,
                diagnostics: self.diagnostics.unwrap_or_default(),
                sniffer,
                clock: self.clock,
                serializer: self.serializer,
                default_headers,
                closed: AtomicBool::new(false),
            }),
        })
    }
}

struct TransportInner {
    name: String,
    pool: ConnectionPool,
    diagnostics: Arc<Diagnostics>,
    sniffer: Sniffer,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    serializer: Arc<dyn Serializer>,
    request_timeout: Duration,
    ping_timeout: Duration,
    sniff_on_connection_fault: bool,
    default_headers: HeaderMap,
    closed: AtomicBool,
}

/// Cluster-aware HTTP transport. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("name", &self.inner.name)
            .field("pool", &self.inner.pool)
            .finish()
    }
}

impl Transport {
    pub fn builder(config: TransportConfig) -> TransportBuilder {
        TransportBuilder::new(config)
    }

    pub fn from_config(config: TransportConfig) -> TransportResult<Self> {
        TransportBuilder::new(config).build()
    }

    /// Build from a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> TransportResult<Self> {
        let config = load_config(path.as_ref())?;
        Self::from_config(config)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.inner.pool
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.inner.diagnostics
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Close the pool. Later requests fail with a configuration error.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.pool.close();
            tracing::info!(name = %self.inner.name, "Transport closed");
        }
    }

    /// Perform one logical request.
    pub async fn request(&self, params: RequestParams, options: RequestOptions) -> TransportResult<TransportResponse> {
        if self.is_closed() {
            return Err(TransportError::Configuration("The transport is closed".to_string()));
        }
        let start = Instant::now();
        let method = params.method.to_string();

        if self.inner.sniffer.take_start_pending() {
            self.sniff(SniffReason::OnStart).await;
        }
        self.check_interval_sniff();

        let result = self.run(params, options, false).await;

        let label = match &result {
            Ok(_) => "success",
            Err(TransportError::Aborted) => "aborted",
            Err(_) => "failure",
        };
        metrics::record_request(&method, label, start);

        if self.inner.sniff_on_connection_fault
            && matches!(
                result,
                Err(TransportError::MaxRetriesExceeded { .. } | TransportError::NoLivingConnections { .. })
            )
        {
            self.spawn_sniff(SniffReason::OnConnectionFault);
        }
        result
    }

    /// Discover the cluster topology and update the pool. At most one sniff
    /// runs at a time; overlapping calls return `Skipped`.
    pub async fn sniff(&self, reason: SniffReason) -> SniffOutcome {
        let inner = &self.inner;
        let Some(_guard) = inner.sniffer.try_begin() else {
            tracing::debug!(reason = %reason, "Sniff already in progress");
            return SniffOutcome::Skipped;
        };
        if self.is_closed() {
            return SniffOutcome::Skipped;
        }
        inner.sniffer.reschedule(inner.clock.now());
        tracing::debug!(reason = %reason, endpoint = inner.sniffer.endpoint(), "Sniffing");

        let params = RequestParams::get(inner.sniffer.endpoint());
        let options = RequestOptions::default().with_max_retries(0);
        let discovered = match self.run(params, options, true).await {
            Ok(response) => {
                let node = response.meta.node;
                parse_nodes(&response.body, node.url.scheme())
                    .and_then(|nodes| {
                        let hosts: Vec<String> = nodes.iter().map(|n| n.url.to_string()).collect();
                        inner.pool.update(nodes)?;
                        Ok(hosts)
                    })
                    .map(|hosts| (node, hosts))
            }
            Err(err) => Err(err),
        };

        match discovered {
            Ok((node, hosts)) => {
                inner.sniffer.reschedule(inner.clock.now());
                tracing::info!(reason = %reason, node = %node, discovered = hosts.len(), "Sniff completed");
                metrics::record_sniff(reason.as_str(), true);
                inner.diagnostics.emit(&DiagnosticEvent::Sniff {
                    error: None,
                    meta: SniffMeta {
                        reason,
                        node: Some(node.to_string()),
                        hosts,
                    },
                });
                SniffOutcome::Updated(inner.pool.len())
            }
            Err(err) => {
                tracing::warn!(reason = %reason, error = %err, "Sniff failed");
                metrics::record_sniff(reason.as_str(), false);
                inner.diagnostics.emit(&DiagnosticEvent::Sniff {
                    error: Some(err),
                    meta: SniffMeta {
                        reason,
                        node: None,
                        hosts: Vec::new(),
                    },
                });
                SniffOutcome::Failed
            }
        }
    }

    fn check_interval_sniff(&self) {
        let now = self.inner.clock.now();
        if self.inner.sniffer.is_due(now) && !self.inner.sniffer.is_sniffing() {
            self.inner.sniffer.reschedule(now);
            self.spawn_sniff(SniffReason::Interval);
        }
    }

    fn spawn_sniff(&self, reason: SniffReason) {
        if self.inner.sniffer.is_sniffing() {
            return;
        }
        let transport = self.clone();
        tokio::spawn(async move {
            transport.sniff(reason).await;
        });
    }

    /// The retry loop. `internal` marks the transport's own requests, which
    /// skip body decoding.
    async fn run(
        &self,
        params: RequestParams,
        options: RequestOptions,
        internal: bool,
    ) -> TransportResult<TransportResponse> {
        let inner = &self.inner;
        let request_id = options.request_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        let abort = options.abort.clone().unwrap_or_default();
        let deadline = Deadline::after(Instant::now(), options.deadline);
        let per_attempt = options.request_timeout.unwrap_or(inner.request_timeout);
        let max_attempts = RetryPolicy::max_attempts(options.max_retries.unwrap_or(inner.retry.max_retries()));

        let query = params.query_string();
        let mut headers = inner.default_headers.clone();
        for (name, value) in params.headers.iter().chain(options.headers.iter()) {
            headers.insert(name.clone(), value.clone());
        }

        let body = match params.body {
            RequestBody::Empty => None,
            RequestBody::Bytes(bytes) => Some(bytes),
            RequestBody::Json(value) => {
                let bytes = self.serialize(&value, &request_id)?;
                if !headers.contains_key(CONTENT_TYPE) {
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static(inner.serializer.content_type()));
                }
                Some(bytes)
            }
        };

        let mut tried: Vec<NodeId> = Vec::new();
        let mut last_error: Option<TransportError> = None;
        let mut attempt: u32 = 0;

        while attempt < max_attempts {
            if abort.is_cancelled() {
                return Err(TransportError::Aborted);
            }

            if attempt > 0 {
                if let Some(delay) = inner.retry.delay_before(attempt + 1) {
                    let delay = deadline.remaining(Instant::now()).map_or(delay, |left| delay.min(left));
                    tokio::select! {
                        _ = abort.cancelled() => return Err(TransportError::Aborted),
                        _ = time::sleep(delay) => {}
                    }
                }
            }

            let Some(timeout) = deadline.attempt_timeout(per_attempt, Instant::now()) else {
                tracing::warn!(request_id = %request_id, attempts = attempt, "Request deadline exceeded");
                return Err(TransportError::DeadlineExceeded {
                    last_error: last_error.map(Box::new),
                });
            };

            let lease = match self.acquire(&tried, &abort, &deadline, &request_id).await {
                Ok(lease) => lease,
                Err(TransportError::NoLivingConnections { .. }) => {
                    tracing::warn!(request_id = %request_id, attempts = attempt, "No living connections");
                    return Err(TransportError::NoLivingConnections {
                        last_error: last_error.map(Box::new),
                    });
                }
                Err(TransportError::DeadlineExceeded { .. }) => {
                    tracing::warn!(request_id = %request_id, attempts = attempt, "Request deadline exceeded while pinging");
                    return Err(TransportError::DeadlineExceeded {
                        last_error: last_error.map(Box::new),
                    });
                }
                Err(err) => return Err(err),
            };

            attempt += 1;
            let node_label = lease.node().to_string();
            tracing::debug!(
                request_id = %request_id,
                node = %node_label,
                attempt,
                method = %params.method,
                path = %params.path,
                "Sending request"
            );
            inner.diagnostics.emit(&DiagnosticEvent::Request {
                error: None,
                meta: RequestMeta {
                    request_id: request_id.clone(),
                    method: params.method.to_string(),
                    path: params.path.clone(),
                    node: Some(node_label.clone()),
                    attempt,
                },
            });

            let exchange = ConnectionRequest {
                method: params.method.clone(),
                path: params.path.clone(),
                query: query.clone(),
                headers: headers.clone(),
                body: body.clone(),
                timeout,
            };

            let started = Instant::now();
            let outcome: TransportResult<ConnectionResponse> = tokio::select! {
                biased;
                _ = abort.cancelled() => Err(TransportError::Aborted),
                result = time::timeout(timeout, lease.connection().request(exchange)) => match result {
                    Ok(Ok(response)) => Ok(response),
                    Ok(Err(err)) if err.kind == ConnectionErrorKind::Timeout => Err(TransportError::Timeout(timeout)),
                    Ok(Err(err)) => Err(TransportError::Connection(err)),
                    Err(_) => Err(TransportError::Timeout(timeout)),
                },
            };
            let elapsed = started.elapsed();

            let (verdict, error, status) = match &outcome {
                Ok(response) => {
                    let status = response.status.as_u16();
                    let verdict = inner.retry.classify_status(status, &options.ignore);
                    let error = (verdict != Verdict::Success).then(|| TransportError::Response {
                        status,
                        body: String::from_utf8_lossy(&response.body).into_owned(),
                    });
                    (verdict, error, Some(status))
                }
                Err(err) => (inner.retry.classify_error(err), Some(err.clone()), None),
            };

            metrics::record_attempt(&node_label, verdict == Verdict::Success);
            inner.diagnostics.emit(&DiagnosticEvent::Response {
                error: error.clone(),
                meta: ResponseMeta {
                    request_id: request_id.clone(),
                    node: Some(node_label.clone()),
                    attempt,
                    status,
                    duration: elapsed,
                },
            });

            match (verdict, outcome) {
                (Verdict::Success, Ok(response)) => {
                    self.resolve_alive(&lease, &request_id);
                    return self.finish(response, &lease, attempt, request_id, &params.method, internal);
                }
                (Verdict::Retry, outcome) => {
                    let error = match outcome {
                        Ok(response) => TransportError::Response {
                            status: response.status.as_u16(),
                            body: String::from_utf8_lossy(&response.body).into_owned(),
                        },
                        Err(err) => err,
                    };
                    tracing::warn!(
                        request_id = %request_id,
                        node = %node_label,
                        attempt,
                        error = %error,
                        "Attempt failed, retrying on another node"
                    );
                    self.resolve_dead(&lease, &error, &request_id);
                    tried.push(lease.id().clone());
                    last_error = Some(error);
                }
                (_, Ok(response)) => {
                    // The node answered, so a dead node on trial is reachable
                    if lease.admission() != Admission::Alive {
                        self.resolve_alive(&lease, &request_id);
                    }
                    return Err(TransportError::Response {
                        status: response.status.as_u16(),
                        body: String::from_utf8_lossy(&response.body).into_owned(),
                    });
                }
                (_, Err(err)) => {
                    tracing::debug!(request_id = %request_id, node = %node_label, error = %err, "Request failed");
                    return Err(err);
                }
            }
        }

        let source = last_error.unwrap_or(TransportError::NoLivingConnections { last_error: None });
        tracing::warn!(request_id = %request_id, attempts = attempt, error = %source, "Retries exhausted");
        Err(TransportError::MaxRetriesExceeded {
            attempts: attempt,
            source: Box::new(source),
        })
    }

    /// Get a lease, pinging dead nodes first when the strategy asks for it.
    ///
    /// Pings race `abort` and are bounded by `deadline`. A ping cut short
    /// that way leaves the node's health untouched.
    async fn acquire(
        &self,
        tried: &[NodeId],
        abort: &CancellationToken,
        deadline: &Deadline,
        request_id: &str,
    ) -> TransportResult<Lease> {
        let pool = &self.inner.pool;
        let mut probed: Vec<NodeId> = Vec::new();
        loop {
            let exclude: Vec<NodeId> = tried.iter().chain(probed.iter()).cloned().collect();
            let lease = match pool.get_connection(&GetConnectionOptions::excluding(exclude)) {
                Ok(lease) => lease,
                // Tried nodes are only excluded while something else is left
                Err(TransportError::NoLivingConnections { .. }) if !tried.is_empty() => {
                    pool.get_connection(&GetConnectionOptions::excluding(probed.clone()))?
                }
                Err(err) => return Err(err),
            };
            if lease.admission() != Admission::Probe {
                return Ok(lease);
            }

            let Some(ping_timeout) = deadline.attempt_timeout(self.inner.ping_timeout, Instant::now()) else {
                return Err(TransportError::DeadlineExceeded { last_error: None });
            };
            let pinged = tokio::select! {
                biased;
                _ = abort.cancelled() => return Err(TransportError::Aborted),
                result = ping(lease.connection().as_ref(), ping_timeout) => result,
            };
            if pinged.is_err() && deadline.attempt_timeout(self.inner.ping_timeout, Instant::now()).is_none() {
                return Err(TransportError::DeadlineExceeded { last_error: None });
            }

            match pinged {
                Ok(()) => {
                    pool.mark_alive(lease.id());
                    self.emit_resurrect(&lease, ResurrectStrategy::Ping, None, request_id);
                    return Ok(lease);
                }
                Err(err) => {
                    pool.mark_dead(lease.id());
                    self.emit_resurrect(&lease, ResurrectStrategy::Ping, Some(err.into()), request_id);
                    probed.push(lease.id().clone());
                }
            }
        }
    }

    fn resolve_alive(&self, lease: &Lease, request_id: &str) {
        let was_dead = self.inner.pool.mark_alive(lease.id());
        if was_dead && lease.admission() == Admission::Trial {
            self.emit_resurrect(lease, ResurrectStrategy::Optimistic, None, request_id);
        }
    }

    fn resolve_dead(&self, lease: &Lease, error: &TransportError, request_id: &str) {
        self.inner.pool.mark_dead(lease.id());
        if lease.admission() == Admission::Trial {
            self.emit_resurrect(lease, ResurrectStrategy::Optimistic, Some(error.clone()), request_id);
        }
    }

    fn emit_resurrect(&self, lease: &Lease, strategy: ResurrectStrategy, error: Option<TransportError>, request_id: &str) {
        let is_alive = error.is_none();
        tracing::info!(
            request_id = %request_id,
            node = %lease.node(),
            strategy = %strategy,
            is_alive,
            "Resurrection attempt"
        );
        metrics::record_resurrection(strategy.as_str(), is_alive);
        self.inner.diagnostics.emit(&DiagnosticEvent::Resurrect {
            error,
            meta: ResurrectMeta {
                node: lease.node().to_string(),
                strategy,
                is_alive,
                request_id: Some(request_id.to_string()),
            },
        });
    }

    fn serialize(&self, value: &serde_json::Value, request_id: &str) -> TransportResult<Bytes> {
        let result = self.inner.serializer.serialize(value);
        self.inner.diagnostics.emit(&DiagnosticEvent::Serialization {
            error: result.as_ref().err().cloned(),
            meta: PhaseMeta {
                request_id: request_id.to_string(),
                bytes: result.as_ref().ok().map(Bytes::len),
            },
        });
        result
    }

    fn finish(
        &self,
        response: ConnectionResponse,
        lease: &Lease,
        attempts: u32,
        request_id: String,
        method: &Method,
        internal: bool,
    ) -> TransportResult<TransportResponse> {
        let decodable = !internal
            && method != Method::HEAD
            && !response.body.is_empty()
            && response
                .headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|ct| ct.starts_with(self.inner.serializer.content_type()));

        let json = if decodable {
            let result = self.inner.serializer.deserialize(&response.body);
            self.inner.diagnostics.emit(&DiagnosticEvent::Deserialization {
                error: result.as_ref().err().cloned(),
                meta: PhaseMeta {
                    request_id: request_id.clone(),
                    bytes: Some(response.body.len()),
                },
            });
            Some(result?)
        } else {
            None
        };

        Ok(TransportResponse {
            status: response.status,
            headers: response.headers,
            body: response.body,
            json,
            meta: ExchangeMeta {
                request_id,
                node: lease.node().clone(),
                attempts,
            },
        })
    }
}
