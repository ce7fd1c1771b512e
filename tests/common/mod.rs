//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

use cluster_transport::error::{ConnectionError, ConnectionErrorKind};
use cluster_transport::pool::ConnectionFactory;
use cluster_transport::{Connection, ConnectionRequest, ConnectionResponse, DiagnosticEvent, Node};

/// What a scripted node does with a request.
#[derive(Debug, Clone)]
pub enum Reply {
    Status(u16),
    Json(u16, serde_json::Value),
    /// Raw body labelled as JSON.
    Body(u16, &'static str),
    Delayed(Duration, Box<Reply>),
    Fail(ConnectionErrorKind),
    /// Never answers; the attempt times out.
    Hang,
}

type Handler = Arc<dyn Fn(&ConnectionRequest) -> Reply + Send + Sync>;

/// A logged exchange: node host, method, path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub host: String,
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// In-memory cluster backing every connection a transport builds.
///
/// Nodes are keyed by URL host. Unknown hosts refuse connections.
#[derive(Default)]
pub struct MockCluster {
    handlers: Mutex<HashMap<String, Handler>>,
    calls: Mutex<Vec<Call>>,
    built: AtomicUsize,
}

impl MockCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Install a handler for every request to `host`.
    pub fn handle<F>(&self, host: &str, handler: F)
    where
        F: Fn(&ConnectionRequest) -> Reply + Send + Sync + 'static,
    {
        self.handlers.lock().unwrap().insert(host.to_string(), Arc::new(handler));
    }

    /// Same reply for every request to `host`.
    pub fn reply(&self, host: &str, reply: Reply) {
        self.handle(host, move |_| reply.clone());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Hosts contacted, in order, ignoring pings.
    pub fn hosts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.method != Method::HEAD)
            .map(|c| c.host)
            .collect()
    }

    pub fn pings(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == Method::HEAD)
            .map(|c| c.host)
            .collect()
    }

    pub fn connections_built(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }

    pub fn factory(self: &Arc<Self>) -> ConnectionFactory {
        let cluster = Arc::clone(self);
        Arc::new(move |node: &Node| {
            cluster.built.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MockConnection {
                host: node.url.host_str().unwrap_or_default().to_string(),
                cluster: Arc::clone(&cluster),
            }) as Arc<dyn Connection>)
        })
    }
}

#[derive(Debug)]
struct MockConnection {
    host: String,
    cluster: Arc<MockCluster>,
}

impl std::fmt::Debug for MockCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockCluster").finish_non_exhaustive()
    }
}

impl Connection for MockConnection {
    fn request(&self, request: ConnectionRequest) -> BoxFuture<'_, Result<ConnectionResponse, ConnectionError>> {
        Box::pin(async move {
            self.cluster.calls.lock().unwrap().push(Call {
                host: self.host.clone(),
                method: request.method.clone(),
                path: request.path.clone(),
                headers: request.headers.clone(),
                body: request.body.clone(),
            });
            let handler = self.cluster.handlers.lock().unwrap().get(&self.host).cloned();
            let Some(handler) = handler else {
                return Err(ConnectionError::refused(format!("{} is down", self.host)));
            };
            let mut reply = handler(&request);
            while let Reply::Delayed(delay, inner) = reply {
                tokio::time::sleep(delay).await;
                reply = *inner;
            }
            match reply {
                Reply::Delayed(..) => unreachable!(),
                Reply::Status(code) => Ok(ConnectionResponse {
                    status: StatusCode::from_u16(code).unwrap(),
                    headers: HeaderMap::new(),
                    body: Bytes::new(),
                }),
                Reply::Json(code, value) => {
                    let mut headers = HeaderMap::new();
                    headers.insert("content-type", HeaderValue::from_static("application/json"));
                    Ok(ConnectionResponse {
                        status: StatusCode::from_u16(code).unwrap(),
                        headers,
                        body: Bytes::from(serde_json::to_vec(&value).unwrap()),
                    })
                }
                Reply::Body(code, body) => {
                    let mut headers = HeaderMap::new();
                    headers.insert("content-type", HeaderValue::from_static("application/json"));
                    Ok(ConnectionResponse {
                        status: StatusCode::from_u16(code).unwrap(),
                        headers,
                        body: Bytes::from_static(body.as_bytes()),
                    })
                }
                Reply::Fail(kind) => Err(ConnectionError::new(kind, format!("{} failed", self.host))),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(ConnectionError::timeout(Duration::from_secs(3600)))
                }
            }
        })
    }
}

/// Collects diagnostic events for later assertions.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<DiagnosticEvent>>>,
}

impl EventLog {
    pub fn push(&self, event: &DiagnosticEvent) {
        self.events.lock().unwrap().push(event.clone());
    }

    pub fn all(&self) -> Vec<DiagnosticEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.all().iter().map(|e| e.kind().as_str()).collect()
    }
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Request head as seen on the wire.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
}

impl SeenRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// CA that signs the TLS mocks' certificate (`localhost`, `127.0.0.1`).
pub const TEST_CA: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/ca.pem");
const TEST_CERT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/node.pem");
const TEST_KEY: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/node.key.pem");

fn tls_acceptor() -> TlsAcceptor {
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(TEST_CERT).unwrap()))
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(TEST_KEY).unwrap()))
        .unwrap()
        .unwrap();
    let config = rustls::ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

type SeenLog = Arc<Mutex<Vec<SeenRequest>>>;

/// Accept forever, optionally terminating TLS, handing each stream to `serve`.
async fn listen<F, Fut>(tls: bool, serve: F) -> SocketAddr
where
    F: Fn(Box<dyn MockStream>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let acceptor = tls.then(tls_acceptor);
    let serve = Arc::new(serve);

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            let serve = Arc::clone(&serve);
            tokio::spawn(async move {
                let stream: Box<dyn MockStream> = match acceptor {
                    Some(acceptor) => match acceptor.accept(socket).await {
                        Ok(stream) => Box::new(stream),
                        Err(_) => return,
                    },
                    None => Box::new(socket),
                };
                (*serve)(stream).await;
            });
        }
    });
    addr
}

pub trait MockStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> MockStream for T {}

async fn read_head<S: AsyncRead + Unpin + ?Sized>(socket: &mut S) -> Option<(SeenRequest, Vec<u8>)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&buf[..end]).into_owned();
    let mut lines = head.split("\r\n").filter(|l| !l.is_empty());
    let request_line = lines.next()?.to_string();
    let headers = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
        .collect();
    Some((SeenRequest { request_line, headers }, buf))
}

async fn serve_hello(mut socket: Box<dyn MockStream>, log: SeenLog) {
    if let Some((request, _)) = read_head(&mut socket).await {
        log.lock().unwrap().push(request);
        let body = r#"{"hello":"world"}"#;
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;
    }
}

async fn serve_proxy(mut socket: Box<dyn MockStream>, expected_auth: Option<&'static str>, log: SeenLog) {
    let Some((request, buffered)) = read_head(&mut socket).await else {
        return;
    };
    log.lock().unwrap().push(request.clone());

    if let Some(expected) = expected_auth {
        if request.header("proxy-authorization") != Some(expected) {
            let _ = socket
                .write_all(
                    b"HTTP/1.1 407 Proxy Authentication Required\r\nProxy-Authenticate: Basic\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                )
                .await;
            let _ = socket.shutdown().await;
            return;
        }
    }

    let mut parts = request.request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    if method == "CONNECT" {
        let Ok(mut upstream) = TcpStream::connect(&target).await else {
            let _ = socket.write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n").await;
            return;
        };
        let _ = socket.write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n").await;
        let _ = tokio::io::copy_bidirectional(&mut socket, &mut upstream).await;
        return;
    }

    let Ok(url) = url::Url::parse(&target) else {
        let _ = socket.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
        return;
    };
    let upstream_addr = format!(
        "{}:{}",
        url.host_str().unwrap_or_default(),
        url.port_or_known_default().unwrap_or(80)
    );
    let Ok(mut upstream) = TcpStream::connect(upstream_addr).await else {
        let _ = socket.write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n").await;
        return;
    };
    let _ = upstream.write_all(&buffered).await;
    let _ = tokio::io::copy_bidirectional(&mut socket, &mut upstream).await;
}

async fn mock_node(tls: bool) -> (SocketAddr, SeenLog) {
    let seen: SeenLog = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let addr = listen(tls, move |socket| serve_hello(socket, Arc::clone(&log))).await;
    (addr, seen)
}

async fn mock_proxy(tls: bool, expected_auth: Option<&'static str>) -> (SocketAddr, SeenLog) {
    let seen: SeenLog = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let addr = listen(tls, move |socket| serve_proxy(socket, expected_auth, Arc::clone(&log))).await;
    (addr, seen)
}

/// Start a node answering `{"hello":"world"}` to every request.
pub async fn start_mock_node() -> (SocketAddr, SeenLog) {
    mock_node(false).await
}

/// Same node behind TLS, with a certificate signed by [`TEST_CA`].
pub async fn start_secure_mock_node() -> (SocketAddr, SeenLog) {
    mock_node(true).await
}

/// Start a forward proxy that relays plain requests and tunnels CONNECT.
///
/// When `expected_auth` is set, requests without that exact
/// `Proxy-Authorization` value get a 407.
pub async fn start_mock_proxy(expected_auth: Option<&'static str>) -> (SocketAddr, SeenLog) {
    mock_proxy(false, expected_auth).await
}

/// Same proxy reached over TLS.
pub async fn start_secure_mock_proxy(expected_auth: Option<&'static str>) -> (SocketAddr, SeenLog) {
    mock_proxy(true, expected_auth).await
}
