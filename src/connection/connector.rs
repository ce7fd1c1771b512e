//! Byte-stream establishment towards a node.
//!
//! # Responsibilities
//! - Open TCP to the node, or to the forward proxy when one is set
//! - Tunnel with CONNECT for https targets behind a proxy
//! - Run the TLS handshake for https targets
//! - Tell hyper whether the stream relays through a proxy (absolute-form URIs)

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::http::{HeaderValue, Uri};
use futures_util::future::BoxFuture;
use hyper_util::client::legacy::connect::{Connected, Connection as HyperConnection};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use url::Url;

use crate::connection::tls::{build_tls_connector, handshake};
use crate::connection::tunnel::establish_tunnel;
use crate::connection::{authority, ConnectionOptions, ProxySettings};
use crate::error::{ConnectionError, ConnectionErrorKind, TransportResult};

/// Object-safe async byte stream.
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Io for T {}

/// Established stream to a node, possibly through a proxy.
pub struct NodeStream {
    io: TokioIo<Box<dyn Io>>,
    proxied: bool,
}

impl NodeStream {
    fn new(io: Box<dyn Io>, proxied: bool) -> Self {
        Self {
            io: TokioIo::new(io),
            proxied,
        }
    }

    /// True when requests on this stream are relayed by a proxy and must
    /// use absolute-form targets.
    pub fn is_proxied(&self) -> bool {
        self.proxied
    }
}

impl hyper::rt::Read for NodeStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: hyper::rt::ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_read(cx, buf)
    }
}

impl hyper::rt::Write for NodeStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().io).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_shutdown(cx)
    }
}

impl HyperConnection for NodeStream {
    fn connected(&self) -> Connected {
        Connected::new().proxy(self.proxied)
    }
}

/// Connector shared by the hyper based connections.
#[derive(Clone)]
pub struct NodeConnector {
    proxy: Option<ProxySettings>,
    tls: Option<TlsConnector>,
}

impl std::fmt::Debug for NodeConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConnector")
            .field("proxy", &self.proxy.as_ref().map(|p| p.url.as_str()))
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

impl NodeConnector {
    /// Connector for the node at `base`. TLS material is only loaded when
    /// the node or the proxy speaks https.
    pub fn new(base: &Url, options: &ConnectionOptions) -> TransportResult<Self> {
        let proxy_tls = options.proxy.as_ref().is_some_and(|p| p.url.scheme() == "https");
        let tls = if base.scheme() == "https" || proxy_tls {
            Some(build_tls_connector(&options.tls)?)
        } else {
            None
        };
        Ok(Self {
            proxy: options.proxy.clone(),
            tls,
        })
    }

    /// `Proxy-Authorization` to attach to requests relayed to `uri`.
    pub fn relay_authorization(&self, uri: &Uri) -> Option<&HeaderValue> {
        if uri.scheme_str() == Some("https") {
            return None;
        }
        self.proxy.as_ref().and_then(|p| p.authorization.as_ref())
    }

    /// Whether requests to `uri` are relayed by the proxy.
    pub fn relays(&self, uri: &Uri) -> bool {
        self.proxy.is_some() && uri.scheme_str() != Some("https")
    }

    pub async fn connect(&self, uri: Uri) -> Result<NodeStream, ConnectionError> {
        let https = uri.scheme_str() == Some("https");
        let host = uri
            .host()
            .ok_or_else(|| ConnectionError::new(ConnectionErrorKind::Protocol, format!("no host in '{}'", uri)))?
            .to_string();
        let port = uri.port_u16().unwrap_or(if https { 443 } else { 80 });
        let target = format!("{}:{}", host, port);

        let Some(proxy) = &self.proxy else {
            let tcp = open_tcp(&target).await?;
            return if https {
                let tls = handshake(self.tls()?, &host, tcp).await?;
                Ok(NodeStream::new(Box::new(tls), false))
            } else {
                Ok(NodeStream::new(Box::new(tcp), false))
            };
        };

        let proxy_addr = authority(&proxy.url);
        let tcp = open_tcp(&proxy_addr).await.map_err(|e| {
            ConnectionError::new(ConnectionErrorKind::Proxy, format!("proxy {} unreachable: {}", proxy_addr, e.message))
        })?;
        let mut stream: Box<dyn Io> = if proxy.url.scheme() == "https" {
            let proxy_host = proxy.url.host_str().unwrap_or_default().to_string();
            Box::new(handshake(self.tls()?, &proxy_host, tcp).await?)
        } else {
            Box::new(tcp)
        };

        if !https {
            tracing::trace!(proxy = %proxy_addr, target = %target, "Relaying through proxy");
            return Ok(NodeStream::new(stream, true));
        }

        establish_tunnel(&mut stream, &target, proxy.authorization.as_ref()).await?;
        tracing::trace!(proxy = %proxy_addr, target = %target, "Tunnel established");
        let tls = handshake(self.tls()?, &host, stream).await?;
        Ok(NodeStream::new(Box::new(tls), false))
    }

    fn tls(&self) -> Result<&TlsConnector, ConnectionError> {
        self.tls
            .as_ref()
            .ok_or_else(|| ConnectionError::new(ConnectionErrorKind::Tls, "TLS is not configured for this node"))
    }
}

async fn open_tcp(addr: &str) -> Result<TcpStream, ConnectionError> {
    let tcp = TcpStream::connect(addr).await?;
    let _ = tcp.set_nodelay(true);
    Ok(tcp)
}

impl tower::Service<Uri> for NodeConnector {
    type Response = NodeStream;
    type Error = ConnectionError;
    type Future = BoxFuture<'static, Result<NodeStream, ConnectionError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let connector = self.clone();
        Box::pin(async move { connector.connect(uri).await })
    }
}
