//! Connection backed by reqwest.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderValue;
use futures_util::future::BoxFuture;
use url::Url;

use crate::connection::{
    check_proxy_status, split_node_url, target_uri, Connection, ConnectionOptions, ConnectionRequest,
    ConnectionResponse,
};
use crate::error::{ConnectionError, ConnectionErrorKind, TransportError, TransportResult};
use crate::pool::node::Node;

#[derive(Debug)]
pub struct ReqwestConnection {
    base: Url,
    authorization: Option<HeaderValue>,
    client: reqwest::Client,
    proxied: bool,
}

impl ReqwestConnection {
    pub fn new(node: &Node, options: &ConnectionOptions) -> TransportResult<Self> {
        let (base, authorization) = split_node_url(node)?;
        let mut builder = reqwest::Client::builder().user_agent(concat!("cluster-transport/", env!("CARGO_PKG_VERSION")));

        builder = match &options.proxy {
            Some(settings) => {
                let mut proxy = reqwest::Proxy::all(settings.url.as_str())
                    .map_err(|e| TransportError::Configuration(format!("Invalid proxy: {}", e)))?;
                if let Some(user) = settings.username() {
                    proxy = proxy.basic_auth(user, settings.password().unwrap_or(""));
                }
                builder.proxy(proxy)
            }
            None => builder.no_proxy(),
        };

        if let Some(path) = &options.tls.ca_cert_path {
            let pem = std::fs::read(path)
                .map_err(|e| TransportError::Configuration(format!("Cannot read CA file {:?}: {}", path, e)))?;
            let certs = reqwest::Certificate::from_pem_bundle(&pem)
                .map_err(|e| TransportError::Configuration(format!("Invalid CA file {:?}: {}", path, e)))?;
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::Configuration(format!("Cannot build HTTP client: {}", e)))?;

        Ok(Self {
            proxied: options.proxy.is_some() && base.scheme() == "http",
            base,
            authorization,
            client,
        })
    }

    async fn exchange(&self, request: ConnectionRequest) -> Result<ConnectionResponse, ConnectionError> {
        let uri = target_uri(&self.base, &request.path, request.query.as_deref())?;

        let mut headers = request.headers;
        if let Some(auth) = &self.authorization {
            headers.entry(AUTHORIZATION).or_insert_with(|| auth.clone());
        }

        let mut builder = self
            .client
            .request(request.method, uri.to_string())
            .headers(headers)
            .timeout(request.timeout);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        check_proxy_status(response.status(), self.proxied)?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        Ok(ConnectionResponse { status, headers, body })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ConnectionError {
    let message = error_chain(&err);
    let kind = if is_proxy_auth_failure(&message) {
        ConnectionErrorKind::ProxyAuthentication
    } else if err.is_timeout() {
        ConnectionErrorKind::Timeout
    } else if err.is_connect() {
        ConnectionErrorKind::Refused
    } else if err.is_decode() || err.is_builder() {
        ConnectionErrorKind::Protocol
    } else {
        ConnectionErrorKind::Reset
    };
    ConnectionError::new(kind, message)
}

/// reqwest words a refused tunnel differently across versions and layers.
fn is_proxy_auth_failure(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("proxy authentication required")
        || message.contains("proxy authorization required")
        || (message.contains("tunnel") && message.contains("407"))
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

impl Connection for ReqwestConnection {
    fn request(&self, request: ConnectionRequest) -> BoxFuture<'_, Result<ConnectionResponse, ConnectionError>> {
        Box::pin(self.exchange(request))
    }
}
