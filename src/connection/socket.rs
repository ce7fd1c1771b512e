//! One fresh socket per exchange.

use axum::body::Body;
use axum::http::header::{AUTHORIZATION, HOST, PROXY_AUTHORIZATION};
use axum::http::{HeaderValue, Request, Uri};
use futures_util::future::BoxFuture;
use hyper::client::conn::http1;
use tokio::time;
use url::Url;

use crate::connection::connector::NodeConnector;
use crate::connection::{
    check_proxy_status, classify_error, split_node_url, target_uri, Connection, ConnectionOptions,
    ConnectionRequest, ConnectionResponse,
};
use crate::error::{ConnectionError, ConnectionErrorKind, TransportResult};
use crate::pool::node::Node;

/// Connection that opens and closes a socket around every exchange.
#[derive(Debug)]
pub struct SocketConnection {
    base: Url,
    authorization: Option<HeaderValue>,
    connector: NodeConnector,
}

impl SocketConnection {
    pub fn new(node: &Node, options: &ConnectionOptions) -> TransportResult<Self> {
        let (base, authorization) = split_node_url(node)?;
        let connector = NodeConnector::new(&base, options)?;
        Ok(Self {
            base,
            authorization,
            connector,
        })
    }

    async fn exchange(&self, request: ConnectionRequest) -> Result<ConnectionResponse, ConnectionError> {
        let uri = target_uri(&self.base, &request.path, request.query.as_deref())?;
        let stream = self.connector.connect(uri.clone()).await?;
        let relayed = stream.is_proxied();

        let mut headers = request.headers;
        if let Some(authority) = uri.authority() {
            let host = HeaderValue::from_str(authority.as_str())
                .map_err(|e| ConnectionError::new(ConnectionErrorKind::Protocol, e.to_string()))?;
            headers.entry(HOST).or_insert(host);
        }
        if let Some(auth) = &self.authorization {
            headers.entry(AUTHORIZATION).or_insert_with(|| auth.clone());
        }
        if let Some(auth) = self.connector.relay_authorization(&uri) {
            headers.insert(PROXY_AUTHORIZATION, auth.clone());
        }

        // Origin servers get origin-form, relaying proxies absolute-form
        let target = if relayed {
            uri
        } else {
            uri.path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/")
                .parse::<Uri>()
                .map_err(|e| ConnectionError::new(ConnectionErrorKind::Protocol, e.to_string()))?
        };

        let body = request.body.map(Body::from).unwrap_or_else(Body::empty);
        let mut http_request = Request::builder()
            .method(request.method)
            .uri(target)
            .body(body)
            .map_err(|e| ConnectionError::new(ConnectionErrorKind::Protocol, e.to_string()))?;
        *http_request.headers_mut() = headers;

        let (mut sender, connection) = http1::handshake(stream)
            .await
            .map_err(|e| classify_error(&e, true))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(error = %e, "Socket connection closed with error");
            }
        });

        let response = sender
            .send_request(http_request)
            .await
            .map_err(|e| classify_error(&e, false))?;

        check_proxy_status(response.status(), relayed)?;

        let (parts, body) = response.into_parts();
        let body = axum::body::to_bytes(Body::new(body), usize::MAX)
            .await
            .map_err(|e| classify_error(&e, false))?;

        Ok(ConnectionResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}

impl Connection for SocketConnection {
    fn request(&self, request: ConnectionRequest) -> BoxFuture<'_, Result<ConnectionResponse, ConnectionError>> {
        Box::pin(async move {
            let timeout = request.timeout;
            match time::timeout(timeout, self.exchange(request)).await {
                Ok(result) => result,
                Err(_) => Err(ConnectionError::timeout(timeout)),
            }
        })
    }
}
