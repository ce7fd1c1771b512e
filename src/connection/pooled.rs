//! Keep-alive connection backed by the hyper-util legacy client.

use std::sync::Mutex;

use axum::body::Body;
use axum::http::header::{AUTHORIZATION, PROXY_AUTHORIZATION};
use axum::http::{HeaderValue, Request};
use futures_util::future::BoxFuture;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::time;
use url::Url;

use crate::connection::connector::NodeConnector;
use crate::connection::{
    check_proxy_status, classify_error, split_node_url, target_uri, Connection, ConnectionOptions,
    ConnectionRequest, ConnectionResponse,
};
use crate::error::{ConnectionError, ConnectionErrorKind, TransportResult};
use crate::pool::node::Node;

/// Connection that reuses idle sockets between exchanges.
pub struct PooledConnection {
    base: Url,
    authorization: Option<HeaderValue>,
    connector: NodeConnector,
    client: Mutex<Client<NodeConnector, Body>>,
}

impl PooledConnection {
    pub fn new(node: &Node, options: &ConnectionOptions) -> TransportResult<Self> {
        let (base, authorization) = split_node_url(node)?;
        let connector = NodeConnector::new(&base, options)?;
        let client = Self::build_client(&connector);
        Ok(Self {
            base,
            authorization,
            connector,
            client: Mutex::new(client),
        })
    }

    fn build_client(connector: &NodeConnector) -> Client<NodeConnector, Body> {
        Client::builder(TokioExecutor::new()).build(connector.clone())
    }

    fn client(&self) -> Client<NodeConnector, Body> {
        self.client.lock().expect("pooled client mutex poisoned").clone()
    }

    async fn exchange(&self, request: ConnectionRequest) -> Result<ConnectionResponse, ConnectionError> {
        let uri = target_uri(&self.base, &request.path, request.query.as_deref())?;
        let relayed = self.connector.relays(&uri);

        let mut headers = request.headers;
        if let Some(auth) = &self.authorization {
            headers.entry(AUTHORIZATION).or_insert_with(|| auth.clone());
        }
        if let Some(auth) = self.connector.relay_authorization(&uri) {
            headers.insert(PROXY_AUTHORIZATION, auth.clone());
        }

        let body = request.body.map(Body::from).unwrap_or_else(Body::empty);
        let mut http_request = Request::builder()
            .method(request.method)
            .uri(uri)
            .body(body)
            .map_err(|e| ConnectionError::new(ConnectionErrorKind::Protocol, e.to_string()))?;
        *http_request.headers_mut() = headers;

        let response = self
            .client()
            .request(http_request)
            .await
            .map_err(|e| classify_error(&e, e.is_connect()))?;

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

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("base", &self.base.as_str())
            .field("connector", &self.connector)
            .finish()
    }
}

impl Connection for PooledConnection {
    fn request(&self, request: ConnectionRequest) -> BoxFuture<'_, Result<ConnectionResponse, ConnectionError>> {
        Box::pin(async move {
            let timeout = request.timeout;
            match time::timeout(timeout, self.exchange(request)).await {
                Ok(result) => result,
                Err(_) => Err(ConnectionError::timeout(timeout)),
            }
        })
    }

    fn close(&self) {
        // Dropping the old client releases its idle sockets
        let fresh = Self::build_client(&self.connector);
        *self.client.lock().expect("pooled client mutex poisoned") = fresh;
    }
}
