//! Request parameters and per-request options.

use std::time::Duration;

use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use tokio_util::sync::CancellationToken;

/// Request body before serialization.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    /// Sent as is.
    Bytes(Bytes),
    /// Serialized by the transport's serializer before the first attempt.
    Json(serde_json::Value),
}

/// What to send: method, path, query, body and request headers.
#[derive(Debug, Clone)]
pub struct RequestParams {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    pub headers: HeaderMap,
}

impl RequestParams {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
            headers: HeaderMap::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn head(path: impl Into<String>) -> Self {
        Self::new(Method::HEAD, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = RequestBody::Json(value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = RequestBody::Bytes(body.into());
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Encoded query string, `None` when there are no parameters.
    pub fn query_string(&self) -> Option<String> {
        if self.query.is_empty() {
            return None;
        }
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.query {
            serializer.append_pair(key, value);
        }
        Some(serializer.finish())
    }
}

/// Per-request overrides.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Per-attempt timeout; the transport default when unset.
    pub request_timeout: Option<Duration>,
    /// Retry budget; the transport default when unset.
    pub max_retries: Option<u32>,
    /// Statuses treated as success.
    pub ignore: Vec<u16>,
    /// Headers merged over the transport defaults.
    pub headers: HeaderMap,
    pub abort: Option<CancellationToken>,
    /// Bound on the whole request, retries included.
    pub deadline: Option<Duration>,
    /// Caller supplied request id; a UUID v4 is generated otherwise.
    pub request_id: Option<String>,
}

impl RequestOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_ignore(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.ignore.extend(statuses);
        self
    }

    pub fn with_abort(mut self, token: CancellationToken) -> Self {
        self.abort = Some(token);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_string_encoding() {
        let params = RequestParams::get("/_search").query("q", "name:foo bar").query("size", "10");
        assert_eq!(params.query_string().as_deref(), Some("q=name%3Afoo+bar&size=10"));
        assert_eq!(RequestParams::get("/").query_string(), None);
    }

    #[test]
    fn test_options_builder() {
        let options = RequestOptions::default()
            .with_max_retries(0)
            .with_ignore([404])
            .with_request_id("req-1");
        assert_eq!(options.max_retries, Some(0));
        assert_eq!(options.ignore, vec![404]);
        assert_eq!(options.request_id.as_deref(), Some("req-1"));
    }
}
