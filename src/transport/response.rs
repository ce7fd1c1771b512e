//! Response returned to the caller.

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::{TransportError, TransportResult};
use crate::pool::node::Node;

/// How a response was obtained.
#[derive(Debug, Clone)]
pub struct ExchangeMeta {
    pub request_id: String,
    /// Node that produced the response.
    pub node: Node,
    /// Attempts made, the successful one included.
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Decoded body when the response carried the serializer's content type.
    pub json: Option<serde_json::Value>,
    pub meta: ExchangeMeta,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> TransportResult<T> {
        let decoded = match &self.json {
            Some(value) => serde_json::from_value(value.clone()),
            None => serde_json::from_slice(&self.body),
        };
        decoded.map_err(|e| TransportError::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Hello {
        hello: String,
    }

    fn response(body: &'static str, json: Option<serde_json::Value>) -> TransportResponse {
        TransportResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from_static(body.as_bytes()),
            json,
            meta: ExchangeMeta {
                request_id: "r".to_string(),
                node: Node::parse("http://localhost:9200").unwrap(),
                attempts: 1,
            },
        }
    }

    #[test]
    fn test_typed_json() {
        let r = response(r#"{"hello":"world"}"#, None);
        assert_eq!(r.json::<Hello>().unwrap(), Hello { hello: "world".into() });
        assert!(r.is_success());

        let r = response("", Some(serde_json::json!({ "hello": "there" })));
        assert_eq!(r.json::<Hello>().unwrap().hello, "there");

        let r = response("oops", None);
        assert!(matches!(r.json::<Hello>(), Err(TransportError::Deserialization(_))));
        assert_eq!(r.text(), "oops");
    }
}
