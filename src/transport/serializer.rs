//! Payload serialization.

use std::fmt;

use axum::body::Bytes;

use crate::error::{TransportError, TransportResult};

/// Encodes request bodies and decodes response bodies.
pub trait Serializer: Send + Sync + fmt::Debug {
    fn serialize(&self, value: &serde_json::Value) -> TransportResult<Bytes>;

    fn deserialize(&self, body: &[u8]) -> TransportResult<serde_json::Value>;

    /// Content type of serialized bodies; responses of this type are decoded.
    fn content_type(&self) -> &'static str {
        "application/json"
    }
}

/// serde_json serializer.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &serde_json::Value) -> TransportResult<Bytes> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| TransportError::Serialization(e.to_string()))
    }

    fn deserialize(&self, body: &[u8]) -> TransportResult<serde_json::Value> {
        serde_json::from_slice(body).map_err(|e| TransportError::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_serializer() {
        let s = JsonSerializer;
        let bytes = s.serialize(&json!({ "query": { "match_all": {} } })).unwrap();
        assert_eq!(&bytes[..], br#"{"query":{"match_all":{}}}"#);
        assert_eq!(s.deserialize(&bytes).unwrap()["query"]["match_all"], json!({}));
        assert!(matches!(s.deserialize(b"{"), Err(TransportError::Deserialization(_))));
    }
}
