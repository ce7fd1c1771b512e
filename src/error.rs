//! Error taxonomy for the transport.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Failure category reported by a [`Connection`](crate::connection::Connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionErrorKind {
    /// The node refused the connection or could not be resolved.
    Refused,
    /// The connection was reset or closed mid-exchange.
    Reset,
    /// TLS handshake or certificate failure.
    Tls,
    /// The exchange did not complete in time.
    Timeout,
    /// The peer answered with something that is not valid HTTP.
    Protocol,
    /// The forward proxy rejected our credentials (407).
    ProxyAuthentication,
    /// The forward proxy failed to relay or tunnel the request.
    Proxy,
}

impl ConnectionErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Refused => "connection refused",
            Self::Reset => "connection reset",
            Self::Tls => "tls error",
            Self::Timeout => "timeout",
            Self::Protocol => "protocol error",
            Self::ProxyAuthentication => "proxy authentication required",
            Self::Proxy => "proxy error",
        }
    }
}

impl fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed network exchange against one node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
}

impl ConnectionError {
    pub fn new(kind: ConnectionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn refused(message: impl Into<String>) -> Self {
        Self::new(ConnectionErrorKind::Refused, message)
    }

    pub fn reset(message: impl Into<String>) -> Self {
        Self::new(ConnectionErrorKind::Reset, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ConnectionErrorKind::Timeout,
            format!("no response after {} ms", after.as_millis()),
        )
    }

    /// Whether the failure is evidence that the node itself is unhealthy.
    ///
    /// Protocol errors belong to the payload layer and proxy authentication
    /// failures are independent of the node, so neither is retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.kind,
            ConnectionErrorKind::Protocol | ConnectionErrorKind::ProxyAuthentication
        )
    }
}

impl From<std::io::ErrorKind> for ConnectionErrorKind {
    fn from(kind: std::io::ErrorKind) -> Self {
        use std::io::ErrorKind;
        match kind {
            ErrorKind::ConnectionRefused | ErrorKind::NotFound | ErrorKind::AddrNotAvailable => Self::Refused,
            ErrorKind::TimedOut => Self::Timeout,
            ErrorKind::InvalidData => Self::Protocol,
            _ => Self::Reset,
        }
    }
}

impl From<std::io::Error> for ConnectionError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.kind().into(), err.to_string())
    }
}

/// Errors surfaced by the transport to its caller.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Invalid option values or an unsupported diagnostic subscription.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Socket, TLS or proxy level failure.
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// A single attempt exceeded its timeout.
    #[error("Request timed out after {} ms", .0.as_millis())]
    Timeout(Duration),

    /// No node qualified for selection.
    #[error("There are no living connections")]
    NoLivingConnections {
        #[source]
        last_error: Option<Box<TransportError>>,
    },

    /// The node answered with a status the caller did not accept.
    #[error("Response error: status {status}")]
    Response { status: u16, body: String },

    /// The caller cancelled the request.
    #[error("Request aborted")]
    Aborted,

    /// The global deadline of the logical request ran out.
    #[error("Request deadline exceeded")]
    DeadlineExceeded {
        #[source]
        last_error: Option<Box<TransportError>>,
    },

    /// Every attempt allowed by the retry budget failed.
    #[error("Max retries exceeded after {attempts} attempts: {source}")]
    MaxRetriesExceeded {
        attempts: u32,
        source: Box<TransportError>,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl TransportError {
    /// The innermost concrete error, unwrapping retry and deadline wrappers.
    pub fn root(&self) -> &TransportError {
        match self {
            Self::MaxRetriesExceeded { source, .. } => source.root(),
            Self::NoLivingConnections {
                last_error: Some(inner),
            }
            | Self::DeadlineExceeded {
                last_error: Some(inner),
            } => inner.root(),
            other => other,
        }
    }

    /// Status code carried by a response error, if any.
    pub fn status(&self) -> Option<u16> {
        match self.root() {
            Self::Response { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ConnectionError::refused("nope").is_retryable());
        assert!(ConnectionError::timeout(Duration::from_secs(1)).is_retryable());
        assert!(!ConnectionError::new(ConnectionErrorKind::Protocol, "bad").is_retryable());
        assert!(
            !ConnectionError::new(ConnectionErrorKind::ProxyAuthentication, "407").is_retryable()
        );
    }

    #[test]
    fn test_root_unwraps_wrappers() {
        let inner = TransportError::Response {
            status: 503,
            body: String::new(),
        };
        let err = TransportError::MaxRetriesExceeded {
            attempts: 3,
            source: Box::new(inner),
        };
        assert_eq!(err.status(), Some(503));
        assert!(err.to_string().contains("3 attempts"));

        let err = TransportError::NoLivingConnections { last_error: None };
        assert!(matches!(err.root(), TransportError::NoLivingConnections { .. }));
    }

    #[test]
    fn test_io_error_mapping() {
        let err: ConnectionError =
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused").into();
        assert_eq!(err.kind, ConnectionErrorKind::Refused);

        let err: ConnectionError =
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe").into();
        assert_eq!(err.kind, ConnectionErrorKind::Reset);
    }
}
