//! Diagnostic event types.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::config::ResurrectStrategy;
use crate::error::TransportError;
use crate::sniffer::SniffReason;

/// The six supported event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    Request,
    Response,
    Sniff,
    Resurrect,
    Serialization,
    Deserialization,
}

impl DiagnosticKind {
    pub const ALL: [DiagnosticKind; 6] = [
        Self::Request,
        Self::Response,
        Self::Sniff,
        Self::Resurrect,
        Self::Serialization,
        Self::Deserialization,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Sniff => "sniff",
            Self::Resurrect => "resurrect",
            Self::Serialization => "serialization",
            Self::Deserialization => "deserialization",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Self::Request => 0,
            Self::Response => 1,
            Self::Sniff => 2,
            Self::Resurrect => 3,
            Self::Serialization => 4,
            Self::Deserialization => 5,
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiagnosticKind {
    type Err = TransportError;

    /// Canonical names, plus the verb forms `serialize` and `deserialize`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "serialize" => Ok(Self::Serialization),
            "deserialize" => Ok(Self::Deserialization),
            _ => Self::ALL
                .into_iter()
                .find(|kind| kind.as_str() == s)
                .ok_or_else(|| TransportError::Configuration(format!("The event '{}' is not supported.", s))),
        }
    }
}

/// Emitted before an exchange is sent.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub node: Option<String>,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// Emitted after an exchange completed or failed.
#[derive(Debug, Clone)]
pub struct ResponseMeta {
    pub request_id: String,
    pub node: Option<String>,
    pub attempt: u32,
    pub status: Option<u16>,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct SniffMeta {
    pub reason: SniffReason,
    /// Node that answered the sniff request.
    pub node: Option<String>,
    /// Discovered node URLs; empty on failure.
    pub hosts: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ResurrectMeta {
    pub node: String,
    pub strategy: ResurrectStrategy,
    pub is_alive: bool,
    pub request_id: Option<String>,
}

/// Serialization and deserialization phases.
#[derive(Debug, Clone)]
pub struct PhaseMeta {
    pub request_id: String,
    /// Payload size in bytes, when known.
    pub bytes: Option<usize>,
}

/// A lifecycle event. Every variant carries the error, if any, and its
/// metadata.
#[derive(Debug, Clone)]
pub enum DiagnosticEvent {
    Request {
        error: Option<TransportError>,
        meta: RequestMeta,
    },
    Response {
        error: Option<TransportError>,
        meta: ResponseMeta,
    },
    Sniff {
        error: Option<TransportError>,
        meta: SniffMeta,
    },
    Resurrect {
        error: Option<TransportError>,
        meta: ResurrectMeta,
    },
    Serialization {
        error: Option<TransportError>,
        meta: PhaseMeta,
    },
    Deserialization {
        error: Option<TransportError>,
        meta: PhaseMeta,
    },
}

impl DiagnosticEvent {
    pub fn kind(&self) -> DiagnosticKind {
        match self {
            Self::Request { .. } => DiagnosticKind::Request,
            Self::Response { .. } => DiagnosticKind::Response,
            Self::Sniff { .. } => DiagnosticKind::Sniff,
            Self::Resurrect { .. } => DiagnosticKind::Resurrect,
            Self::Serialization { .. } => DiagnosticKind::Serialization,
            Self::Deserialization { .. } => DiagnosticKind::Deserialization,
        }
    }

    pub fn error(&self) -> Option<&TransportError> {
        match self {
            Self::Request { error, .. }
            | Self::Response { error, .. }
            | Self::Sniff { error, .. }
            | Self::Resurrect { error, .. }
            | Self::Serialization { error, .. }
            | Self::Deserialization { error, .. } => error.as_ref(),
        }
    }

    /// Request id, for request-scoped events.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Request { meta, .. } => Some(&meta.request_id),
            Self::Response { meta, .. } => Some(&meta.request_id),
            Self::Serialization { meta, .. } | Self::Deserialization { meta, .. } => Some(&meta.request_id),
            Self::Resurrect { meta, .. } => meta.request_id.as_deref(),
            Self::Sniff { .. } => None,
        }
    }
}
