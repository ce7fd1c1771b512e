//! Resurrection of dead nodes.
//!
//! # Responsibilities
//! - Map the configured strategy to how an eligible node is admitted
//! - Probe a node with a lightweight request

use std::time::Duration;

use axum::http::Method;
use tokio::time;

use crate::config::ResurrectStrategy;
use crate::connection::{Connection, ConnectionRequest};
use crate::error::{ConnectionError, ConnectionErrorKind};

/// How a node was handed out by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Node is alive.
    Alive,
    /// Dead node handed out for a live request (optimistic strategy).
    Trial,
    /// Dead node that must pass a ping before carrying traffic.
    Probe,
}

impl Admission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alive => "alive",
            Self::Trial => "trial",
            Self::Probe => "probe",
        }
    }
}

impl ResurrectStrategy {
    /// Admission for a dead node whose resurrection timer expired.
    /// `None` means the node is never re-admitted.
    pub fn admission(&self) -> Option<Admission> {
        match self {
            ResurrectStrategy::Ping => Some(Admission::Probe),
            ResurrectStrategy::Optimistic => Some(Admission::Trial),
            ResurrectStrategy::None => None,
        }
    }
}

/// Probe a node. Any answer below 500 counts as alive.
pub async fn ping(connection: &dyn Connection, timeout: Duration) -> Result<(), ConnectionError> {
    let request = ConnectionRequest::new(Method::HEAD, "/").with_timeout(timeout);

    let response = match time::timeout(timeout, connection.request(request)).await {
        Ok(result) => result?,
        Err(_) => return Err(ConnectionError::timeout(timeout)),
    };

    if response.status.is_server_error() {
        tracing::debug!(status = %response.status, "Ping failed: server error");
        return Err(ConnectionError::new(
            ConnectionErrorKind::Reset,
            format!("ping answered {}", response.status),
        ));
    }
    Ok(())
}
