//! Transport subsystem.
//!
//! # Data Flow
//! ```text
//! Caller → Transport::request(params, options)
//!     → startup sniff (first request only), interval sniff check
//!     → serializer.rs (JSON body, serialization diagnostic)
//!     → retry loop (transport.rs):
//!         pool selection excluding tried nodes (ping probe if required)
//!         request diagnostic → Connection::request → response diagnostic
//!         classify: success / retry (mark dead) / fail
//!     → response.rs (deserialization diagnostic for JSON bodies)
//!     → exhaustion: MaxRetriesExceeded + async fault sniff
//! ```
//!
//! # Design Decisions
//! - Abort and timeouts never mark a node dead unless the failure is retryable
//! - Sniff requests go through the same loop with a single attempt
//! - Fault and interval sniffs never delay the caller

pub mod request;
pub mod response;
pub mod serializer;
#[allow(clippy::module_inception)]
pub mod transport;

pub use request::{RequestBody, RequestOptions, RequestParams};
pub use response::{ExchangeMeta, TransportResponse};
pub use serializer::{JsonSerializer, Serializer};
pub use transport::{SniffOutcome, Transport, TransportBuilder};
