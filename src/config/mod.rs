//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) or TransportConfig built in code
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → TransportBuilder (pool, sniffer, connections)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once a transport is built
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::{
    ConnectionKind, NodeConfig, NodeSelectorKind, ObservabilityConfig, ProxyConfig,
    ResurrectStrategy, RetryBackoffConfig, TlsOptions, TransportConfig,
};
