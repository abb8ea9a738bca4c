//! # gpmd-registry
//!
//! HTTP-addressable service registry for gpmd.
//!
//! Servers POST heartbeats; clients GET the alive set. Everything rides in
//! the `X-GPMD-SERVERS` header, so the body is never inspected. Entries
//! expire when their last heartbeat is older than the configured timeout.

pub mod config;
pub mod error;
pub mod heartbeat;
pub mod registry;

pub use config::{Config, ConfigError};
pub use error::RegistryError;
pub use heartbeat::heartbeat;
pub use registry::{Registry, DEFAULT_TIMEOUT};

pub use gpmd_protocol::{REGISTRY_PATH, SERVERS_HEADER};
