//! # gpmd-server
//!
//! TCP serve engine for gpmd.
//!
//! This crate provides:
//! - Typed service registration with per-method dispatch handlers
//! - Connection handling: options handshake, framed request loop
//! - Concurrent per-request dispatch with a handle timeout
//! - Response serialization through a per-connection write lock

pub mod error;
pub mod server;
pub mod service;

pub use error::ServerError;
pub use server::{Server, ServerStats};
pub use service::{MethodDescriptor, MethodError, Service, ServiceBuilder};
