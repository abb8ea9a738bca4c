//! # gpmd-client
//!
//! Client library for gpmd.
//!
//! This crate provides:
//! - An async TCP client that multiplexes concurrent calls over one
//!   connection
//! - Asynchronous (`go`) and synchronous (`call`) invocation
//! - Service discovery with random and round-robin load balancing
//! - Registry-driven discovery with a refresh TTL

pub mod client;
pub mod discovery;
pub mod error;
pub mod registry;

pub use client::{Call, Client};
pub use discovery::{Discovery, DiscoveryError, MultiServerDiscovery, SelectMode};
pub use error::ClientError;
pub use registry::RegistryDiscovery;
