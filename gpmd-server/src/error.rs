//! Server error types.

use crate::service::MethodError;
use thiserror::Error;

/// Server errors.
///
/// Handshake and I/O failures are terminal for their connection. The
/// resolution and dispatch variants are per-request: their text travels
/// back to the caller in the response header.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] gpmd_protocol::ProtocolError),

    #[error("invalid magic number {0:#x}")]
    InvalidMagic(u32),

    #[error("service/method request ill-formed: {0:?}")]
    IllFormedRequest(String),

    #[error("can't find service {0}")]
    UnknownService(String),

    #[error("can't find method {0}")]
    UnknownMethod(String),

    #[error("service already defined: {0}")]
    AlreadyRegistered(String),

    #[error("invalid service name: {0:?}")]
    InvalidServiceName(String),

    #[error(transparent)]
    Method(#[from] MethodError),
}
