//! Client error types.

use std::time::Duration;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The client is closing or has shut down.
    #[error("connection is shut down")]
    Shutdown,

    #[error("connect timeout: expect within {0:?}")]
    ConnectTimeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] gpmd_protocol::ProtocolError),

    /// Error reported by the server in a response header, verbatim.
    #[error("{0}")]
    Server(String),

    #[error("reading body failed: {0}")]
    ReadBody(String),

    /// The peer closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// The receive loop terminated while this call was pending.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
}
