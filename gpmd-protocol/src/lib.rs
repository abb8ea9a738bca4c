//! # gpmd-protocol
//!
//! Wire protocol for gpmd RPC connections.
//!
//! This crate provides:
//! - The `Options` handshake record exchanged once per connection
//! - Request/response `Header` envelope
//! - Binary framing with length prefixes and CRC32C validation
//! - Pluggable body codecs selected by identifier
//!
//! A connection carries one options line (self-describing JSON, newline
//! terminated) followed by any number of framed header/body messages
//! encoded with the negotiated body codec:
//!
//! ```text
//! | Options (JSON line) | Header | Body | Header | Body | ...
//! ```

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;

pub use codec::{BodyCodec, Decoder, Encoder};
pub use error::ProtocolError;
pub use frame::{Frame, FRAME_HEADER_SIZE};
pub use message::{Header, Options};

/// Protocol marker carried in every options record.
pub const MAGIC: u32 = 0x1234567;

/// Identifier of the default binary body codec.
pub const GOB_CODEC: &str = "application/gob";

/// Identifier of the JSON body codec.
pub const JSON_CODEC: &str = "application/json";

/// Maximum size of a single frame payload (16 MiB).
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Default registry path on which servers heartbeat and clients discover.
pub const REGISTRY_PATH: &str = "/_gpmd_/registry";

/// HTTP header carrying registry server lists and heartbeat addresses.
pub const SERVERS_HEADER: &str = "X-GPMD-SERVERS";
