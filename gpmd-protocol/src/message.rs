//! Handshake and per-request message types.

use crate::{GOB_CODEC, MAGIC};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-connection handshake record.
///
/// Sent exactly once at the start of every connection, encoded as a single
/// self-describing JSON line so the server can parse it before it knows
/// which body codec the client selected. Everything after the options line
/// is framed in the codec named by `codec_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Options {
    /// Protocol marker, must equal [`MAGIC`].
    pub magic: u32,

    /// Identifier of the body codec used for all subsequent frames.
    pub codec_type: String,

    /// Client-side budget for establishing the connection (zero = unbounded).
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,

    /// Server-side budget for a single method invocation (zero = unbounded).
    #[serde(with = "duration_ms")]
    pub handle_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            magic: MAGIC,
            codec_type: GOB_CODEC.to_string(),
            connect_timeout: Duration::from_secs(10),
            handle_timeout: Duration::ZERO,
        }
    }
}

impl Options {
    pub fn with_codec(mut self, codec_type: impl Into<String>) -> Self {
        self.codec_type = codec_type.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_handle_timeout(mut self, timeout: Duration) -> Self {
        self.handle_timeout = timeout;
        self
    }
}

/// Request/response envelope preceding every body.
///
/// Field order is part of the wire contract: service-method key, sequence,
/// error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// Invocation target of the form `<service>.<method>`.
    pub service_method: String,

    /// Sequence number correlating a response with its request. Assigned
    /// by the client, monotone per connection, starting at 1.
    pub seq: u64,

    /// Error message; empty on success. Set by the server when the request
    /// failed, in which case the body is a placeholder.
    pub error: String,
}

impl Header {
    /// Creates a request header with an empty error field.
    pub fn request(service_method: impl Into<String>, seq: u64) -> Self {
        Self {
            service_method: service_method.into(),
            seq,
            error: String::new(),
        }
    }

    pub fn has_error(&self) -> bool {
        !self.error.is_empty()
    }
}

/// Durations travel as integer milliseconds in the options line.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_defaults() {
        let options = Options::default();
        assert_eq!(options.magic, MAGIC);
        assert_eq!(options.codec_type, GOB_CODEC);
        assert_eq!(options.connect_timeout, Duration::from_secs(10));
        assert_eq!(options.handle_timeout, Duration::ZERO);
    }

    #[test]
    fn test_options_json_roundtrip() {
        let options = Options::default()
            .with_codec("application/json")
            .with_handle_timeout(Duration::from_secs(1));

        let json = serde_json::to_string(&options).unwrap();
        assert!(json.contains("\"connect_timeout\":10000"));
        assert!(json.contains("\"handle_timeout\":1000"));

        let parsed: Options = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, options);
    }

    #[test]
    fn test_header_field_order() {
        // The serialized field order is the wire contract.
        let header = Header::request("Foo.Sum", 7);
        let json = serde_json::to_string(&header).unwrap();
        let service = json.find("service_method").unwrap();
        let seq = json.find("\"seq\"").unwrap();
        let error = json.find("\"error\"").unwrap();
        assert!(service < seq && seq < error);
    }

    #[test]
    fn test_header_roundtrip() {
        let header = Header {
            service_method: "Foo.Sum".to_string(),
            seq: 42,
            error: "boom".to_string(),
        };
        let json = serde_json::to_string(&header).unwrap();
        let parsed: Header = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, header);
        assert!(parsed.has_error());
    }
}
