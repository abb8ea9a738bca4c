//! Body codecs and the connection-level encoder/decoder.

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::message::{Header, Options};
use crate::{GOB_CODEC, JSON_CODEC};
use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Body codec negotiated through [`Options::codec_type`].
///
/// Each identifier names one (de)serialization format for headers and
/// bodies. Both endpoints instantiate the codec from the identifier in the
/// options line; the variants here are the registered set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyCodec {
    /// Default compact binary codec (`application/gob`).
    Gob,
    /// JSON codec (`application/json`).
    Json,
}

impl BodyCodec {
    /// Looks up a codec by its wire identifier.
    ///
    /// Unrecognized identifiers fail with [`ProtocolError::UnknownCodec`];
    /// both endpoints reject the handshake on that error.
    pub fn from_name(name: &str) -> Result<Self, ProtocolError> {
        match name {
            GOB_CODEC => Ok(BodyCodec::Gob),
            JSON_CODEC => Ok(BodyCodec::Json),
            _ => Err(ProtocolError::UnknownCodec(name.to_string())),
        }
    }

    /// Returns the wire identifier of this codec.
    pub fn name(&self) -> &'static str {
        match self {
            BodyCodec::Gob => GOB_CODEC,
            BodyCodec::Json => JSON_CODEC,
        }
    }

    /// Serializes a value with this codec.
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        match self {
            BodyCodec::Gob => Ok(postcard::to_allocvec(value)?),
            BodyCodec::Json => Ok(serde_json::to_vec(value)?),
        }
    }

    /// Deserializes a value with this codec.
    pub fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        match self {
            BodyCodec::Gob => Ok(postcard::from_bytes(data)?),
            BodyCodec::Json => Ok(serde_json::from_slice(data)?),
        }
    }
}

/// Encodes outbound traffic: the options line and framed messages.
pub struct Encoder;

impl Encoder {
    /// Encodes the options line that precedes all framed traffic.
    pub fn encode_options(options: &Options) -> Result<Vec<u8>, ProtocolError> {
        let mut bytes = serde_json::to_vec(options)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Encodes one header/body message into a frame.
    pub fn encode_message<T: Serialize>(
        codec: &BodyCodec,
        header: &Header,
        body: &T,
    ) -> Result<BytesMut, ProtocolError> {
        let body = codec.encode(body)?;
        Self::encode_raw(codec, header, Bytes::from(body))
    }

    /// Encodes a message whose body is already in codec form.
    pub fn encode_raw(
        codec: &BodyCodec,
        header: &Header,
        body: Bytes,
    ) -> Result<BytesMut, ProtocolError> {
        let header = codec.encode(header)?;
        Frame::new(Bytes::from(header), body).encode()
    }
}

/// Incremental decoder over a connection's receive buffer.
///
/// Feed raw socket reads through [`Decoder::extend`]; the `decode_*`
/// methods consume exactly one complete item per call and return
/// `Ok(None)` while more data is needed.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the options line.
    ///
    /// Bytes past the newline stay buffered for subsequent frame decoding,
    /// so reads that straddle the handshake lose nothing.
    pub fn decode_options(&mut self) -> Result<Option<Options>, ProtocolError> {
        match self.buffer.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let line = self.buffer.split_to(pos + 1);
                let options: Options = serde_json::from_slice(&line[..line.len() - 1])?;
                Ok(Some(options))
            }
            None => Ok(None),
        }
    }

    /// Attempts to decode the next header/body message.
    ///
    /// The body is returned still in codec form; callers decode it into a
    /// typed carrier (or drop it to discard).
    pub fn decode_message(
        &mut self,
        codec: &BodyCodec,
    ) -> Result<Option<(Header, Bytes)>, ProtocolError> {
        match Frame::decode(&mut self.buffer)? {
            Some(frame) => {
                let header: Header = codec.decode(&frame.header)?;
                Ok(Some((header, frame.body)))
            }
            None => Ok(None),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
