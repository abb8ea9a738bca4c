//! Binary frame layout for header/body messages.
//!
//! Frame layout (12 bytes of framing + the two payloads):
//!
//! ```text
//! +------------+----------+--------+--------+------+
//! | header_len | body_len | crc32c | header | body |
//! |  4 bytes   | 4 bytes  | 4 bytes|        |      |
//! +------------+----------+--------+--------+------+
//! ```
//!
//! The checksum covers the header bytes followed by the body bytes. Both
//! payloads are opaque here; they are produced and consumed by the body
//! codec negotiated in the options line.

use crate::error::ProtocolError;
use crate::MAX_PAYLOAD_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the fixed framing prefix in bytes (4+4+4 = 12).
pub const FRAME_HEADER_SIZE: usize = 12;

/// One framed header/body message.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Encoded request/response header.
    pub header: Bytes,
    /// Encoded body.
    pub body: Bytes,
}

impl Frame {
    pub fn new(header: Bytes, body: Bytes) -> Self {
        Self { header, body }
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let payload_len = self.header.len() + self.body.len();
        if payload_len > MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);
        buf.put_u32(self.header.len() as u32);
        buf.put_u32(self.body.len() as u32);

        let crc = crc32c::crc32c_append(crc32c::crc32c(&self.header), &self.body);
        buf.put_u32(crc);

        buf.put_slice(&self.header);
        buf.put_slice(&self.body);
        Ok(buf)
    }

    /// Decodes a frame from the buffer.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was consumed,
    /// `Ok(None)` if more data is needed, or `Err` on protocol errors.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        // Peek at the prefix without consuming.
        let header_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let body_len = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;

        let payload_len = header_len + body_len;
        if payload_len > MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let crc_expected = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);

        if buf.len() < FRAME_HEADER_SIZE + payload_len {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let header = buf.split_to(header_len).freeze();
        let body = buf.split_to(body_len).freeze();

        let crc_actual = crc32c::crc32c_append(crc32c::crc32c(&header), &body);
        if crc_actual != crc_expected {
            return Err(ProtocolError::CrcMismatch {
                expected: crc_expected,
                actual: crc_actual,
            });
        }

        Ok(Some(Self { header, body }))
    }
}
