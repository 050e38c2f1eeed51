//! Length-prefixed framing for stream transports
//!
//! Every frame is laid out as:
//! ```text
//! [ 4 bytes: length (u32, big-endian) ][ N bytes: protobuf Envelope ]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;
use thiserror::Error;

use crate::Envelope;

/// Largest accepted frame body (10 MiB)
pub const MAX_FRAME_SIZE: u32 = 10 * 1024 * 1024;

const PREFIX_LEN: usize = 4;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("Invalid frame length prefix: {0}")]
    InvalidLength(u32),

    #[error("Protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Protobuf encode error: {0}")]
    Encode(#[from] prost::EncodeError),
}

/// Encode a message into a single length-prefixed frame
pub fn encode<M: Message>(message: &M) -> Result<Bytes, CodecError> {
    let len = message.encoded_len();
    if len > MAX_FRAME_SIZE as usize {
        return Err(CodecError::FrameTooLarge(len));
    }

    let mut buf = BytesMut::with_capacity(PREFIX_LEN + len);
    buf.put_u32(len as u32);
    message.encode(&mut buf)?;
    Ok(buf.freeze())
}

/// Try to take one complete frame off the front of `buf`.
///
/// Returns `Ok(None)` and leaves `buf` untouched while the frame is incomplete.
pub fn decode<M: Message + Default>(buf: &mut BytesMut) -> Result<Option<M>, CodecError> {
    if buf.len() < PREFIX_LEN {
        return Ok(None);
    }

    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if len > MAX_FRAME_SIZE {
        return Err(CodecError::InvalidLength(len));
    }

    if buf.len() < PREFIX_LEN + len as usize {
        return Ok(None);
    }

    buf.advance(PREFIX_LEN);
    let body = buf.split_to(len as usize);
    Ok(Some(M::decode(body)?))
}

/// Accumulates bytes from a stream and yields whole envelopes
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Feed bytes read from the stream
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Next complete envelope. Call until it returns `Ok(None)`.
    pub fn decode_next(&mut self) -> Result<Option<Envelope>, CodecError> {
        decode(&mut self.buffer)
    }

    /// Bytes held for an incomplete frame
    #[cfg(test)]
    fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
