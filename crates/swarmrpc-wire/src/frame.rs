use bytes::{Buf, Bytes, BytesMut};

use crate::error::{Result, WireError};
use crate::varint::{get_uvarint, put_uvarint, uvarint_len};

/// Default maximum frame payload size: 4 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 4 * 1024 * 1024;

/// Encode a payload into the wire format.
///
/// Wire format: an unsigned-varint length prefix followed by the payload
/// bytes. The prefix is what keeps frame boundaries intact across
/// stream-level chunking.
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) {
    dst.reserve(uvarint_len(payload.len() as u64) + payload.len());
    put_uvarint(dst, payload.len() as u64);
    dst.extend_from_slice(payload);
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Bytes>> {
    let mut peek = &src[..];
    let payload_len = match get_uvarint(&mut peek)? {
        Some(len) => len as usize,
        None => return Ok(None), // Need more data
    };
    let prefix_len = src.len() - peek.len();

    if payload_len > max_payload {
        return Err(WireError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    if peek.len() < payload_len {
        return Ok(None); // Need more data
    }

    src.advance(prefix_len);
    Ok(Some(src.split_to(payload_len).freeze()))
}

/// Configuration for the frame layer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 4 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}
