//! Frame Wire Codec
//!
//! Two layouts are understood:
//!
//! ```text
//! Wire format A (one frame):
//! ┌──────────┬───────────┬──────────────────┬─────────────────────────┐
//! │ i32 count│ f32 time  │ 9 x f32 box      │ N x f32 coords          │
//! │ (== 1)   │ (ignored) │ (row-major)      │ (flattened triples)     │
//! └──────────┴───────────┴──────────────────┴─────────────────────────┘
//!   0..4       4..8        8..44              44..
//!
//! Wire format B (many frames):
//! ┌────────────┬──────────────┬────────────┬──────────────┬───
//! │ u32 BE len │ A payload    │ u32 BE len │ A payload    │ ...
//! └────────────┴──────────────┴────────────┴──────────────┴───
//! ```
//!
//! Payload fields are little-endian; only the container length prefix is
//! big-endian. A container that ends mid-record yields the frames decoded
//! so far, while a payload too short for its own header is an error.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::frame::{Frame, BOX_LEN};

/// Size of the fixed single-frame header (count + time + box)
pub const FRAME_HEADER_LEN: usize = 4 + 4 + BOX_LEN * 4;

/// Size of the container length prefix
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Frame-count marker every single-frame payload is expected to carry
pub const EXPECTED_FRAME_MARKER: i32 = 1;

/// Which wire layout a buffer uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// Legacy unprefixed single frame
    SingleFrame,
    /// Length-prefixed multi-frame container
    LengthPrefixed,
}

/// Decode a buffer in the given layout into frames
pub fn decode(bytes: &[u8], format: WireFormat) -> Result<Vec<Frame>> {
    match format {
        WireFormat::SingleFrame => decode_frame(bytes).map(|frame| vec![frame]),
        WireFormat::LengthPrefixed => decode_chunk(bytes),
    }
}

/// Decode one wire-format-A payload
pub fn decode_frame(bytes: &[u8]) -> Result<Frame> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(Error::Format(format!(
            "frame payload is {} bytes, need at least {}",
            bytes.len(),
            FRAME_HEADER_LEN
        )));
    }

    let coord_bytes = bytes.len() - FRAME_HEADER_LEN;
    if coord_bytes % 4 != 0 {
        return Err(Error::Format(format!(
            "coordinate section of {} bytes is not a whole number of floats",
            coord_bytes
        )));
    }

    let mut buf = bytes;
    let marker = buf.get_i32_le();
    if marker != EXPECTED_FRAME_MARKER {
        // Tolerated: the payload is still decoded as a single frame.
        warn!(marker, "unexpected frame-count marker in single-frame payload");
    }
    let _timestamp = buf.get_f32_le();

    let mut box_matrix = [0.0f32; BOX_LEN];
    for value in box_matrix.iter_mut() {
        *value = buf.get_f32_le();
    }

    let mut coords = Vec::with_capacity(coord_bytes / 4);
    while buf.has_remaining() {
        coords.push(buf.get_f32_le());
    }

    Ok(Frame { coords, box_matrix })
}

/// Decode a wire-format-B container
///
/// Stops at the first record whose length prefix (or the prefix itself)
/// would run past the end of the buffer and returns what was decoded.
pub fn decode_chunk(bytes: &[u8]) -> Result<Vec<Frame>> {
    let mut frames = Vec::new();
    let mut buf = bytes;

    while buf.has_remaining() {
        if buf.remaining() < LENGTH_PREFIX_LEN {
            trace!(
                trailing = buf.remaining(),
                decoded = frames.len(),
                "container ends inside a length prefix"
            );
            break;
        }
        let len = (&buf[..LENGTH_PREFIX_LEN]).get_u32() as usize;
        let available = buf.remaining() - LENGTH_PREFIX_LEN;
        if len > available {
            trace!(
                declared = len,
                available,
                decoded = frames.len(),
                "container record overruns buffer"
            );
            break;
        }
        buf.advance(LENGTH_PREFIX_LEN);
        frames.push(decode_frame(&buf[..len])?);
        buf.advance(len);
    }

    Ok(frames)
}

/// Encode one frame as a wire-format-A payload
pub fn encode_frame(frame: &Frame) -> Bytes {
    let mut buf = BytesMut::with_capacity(frame.byte_size());
    put_frame(&mut buf, frame);
    buf.freeze()
}

/// Encode frames as a wire-format-B container
pub fn encode_chunk(frames: &[Frame]) -> Bytes {
    let total: usize = frames
        .iter()
        .map(|f| LENGTH_PREFIX_LEN + f.byte_size())
        .sum();
    let mut buf = BytesMut::with_capacity(total);
    for frame in frames {
        buf.put_u32(frame.byte_size() as u32);
        put_frame(&mut buf, frame);
    }
    buf.freeze()
}

fn put_frame(buf: &mut BytesMut, frame: &Frame) {
    buf.put_i32_le(EXPECTED_FRAME_MARKER);
    buf.put_f32_le(0.0);
    for value in frame.box_matrix {
        buf.put_f32_le(value);
    }
    for value in &frame.coords {
        buf.put_f32_le(*value);
    }
}

// =============================================================================
// Tests
// =============================================================================
