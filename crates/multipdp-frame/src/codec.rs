use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Marker preceding every frame.
pub const START_MARKER: u8 = 0x7F;

/// Marker following every frame's payload.
pub const END_MARKER: u8 = 0x7E;

/// Frame header: length (2) + channel (1) + control (1) = 4 bytes.
pub const HEADER_SIZE: usize = 4;

/// Bytes a frame adds around its payload: both markers plus the header.
pub const FRAME_OVERHEAD: usize = HEADER_SIZE + 2;

/// Default maximum payload per frame (one PDP MTU).
pub const DEFAULT_MAX_PAYLOAD: usize = 1500;

/// Largest payload the 16-bit length field can describe.
pub const MAX_WIRE_PAYLOAD: usize = u16::MAX as usize - HEADER_SIZE;

/// The 4-byte header following the start marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Header plus payload length in bytes.
    pub length: u16,
    /// Destination channel.
    pub channel: u8,
    /// Reserved, zero in this protocol version.
    pub control: u8,
}

impl FrameHeader {
    /// Build the header for a payload of `payload_len` bytes.
    pub fn for_payload(channel: u8, payload_len: usize) -> Result<Self> {
        if payload_len > MAX_WIRE_PAYLOAD {
            return Err(FrameError::PayloadTooLarge {
                size: payload_len,
                max: MAX_WIRE_PAYLOAD,
            });
        }
        Ok(Self {
            length: (HEADER_SIZE + payload_len) as u16,
            channel,
            control: 0,
        })
    }

    /// Declared payload length, or `None` when `length` is shorter than the header.
    pub fn payload_len(&self) -> Option<usize> {
        (self.length as usize).checked_sub(HEADER_SIZE)
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let [lo, hi] = self.length.to_le_bytes();
        [lo, hi, self.channel, self.control]
    }

    pub fn from_bytes(raw: [u8; HEADER_SIZE]) -> Self {
        Self {
            length: u16::from_le_bytes([raw[0], raw[1]]),
            channel: raw[2],
            control: raw[3],
        }
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The channel this payload is addressed to.
    pub channel: u8,
    /// The frame payload.
    pub payload: Bytes,
}

impl Frame {
    pub fn new(channel: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (markers + header + payload).
    pub fn wire_size(&self) -> usize {
        FRAME_OVERHEAD + self.payload.len()
    }
}

/// Encode one frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌───────┬─────────────┬─────────┬─────────┬──────────────────┬───────┐
/// │ Start │ Length      │ Channel │ Control │ Payload          │ End   │
/// │ 0x7F  │ (2B LE)     │ (1B)    │ 0x00    │ (Length - 4 B)   │ 0x7E  │
/// └───────┴─────────────┴─────────┴─────────┴──────────────────┴───────┘
/// ```
pub fn encode_frame(channel: u8, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let header = FrameHeader::for_payload(channel, payload.len())?;
    dst.reserve(FRAME_OVERHEAD + payload.len());
    dst.put_u8(START_MARKER);
    dst.put_slice(&header.to_bytes());
    dst.put_slice(payload);
    dst.put_u8(END_MARKER);
    Ok(())
}

/// Split a payload into per-frame chunks of at most `max_payload` bytes.
///
/// An empty payload yields exactly one empty chunk.
pub fn chunks(payload: &[u8], max_payload: usize) -> Chunks<'_> {
    Chunks {
        rest: payload,
        max: max_payload.max(1),
        emitted: false,
    }
}

/// Number of frames a payload of `len` bytes occupies.
pub fn frame_count(len: usize, max_payload: usize) -> usize {
    len.div_ceil(max_payload.max(1)).max(1)
}

/// Iterator returned by [`chunks`].
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    rest: &'a [u8],
    max: usize,
    emitted: bool,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.emitted && self.rest.is_empty() {
            return None;
        }
        let n = self.rest.len().min(self.max);
        let (head, tail) = self.rest.split_at(n);
        self.rest = tail;
        self.emitted = true;
        Some(head)
    }
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload per frame in bytes. Default: 1500.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}
