//! Marker-delimited framing with channel addressing for the multipdp link.
//!
//! Every frame on the wire carries:
//! - a 1-byte start marker (`0x7F`)
//! - a 4-byte header: 2-byte little-endian length (header + payload),
//!   1-byte channel id, 1-byte control (always zero)
//! - up to [`DEFAULT_MAX_PAYLOAD`] payload bytes
//! - a 1-byte end marker (`0x7E`)
//!
//! Larger messages are split into consecutive frames on the same channel.
//! There is no continuation flag; each frame is one delivery unit.

pub mod channel;
pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use channel::{CSD, GPS, ROUTER};
pub use codec::{
    chunks, encode_frame, frame_count, Frame, FrameConfig, FrameHeader, DEFAULT_MAX_PAYLOAD,
    END_MARKER, FRAME_OVERHEAD, HEADER_SIZE, MAX_WIRE_PAYLOAD, START_MARKER,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
