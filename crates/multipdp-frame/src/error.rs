/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The byte read where a frame should begin is not the start marker.
    #[error("invalid start marker 0x{0:02x} (expected 0x7f)")]
    BadStart(u8),

    /// The byte following the payload is not the end marker.
    #[error("invalid end marker 0x{0:02x} (expected 0x7e)")]
    BadEnd(u8),

    /// The header length is shorter than the header itself.
    #[error("malformed header length {length}")]
    Malformed { length: u16 },

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport was closed before a complete frame was transferred.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// Transport-level failures; everything else is a framing fault the
    /// stream can recover from.
    pub fn is_transport(&self) -> bool {
        matches!(self, FrameError::Io(_) | FrameError::ConnectionClosed)
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;

impl From<multipdp_transport::TransportError> for FrameError {
    fn from(err: multipdp_transport::TransportError) -> Self {
        match err {
            multipdp_transport::TransportError::Io(io) => FrameError::Io(io),
            multipdp_transport::TransportError::Open { source, .. } => FrameError::Io(source),
            multipdp_transport::TransportError::Closed => FrameError::ConnectionClosed,
        }
    }
}
