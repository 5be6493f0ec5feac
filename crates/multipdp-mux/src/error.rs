use multipdp_frame::FrameError;

use crate::channel::ChannelType;

/// Errors reported by a network or stream sink collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The collaborator refused to register the endpoint.
    #[error("sink registration refused: {0}")]
    Refused(String),

    /// The collaborator could not accept an inbound unit.
    #[error("sink rejected inbound payload: {0}")]
    Rejected(String),

    /// The endpoint is not (or no longer) registered.
    #[error("sink endpoint is gone")]
    Gone,
}

/// Registry slot-table failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("channel {0} already exists")]
    AlreadyExists(u8),

    #[error("no free channel slot")]
    NoSpace,
}

/// Errors from one demux step.
///
/// Everything except [`DemuxError::Transport`] is recovered locally: the
/// frame's declared bytes have been drained and the next call starts on the
/// following byte.
#[derive(Debug, thiserror::Error)]
pub enum DemuxError {
    /// The first byte was not the start marker; only that byte was consumed.
    #[error("bad start marker 0x{0:02x}")]
    BadStart(u8),

    /// The byte after the payload was not the end marker.
    #[error("bad end marker 0x{0:02x}")]
    BadEnd(u8),

    /// The header length is shorter than the header.
    #[error("malformed frame length {length}")]
    Malformed { length: u16 },

    /// The declared payload exceeds the configured maximum; it was drained.
    #[error("oversized frame payload ({size} bytes, max {max})")]
    Oversized { size: usize, max: usize },

    /// No channel is registered under the frame's id; the frame was drained.
    #[error("no channel registered for id {0}")]
    UnknownChannel(u8),

    /// The transport failed or closed.
    #[error("transport failure: {0}")]
    Transport(FrameError),
}

impl DemuxError {
    /// Whether the reader loop must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DemuxError::Transport(_))
    }
}

impl From<FrameError> for DemuxError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::BadStart(byte) => DemuxError::BadStart(byte),
            FrameError::BadEnd(byte) => DemuxError::BadEnd(byte),
            FrameError::Malformed { length } => DemuxError::Malformed { length },
            FrameError::PayloadTooLarge { size, max } => DemuxError::Oversized { size, max },
            other => DemuxError::Transport(other),
        }
    }
}

/// Why an activation ran out of resources.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Exhausted {
    #[error("no free channel slot")]
    NoFreeSlot,

    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Errors from [`crate::Multiplexer::activate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActivationError {
    #[error("channel {0} is already active")]
    AlreadyActive(u8),

    #[error("cannot activate channel {channel}: {reason}")]
    ResourceExhausted { channel: u8, reason: Exhausted },

    #[error("effective channel id {0} is out of range")]
    InvalidId(i32),
}

/// Errors from [`crate::Multiplexer::deactivate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeactivationError {
    #[error("channel {0} is not active")]
    NotFound(i32),

    #[error("channel {0} is sticky; deactivation requires force")]
    Sticky(u8),
}

/// Errors returned to management-surface callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManagementError {
    #[error(transparent)]
    Activation(#[from] ActivationError),

    #[error(transparent)]
    Deactivation(#[from] DeactivationError),
}

#[cfg(unix)]
impl ManagementError {
    /// errno-style code for the failure, as an ioctl surface would report it.
    pub fn errno(&self) -> i32 {
        match self {
            ManagementError::Activation(ActivationError::AlreadyActive(_)) => libc::EEXIST,
            ManagementError::Activation(ActivationError::ResourceExhausted {
                reason: Exhausted::NoFreeSlot,
                ..
            }) => libc::ENOSPC,
            ManagementError::Activation(ActivationError::ResourceExhausted {
                reason: Exhausted::Sink(_),
                ..
            }) => libc::ENOMEM,
            ManagementError::Activation(ActivationError::InvalidId(_)) => libc::EINVAL,
            ManagementError::Deactivation(DeactivationError::NotFound(_)) => libc::ENODEV,
            ManagementError::Deactivation(DeactivationError::Sticky(_)) => libc::EBUSY,
        }
    }
}

/// Errors from data-path operations on the multiplexer.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    #[error("no channel registered for id {0}")]
    UnknownChannel(u8),

    #[error("channel {channel} is not a {expected} channel")]
    WrongKind { channel: u8, expected: ChannelType },

    #[error("stream channel {0} is closed")]
    ChannelClosed(u8),

    /// The data channel's outbound queue is full; the newest unit was rejected.
    #[error("outbound queue for channel {0} is full")]
    QueueFull(u8),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

pub type Result<T> = std::result::Result<T, MuxError>;

/// Errors loading or validating [`crate::MuxConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors starting or stopping [`crate::MuxService`].
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("transport error: {0}")]
    Transport(#[from] multipdp_transport::TransportError),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("default channel activation failed: {0}")]
    Activation(#[from] ActivationError),

    #[error("reader failed: {0}")]
    Reader(FrameError),
}
