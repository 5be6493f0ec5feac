//! Channel multiplexer for the multipdp link.
//!
//! Several logical channels share one DPRAM byte transport:
//! - data channels (PDP contexts) hand payloads to a network-stack sink and
//!   queue outbound units in a small ring buffer drained by a deferred flush;
//! - stream channels (CSD, ROUTER, GPS) hand payloads to a TTY-like port.
//!
//! [`Multiplexer`] owns the channel registry and the transport writer behind
//! one coarse lock. A reader thread drives [`Multiplexer::demux_once`] and a
//! flush thread drains the data-channel queues; [`MuxService`] wires both to
//! an opened device.

pub mod channel;
pub mod config;
pub mod control;
pub mod error;
pub mod flush;
pub mod lifecycle;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod mux;
pub mod reader;
pub mod registry;
pub mod ring;
pub mod sink;
pub mod stats;

#[cfg(unix)]
pub mod service;

pub use channel::{
    Channel, ChannelInfo, ChannelKind, ChannelType, DataState, DataStats, StreamChannelSpec,
    StreamState, STREAM_CHANNELS,
};
pub use config::MuxConfig;
pub use control::{ManagementRequest, ManagementResponse};
pub use error::{
    ActivationError, ConfigError, DeactivationError, DemuxError, Exhausted, ManagementError,
    MuxError, RegistryError, Result, ServiceError, SinkError,
};
pub use flush::{spawn_flush, FlushScheduler};
pub use lifecycle::ActivationInfo;
pub use mux::Multiplexer;
pub use reader::ReaderExit;
pub use registry::Registry;
pub use ring::RingBuffer;
pub use sink::{NetSink, SinkHandle, StreamPort, StreamSink};
pub use stats::{MuxStats, StatsSnapshot};

#[cfg(unix)]
pub use reader::{run_reader, spawn_reader, ReaderHandle};
#[cfg(unix)]
pub use service::MuxService;
