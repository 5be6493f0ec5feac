use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use multipdp_frame::{CSD, GPS, ROUTER};
use serde::{Deserialize, Serialize};

use crate::ring::RingBuffer;
use crate::sink::{SinkHandle, StreamPort};

/// Channel flavour requested through the management surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    /// Network-like PDP context.
    Data,
    /// Virtual serial line.
    Stream,
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelType::Data => f.write_str("data"),
            ChannelType::Stream => f.write_str("stream"),
        }
    }
}

/// Entry of the built-in stream channel table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamChannelSpec {
    pub id: u8,
    pub name: &'static str,
    pub sticky: bool,
}

/// Stream channels brought up at start and kept until shutdown.
pub const STREAM_CHANNELS: [StreamChannelSpec; 3] = [
    StreamChannelSpec {
        id: CSD,
        name: "CSD",
        sticky: true,
    },
    StreamChannelSpec {
        id: ROUTER,
        name: "ROUTER",
        sticky: true,
    },
    StreamChannelSpec {
        id: GPS,
        name: "GPS",
        sticky: true,
    },
];

/// Sink endpoint name for a channel: `pdp<N>` for data, `tty<NAME>` for streams.
pub fn sink_name(kind: ChannelType, id: u8) -> String {
    match kind {
        ChannelType::Data => format!("pdp{}", id.saturating_sub(1)),
        ChannelType::Stream => match STREAM_CHANNELS.iter().find(|spec| spec.id == id) {
            Some(spec) => format!("tty{}", spec.name),
            None => format!("ttyPDP{id}"),
        },
    }
}

/// Per-data-channel traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DataStats {
    pub rx_frames: u64,
    pub rx_bytes: u64,
    pub tx_units: u64,
    pub tx_bytes: u64,
    pub tx_rejected: u64,
}

/// State carried by a data channel.
#[derive(Debug)]
pub struct DataState {
    pub(crate) name: String,
    pub(crate) handle: SinkHandle,
    pub(crate) outbound: RingBuffer<Bytes>,
    pub(crate) stats: DataStats,
    /// Distinguishes successive activations under the same id.
    pub(crate) generation: u64,
}

impl DataState {
    pub fn new(name: String, handle: SinkHandle, ring_capacity: usize) -> Self {
        Self {
            name,
            handle,
            outbound: RingBuffer::new(ring_capacity),
            stats: DataStats::default(),
            generation: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> SinkHandle {
        self.handle
    }

    /// Units waiting for the deferred flush.
    pub fn queued(&self) -> usize {
        self.outbound.len()
    }

    pub fn stats(&self) -> DataStats {
        self.stats
    }
}

/// State carried by a stream channel.
pub struct StreamState {
    pub(crate) name: String,
    pub(crate) port: Arc<dyn StreamPort>,
}

impl StreamState {
    pub fn new(name: String, port: Arc<dyn StreamPort>) -> Self {
        Self { name, port }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a consumer has the port open.
    pub fn is_open(&self) -> bool {
        self.port.is_open()
    }

    pub fn port(&self) -> &Arc<dyn StreamPort> {
        &self.port
    }
}

impl fmt::Debug for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamState")
            .field("name", &self.name)
            .field("open", &self.port.is_open())
            .finish()
    }
}

/// Kind-specific channel state.
#[derive(Debug)]
pub enum ChannelKind {
    Data(DataState),
    Stream(StreamState),
}

impl ChannelKind {
    pub fn channel_type(&self) -> ChannelType {
        match self {
            ChannelKind::Data(_) => ChannelType::Data,
            ChannelKind::Stream(_) => ChannelType::Stream,
        }
    }
}

/// One multiplexed endpoint. Owned by the [`crate::Registry`].
#[derive(Debug)]
pub struct Channel {
    id: u8,
    sticky: bool,
    kind: ChannelKind,
}

impl Channel {
    pub fn new(id: u8, sticky: bool, kind: ChannelKind) -> Self {
        Self { id, sticky, kind }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    /// Sticky channels ignore deactivation requests unless forced.
    pub fn is_sticky(&self) -> bool {
        self.sticky
    }

    pub fn kind(&self) -> &ChannelKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut ChannelKind {
        &mut self.kind
    }

    pub fn into_kind(self) -> ChannelKind {
        self.kind
    }

    pub fn channel_type(&self) -> ChannelType {
        self.kind.channel_type()
    }

    pub fn name(&self) -> &str {
        match &self.kind {
            ChannelKind::Data(data) => data.name(),
            ChannelKind::Stream(stream) => stream.name(),
        }
    }

    pub fn info(&self) -> ChannelInfo {
        let (open, queued, stats) = match &self.kind {
            ChannelKind::Data(data) => (None, Some(data.queued()), Some(data.stats())),
            ChannelKind::Stream(stream) => (Some(stream.is_open()), None, None),
        };
        ChannelInfo {
            id: self.id,
            kind: self.channel_type(),
            sticky: self.sticky,
            name: self.name().to_string(),
            open,
            queued,
            stats,
        }
    }
}

/// Point-in-time description of a registered channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelInfo {
    pub id: u8,
    pub kind: ChannelType,
    pub sticky: bool,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<DataStats>,
}
