//! Collaborator interfaces for the endpoints behind each channel.
//!
//! The multiplexer never calls a sink while holding its internal lock.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::SinkError;

/// Opaque registration token issued by a [`NetSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkHandle(pub u64);

/// Network-stack stand-in behind data channels.
pub trait NetSink: Send + Sync {
    /// Create the network endpoint for a data channel.
    fn register(&self, channel: u8, name: &str) -> Result<SinkHandle, SinkError>;

    /// Tear down an endpoint created by [`NetSink::register`].
    fn unregister(&self, handle: SinkHandle);

    /// Hand one received frame payload to the network stack.
    fn submit_inbound(&self, channel: u8, payload: &[u8]) -> Result<(), SinkError>;

    /// Next outbound unit waiting in the network stack for one of the
    /// `ready` channels, if any.
    ///
    /// Polled by the flush scheduler with the data channels whose queue has
    /// room. Units addressed to any other channel must stay in the sink, in
    /// their original per-channel order.
    fn take_outbound(&self, _ready: &[u8]) -> Option<(u8, Bytes)> {
        None
    }
}

/// TTY-layer stand-in behind stream channels.
pub trait StreamSink: Send + Sync {
    /// Create the port for a stream channel.
    fn register(&self, channel: u8, name: &str) -> Result<Arc<dyn StreamPort>, SinkError>;

    /// Tear down a port created by [`StreamSink::register`].
    fn unregister(&self, port: &Arc<dyn StreamPort>);
}

/// One registered stream endpoint (the flip-buffer side of a TTY).
pub trait StreamPort: Send + Sync {
    /// Whether a consumer currently has the port open.
    fn is_open(&self) -> bool;

    /// Request room for up to `max_len` bytes; returns the room granted.
    fn reserve(&self, max_len: usize) -> usize;

    /// Copy `data` into previously reserved room.
    fn commit(&self, data: &[u8]);

    /// Push committed bytes to the consumer.
    fn flush(&self);
}
