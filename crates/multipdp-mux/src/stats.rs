use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::error::DemuxError;

/// Link-wide counters, updated without taking the multiplexer lock.
#[derive(Debug, Default)]
pub struct MuxStats {
    frames_rx: AtomicU64,
    bytes_rx: AtomicU64,
    frames_tx: AtomicU64,
    bytes_tx: AtomicU64,
    bad_start: AtomicU64,
    bad_end: AtomicU64,
    malformed: AtomicU64,
    unknown_channel: AtomicU64,
    closed_channel_drops: AtomicU64,
    sink_errors: AtomicU64,
    stream_overruns: AtomicU64,
    queue_rejections: AtomicU64,
}

/// Copy of [`MuxStats`] at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub frames_rx: u64,
    pub bytes_rx: u64,
    pub frames_tx: u64,
    pub bytes_tx: u64,
    pub bad_start: u64,
    pub bad_end: u64,
    pub malformed: u64,
    pub unknown_channel: u64,
    pub closed_channel_drops: u64,
    pub sink_errors: u64,
    pub stream_overruns: u64,
    pub queue_rejections: u64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl MuxStats {
    pub(crate) fn frame_received(&self, len: usize) {
        bump(&self.frames_rx, 1);
        bump(&self.bytes_rx, len as u64);
    }

    pub(crate) fn frame_sent(&self, len: usize) {
        bump(&self.frames_tx, 1);
        bump(&self.bytes_tx, len as u64);
    }

    pub(crate) fn closed_drop(&self) {
        bump(&self.closed_channel_drops, 1);
    }

    pub(crate) fn sink_error(&self) {
        bump(&self.sink_errors, 1);
    }

    pub(crate) fn stream_overrun(&self) {
        bump(&self.stream_overruns, 1);
    }

    pub(crate) fn queue_rejection(&self) {
        bump(&self.queue_rejections, 1);
    }

    pub(crate) fn record_fault(&self, err: &DemuxError) {
        match err {
            DemuxError::BadStart(_) => bump(&self.bad_start, 1),
            DemuxError::BadEnd(_) => bump(&self.bad_end, 1),
            DemuxError::Malformed { .. } | DemuxError::Oversized { .. } => {
                bump(&self.malformed, 1)
            }
            DemuxError::UnknownChannel(_) => bump(&self.unknown_channel, 1),
            DemuxError::Transport(_) => {}
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            frames_rx: load(&self.frames_rx),
            bytes_rx: load(&self.bytes_rx),
            frames_tx: load(&self.frames_tx),
            bytes_tx: load(&self.bytes_tx),
            bad_start: load(&self.bad_start),
            bad_end: load(&self.bad_end),
            malformed: load(&self.malformed),
            unknown_channel: load(&self.unknown_channel),
            closed_channel_drops: load(&self.closed_channel_drops),
            sink_errors: load(&self.sink_errors),
            stream_overruns: load(&self.stream_overruns),
            queue_rejections: load(&self.queue_rejections),
        }
    }
}

impl StatsSnapshot {
    /// Framing and routing faults combined.
    pub fn faults(&self) -> u64 {
        self.bad_start + self.bad_end + self.malformed + self.unknown_channel
    }
}
