use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use multipdp_frame::{chunks, FrameConfig, FrameError, FrameReader, FrameWriter};
use tracing::{debug, trace, warn};

use crate::channel::{Channel, ChannelInfo, ChannelKind, ChannelType};
use crate::config::MuxConfig;
use crate::error::{DemuxError, MuxError, Result};
use crate::registry::Registry;
use crate::sink::{NetSink, StreamPort, StreamSink};
use crate::stats::{MuxStats, StatsSnapshot};

/// State guarded by the multiplexer lock.
pub(crate) struct MuxState<W> {
    pub(crate) registry: Registry,
    pub(crate) writer: FrameWriter<W>,
    pub(crate) id_adjustment: i32,
    /// Unit taken from the network sink whose ring filled up before it could
    /// be queued; placed ahead of anything else on the next pump.
    pub(crate) stalled: Option<(u8, Bytes)>,
}

/// Where a received frame goes once its header has been routed.
enum Route {
    Data,
    Stream(Arc<dyn StreamPort>),
}

/// Front of one data channel's ring, copied out for a send.
struct QueuedHead {
    channel: u8,
    generation: u64,
    unit: Bytes,
}

enum Queued {
    Yes,
    Full(Bytes),
    NoChannel,
}

fn queue_unit<W>(state: &mut MuxState<W>, channel: u8, unit: Bytes) -> Queued {
    match state.registry.find_by_id_mut(channel).map(Channel::kind_mut) {
        Some(ChannelKind::Data(data)) => match data.outbound.push(unit) {
            Ok(()) => Queued::Yes,
            Err(unit) => Queued::Full(unit),
        },
        _ => Queued::NoChannel,
    }
}

/// Data channels whose ring can take another unit, in slot order.
fn ready_channels(registry: &Registry) -> Vec<u8> {
    registry
        .iter()
        .filter_map(|channel| match channel.kind() {
            ChannelKind::Data(data) if !data.outbound.is_full() => Some(channel.id()),
            _ => None,
        })
        .collect()
}

/// The channel multiplexer.
///
/// Owns the registry and the transport writer under one lock. The lock is
/// held for one frame write or one registry lookup at a time and is always
/// released before a sink is called, so a sink may call back into the
/// multiplexer.
pub struct Multiplexer<W> {
    pub(crate) state: Mutex<MuxState<W>>,
    pub(crate) net: Arc<dyn NetSink>,
    pub(crate) streams: Arc<dyn StreamSink>,
    config: MuxConfig,
    pub(crate) stats: MuxStats,
    flush_signal: Mutex<Option<Sender<()>>>,
    generations: AtomicU64,
}

impl<W: Write> Multiplexer<W> {
    /// Build a multiplexer writing frames to `writer`.
    ///
    /// The registry starts empty; see [`Multiplexer::activate_defaults`].
    pub fn new(
        writer: W,
        net: Arc<dyn NetSink>,
        streams: Arc<dyn StreamSink>,
        config: MuxConfig,
    ) -> Self {
        let writer = FrameWriter::with_config(
            writer,
            FrameConfig {
                max_payload_size: config.max_payload,
            },
        );
        Self {
            state: Mutex::new(MuxState {
                registry: Registry::new(config.slot_count),
                writer,
                id_adjustment: config.id_adjustment,
                stalled: None,
            }),
            net,
            streams,
            config,
            stats: MuxStats::default(),
            flush_signal: Mutex::new(None),
            generations: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &MuxConfig {
        &self.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, MuxState<W>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registered channels in slot order.
    pub fn channels(&self) -> Vec<ChannelInfo> {
        self.lock().registry.iter().map(Channel::info).collect()
    }

    pub fn channel(&self, id: u8) -> Option<ChannelInfo> {
        self.lock().registry.find_by_id(id).map(Channel::info)
    }

    /// Current offset applied to data-channel activation ids.
    pub fn id_adjustment(&self) -> i32 {
        self.lock().id_adjustment
    }

    /// Replace the data-channel id offset; returns the new value.
    pub fn set_id_adjustment(&self, offset: i32) -> i32 {
        let mut state = self.lock();
        state.id_adjustment = offset;
        debug!(offset, "id adjustment updated");
        offset
    }

    /// Consume the multiplexer and return the transport writer.
    pub fn into_writer(self) -> W {
        self.state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .writer
            .into_inner()
    }

    /// Frame `payload` for `channel` and write it to the transport.
    ///
    /// Payloads longer than the frame maximum are split into consecutive
    /// frames; an empty payload is sent as one empty frame. The lock is taken
    /// per frame, so frames of concurrent senders may interleave but never
    /// overlap. Frames written before a failure are not retracted.
    pub fn mux_send(&self, channel: u8, payload: &[u8]) -> std::result::Result<(), FrameError> {
        for chunk in chunks(payload, self.config.max_payload) {
            self.lock().writer.write_frame(channel, chunk)?;
            self.stats.frame_sent(chunk.len());
        }
        trace!(channel, len = payload.len(), "payload sent");
        Ok(())
    }

    /// Read and route exactly one frame from `reader`.
    ///
    /// On every error other than [`DemuxError::Transport`] the stream is left
    /// positioned after the offending frame (or after the single bad byte for
    /// [`DemuxError::BadStart`]), so the caller simply calls again.
    pub fn demux_once<R: Read>(
        &self,
        reader: &mut FrameReader<R>,
    ) -> std::result::Result<(), DemuxError> {
        let result = self.demux_frame(reader);
        if let Err(err) = &result {
            self.stats.record_fault(err);
            match err {
                DemuxError::Transport(_) => {}
                DemuxError::BadStart(byte) => trace!(byte, "skipping byte outside frame"),
                other => warn!(error = %other, "frame dropped"),
            }
        }
        result
    }

    fn demux_frame<R: Read>(
        &self,
        reader: &mut FrameReader<R>,
    ) -> std::result::Result<(), DemuxError> {
        reader.read_start()?;
        let header = reader.read_header()?;
        let channel = header.channel;
        let Some(len) = header.payload_len() else {
            return Err(DemuxError::Malformed {
                length: header.length,
            });
        };

        if len > self.config.max_payload {
            reader.discard(len + 1)?;
            return Err(DemuxError::Oversized {
                size: len,
                max: self.config.max_payload,
            });
        }

        let Some(route) = self.route(channel, len) else {
            reader.discard(len + 1)?;
            return Err(DemuxError::UnknownChannel(channel));
        };

        if let Route::Stream(port) = &route {
            if !port.is_open() {
                reader.discard(len + 1)?;
                self.stats.closed_drop();
                debug!(channel, len, "stream channel closed; frame dropped");
                return Ok(());
            }
        }

        let payload = reader.read_payload(len)?;
        match &route {
            Route::Data => {
                if let Err(err) = self.net.submit_inbound(channel, payload) {
                    self.stats.sink_error();
                    warn!(channel, error = %err, "network sink dropped frame");
                }
            }
            Route::Stream(port) => self.deliver_stream(channel, port.as_ref(), payload),
        }

        reader.read_end()?;
        self.stats.frame_received(len);
        trace!(channel, len, "frame delivered");
        Ok(())
    }

    fn route(&self, channel: u8, len: usize) -> Option<Route> {
        let mut state = self.lock();
        match state.registry.find_by_id_mut(channel)?.kind_mut() {
            ChannelKind::Data(data) => {
                data.stats.rx_frames += 1;
                data.stats.rx_bytes += len as u64;
                Some(Route::Data)
            }
            ChannelKind::Stream(stream) => Some(Route::Stream(Arc::clone(&stream.port))),
        }
    }

    fn deliver_stream(&self, channel: u8, port: &dyn StreamPort, payload: &[u8]) {
        // The consumer may have closed the port since routing.
        if !port.is_open() {
            self.stats.closed_drop();
            return;
        }
        let mut rest = payload;
        while !rest.is_empty() {
            let granted = port.reserve(rest.len()).min(rest.len());
            if granted == 0 {
                self.stats.stream_overrun();
                warn!(channel, dropped = rest.len(), "stream port full");
                break;
            }
            port.commit(&rest[..granted]);
            rest = &rest[granted..];
        }
        port.flush();
    }

    /// Queue one outbound unit on a data channel and kick the flush scheduler.
    ///
    /// Fails with [`MuxError::QueueFull`] when the channel's ring is full; the
    /// queued units stay untouched and the new unit is not taken.
    pub fn transmit(&self, channel: u8, unit: Bytes) -> Result<()> {
        self.enqueue(channel, unit)?;
        self.schedule_flush();
        Ok(())
    }

    fn enqueue(&self, channel: u8, unit: Bytes) -> Result<()> {
        let mut state = self.lock();
        match state.registry.find_by_id_mut(channel).map(Channel::kind_mut) {
            None => Err(MuxError::UnknownChannel(channel)),
            Some(ChannelKind::Stream(_)) => Err(MuxError::WrongKind {
                channel,
                expected: ChannelType::Data,
            }),
            Some(ChannelKind::Data(data)) => match data.outbound.push(unit) {
                Ok(()) => Ok(()),
                Err(_) => {
                    data.stats.tx_rejected += 1;
                    self.stats.queue_rejection();
                    Err(MuxError::QueueFull(channel))
                }
            },
        }
    }

    /// Write `data` to a stream channel right away.
    ///
    /// Returns the number of bytes accepted, which is all of them on success.
    pub fn stream_write(&self, channel: u8, data: &[u8]) -> Result<usize> {
        let port = {
            let state = self.lock();
            match state.registry.find_by_id(channel).map(Channel::kind) {
                None => return Err(MuxError::UnknownChannel(channel)),
                Some(ChannelKind::Data(_)) => {
                    return Err(MuxError::WrongKind {
                        channel,
                        expected: ChannelType::Stream,
                    })
                }
                Some(ChannelKind::Stream(stream)) => Arc::clone(&stream.port),
            }
        };
        if !port.is_open() {
            return Err(MuxError::ChannelClosed(channel));
        }
        self.mux_send(channel, data)?;
        Ok(data.len())
    }

    /// Move units waiting in the network sink into data-channel rings.
    ///
    /// Only channels whose ring has room are offered to the sink, so a full
    /// ring holds its backlog in the sink without blocking other channels.
    /// A unit whose ring filled up after it was taken is kept as stalled and
    /// the pump stops until that ring drains. Returns the number of units
    /// queued.
    pub fn pump_outbound(&self) -> usize {
        let mut queued = 0usize;
        loop {
            let ready = {
                let mut guard = self.lock();
                let state = &mut *guard;
                if let Some((channel, unit)) = state.stalled.take() {
                    match queue_unit(state, channel, unit) {
                        Queued::Yes => queued += 1,
                        Queued::Full(unit) => {
                            state.stalled = Some((channel, unit));
                            break;
                        }
                        Queued::NoChannel => {
                            debug!(channel, "channel gone; stalled outbound unit discarded")
                        }
                    }
                }
                ready_channels(&state.registry)
            };
            if ready.is_empty() {
                break;
            }
            let Some((channel, unit)) = self.net.take_outbound(&ready) else {
                break;
            };

            let mut guard = self.lock();
            let state = &mut *guard;
            match queue_unit(state, channel, unit) {
                Queued::Yes => queued += 1,
                Queued::Full(unit) => {
                    trace!(channel, "ring filled concurrently; holding outbound unit");
                    state.stalled = Some((channel, unit));
                    break;
                }
                Queued::NoChannel => {
                    warn!(channel, "outbound unit for inactive channel discarded")
                }
            }
        }
        queued
    }

    /// Send every queued outbound unit, oldest first per channel.
    ///
    /// A unit leaves its ring only after it was fully written; on a transport
    /// failure it stays at the head for the next attempt. Returns the number
    /// of units sent.
    pub fn flush_pending(&self) -> Result<usize> {
        let mut sent = 0usize;
        while let Some(head) = self.next_queued() {
            self.mux_send(head.channel, &head.unit)?;
            self.complete_queued(&head);
            sent += 1;
        }
        if sent > 0 {
            trace!(sent, "outbound queues flushed");
        }
        Ok(sent)
    }

    /// Whether any data channel has units waiting.
    pub fn has_pending(&self) -> bool {
        self.lock().registry.iter().any(|channel| match channel.kind() {
            ChannelKind::Data(data) => !data.outbound.is_empty(),
            ChannelKind::Stream(_) => false,
        })
    }

    fn next_queued(&self) -> Option<QueuedHead> {
        self.lock()
            .registry
            .iter()
            .find_map(|channel| match channel.kind() {
                ChannelKind::Data(data) => data.outbound.peek().map(|unit| QueuedHead {
                    channel: channel.id(),
                    generation: data.generation,
                    unit: unit.clone(),
                }),
                ChannelKind::Stream(_) => None,
            })
    }

    /// Pop the unit `head` was peeked from, if it is still at the front.
    ///
    /// The channel may have been replaced while the lock was released for
    /// the send; a new activation's queue is left untouched.
    fn complete_queued(&self, head: &QueuedHead) {
        let mut state = self.lock();
        let Some(ChannelKind::Data(data)) = state
            .registry
            .find_by_id_mut(head.channel)
            .map(Channel::kind_mut)
        else {
            return;
        };
        let same_unit = data.generation == head.generation
            && data.outbound.peek().is_some_and(|unit| {
                unit.as_ptr() == head.unit.as_ptr() && unit.len() == head.unit.len()
            });
        if !same_unit {
            debug!(channel = head.channel, "queue changed during flush; unit left in place");
            return;
        }
        data.outbound.pop();
        data.stats.tx_units += 1;
        data.stats.tx_bytes += head.unit.len() as u64;
    }

    pub(crate) fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn attach_flush_signal(&self, signal: Sender<()>) {
        *self
            .flush_signal
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(signal);
    }

    pub(crate) fn detach_flush_signal(&self) {
        self.flush_signal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Wake the flush scheduler, if one is attached.
    pub fn schedule_flush(&self) {
        let signal = self
            .flush_signal
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(signal) = signal.as_ref() {
            let _ = signal.send(());
        }
    }
}

impl<W> std::fmt::Debug for Multiplexer<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("config", &self.config)
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor};

    use multipdp_frame::{CSD, END_MARKER, GPS, START_MARKER};

    use super::*;
    use crate::memory::{MemoryNetSink, MemoryStreamSink};

    /// Writer shared between the multiplexer and the test.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn bytes(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Writer failing until `allow` is set.
    #[derive(Clone, Default)]
    struct GatedBuf {
        open: Arc<std::sync::atomic::AtomicBool>,
        inner: SharedBuf,
    }

    impl Write for GatedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.open.load(std::sync::atomic::Ordering::SeqCst) {
                self.inner.write(buf)
            } else {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "link down"))
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Fixture<W> {
        mux: Multiplexer<W>,
        net: Arc<MemoryNetSink>,
        streams: Arc<MemoryStreamSink>,
    }

    fn fixture<W: Write>(writer: W, config: MuxConfig) -> Fixture<W> {
        let net = Arc::new(MemoryNetSink::new());
        let streams = Arc::new(MemoryStreamSink::new());
        let mux = Multiplexer::new(writer, net.clone(), streams.clone(), config);
        Fixture { mux, net, streams }
    }

    fn wire(frames: &[(u8, &str)]) -> Vec<u8> {
        let mut writer = FrameWriter::new(Vec::new());
        for (channel, payload) in frames {
            writer.write_frame(*channel, payload.as_bytes()).unwrap();
        }
        writer.into_inner()
    }

    fn reader(bytes: Vec<u8>) -> FrameReader<Cursor<Vec<u8>>> {
        FrameReader::new(Cursor::new(bytes))
    }

    #[test]
    fn long_payload_is_split_into_max_sized_frames() {
        let buf = SharedBuf::default();
        let fx = fixture(buf.clone(), MuxConfig::default());
        let payload = vec![0xAB; 1501];

        fx.mux.mux_send(3, &payload).unwrap();

        let mut frames = FrameReader::new(Cursor::new(buf.bytes()));
        assert_eq!(frames.read_frame().unwrap().payload.len(), 1500);
        assert_eq!(frames.read_frame().unwrap().payload.len(), 1);
        assert!(matches!(
            frames.read_frame(),
            Err(FrameError::ConnectionClosed)
        ));
        assert_eq!(fx.mux.stats().frames_tx, 2);
    }

    #[test]
    fn empty_payload_sends_one_empty_frame() {
        let buf = SharedBuf::default();
        let fx = fixture(buf.clone(), MuxConfig::default());

        fx.mux.mux_send(7, &[]).unwrap();

        assert_eq!(buf.bytes(), vec![START_MARKER, 4, 0, 7, 0, END_MARKER]);
    }

    #[test]
    fn data_frames_reach_network_sink() {
        let fx = fixture(Vec::new(), MuxConfig::default());
        fx.mux.activate(1, ChannelType::Data, false).unwrap();

        let mut r = reader(wire(&[(1, "hello")]));
        fx.mux.demux_once(&mut r).unwrap();

        assert_eq!(fx.net.inbound_bytes(1), b"hello");
        let info = fx.mux.channel(1).unwrap();
        assert_eq!(info.stats.unwrap().rx_frames, 1);
    }

    #[test]
    fn stream_frames_reach_port_with_one_flush() {
        let streams = Arc::new(MemoryStreamSink::with_room(3));
        let mux = Multiplexer::new(
            Vec::new(),
            Arc::new(MemoryNetSink::new()),
            streams.clone(),
            MuxConfig::default(),
        );
        mux.activate(i32::from(GPS), ChannelType::Stream, true).unwrap();

        let mut r = reader(wire(&[(GPS, "$GPGGA")]));
        mux.demux_once(&mut r).unwrap();

        let port = streams.port(GPS).unwrap();
        assert_eq!(port.received(), b"$GPGGA");
        assert_eq!(port.flush_count(), 1);
    }

    #[test]
    fn unknown_channel_is_drained() {
        let fx = fixture(Vec::new(), MuxConfig::default());
        fx.mux.activate(2, ChannelType::Data, false).unwrap();

        let mut r = reader(wire(&[(9, "lost"), (2, "kept")]));
        assert!(matches!(
            fx.mux.demux_once(&mut r),
            Err(DemuxError::UnknownChannel(9))
        ));
        fx.mux.demux_once(&mut r).unwrap();

        assert_eq!(fx.net.inbound(), vec![(2, Bytes::from_static(b"kept"))]);
        assert_eq!(fx.mux.stats().unknown_channel, 1);
    }

    #[test]
    fn garbage_before_frame_costs_one_call_per_byte() {
        let fx = fixture(Vec::new(), MuxConfig::default());
        fx.mux.activate(2, ChannelType::Data, false).unwrap();

        let mut bytes = vec![0x00, 0x42];
        bytes.extend(wire(&[(2, "ok")]));
        let mut r = reader(bytes);

        assert!(matches!(fx.mux.demux_once(&mut r), Err(DemuxError::BadStart(0x00))));
        assert!(matches!(fx.mux.demux_once(&mut r), Err(DemuxError::BadStart(0x42))));
        fx.mux.demux_once(&mut r).unwrap();
        assert_eq!(fx.net.inbound_bytes(2), b"ok");
        assert_eq!(fx.mux.stats().bad_start, 2);
    }

    #[test]
    fn bad_end_marker_is_reported_after_delivery() {
        let fx = fixture(Vec::new(), MuxConfig::default());
        fx.mux.activate(2, ChannelType::Data, false).unwrap();

        let mut bytes = wire(&[(2, "ab")]);
        let last = bytes.len() - 1;
        bytes[last] = 0x00;
        bytes.extend(wire(&[(2, "cd")]));
        let mut r = reader(bytes);

        assert!(matches!(fx.mux.demux_once(&mut r), Err(DemuxError::BadEnd(0x00))));
        fx.mux.demux_once(&mut r).unwrap();
        assert_eq!(fx.net.inbound_bytes(2), b"abcd");
    }

    #[test]
    fn short_length_is_malformed() {
        let fx = fixture(Vec::new(), MuxConfig::default());
        let mut r = reader(vec![START_MARKER, 2, 0, 1, 0]);

        assert!(matches!(
            fx.mux.demux_once(&mut r),
            Err(DemuxError::Malformed { length: 2 })
        ));
    }

    #[test]
    fn oversized_frame_is_drained() {
        let config = MuxConfig {
            max_payload: 4,
            ..MuxConfig::default()
        };
        let fx = fixture(Vec::new(), config);
        fx.mux.activate(2, ChannelType::Data, false).unwrap();

        let mut bytes = wire(&[(2, "too long")]);
        bytes.extend(wire(&[(2, "fits")]));
        let mut r = reader(bytes);

        assert!(matches!(
            fx.mux.demux_once(&mut r),
            Err(DemuxError::Oversized { size: 8, max: 4 })
        ));
        fx.mux.demux_once(&mut r).unwrap();
        assert_eq!(fx.net.inbound_bytes(2), b"fits");
    }

    #[test]
    fn closed_stream_drops_frame_silently() {
        let fx = fixture(Vec::new(), MuxConfig::default());
        fx.mux.activate(i32::from(CSD), ChannelType::Stream, true).unwrap();
        fx.streams.port(CSD).unwrap().set_open(false);

        let mut r = reader(wire(&[(CSD, "ATD"), (CSD, "ATH")]));
        fx.mux.demux_once(&mut r).unwrap();
        fx.streams.port(CSD).unwrap().set_open(true);
        fx.mux.demux_once(&mut r).unwrap();

        assert_eq!(fx.streams.port(CSD).unwrap().received(), b"ATH");
        assert_eq!(fx.mux.stats().closed_channel_drops, 1);
    }

    #[test]
    fn full_stream_port_counts_overrun() {
        let fx = fixture(Vec::new(), MuxConfig::default());
        fx.mux.activate(i32::from(GPS), ChannelType::Stream, true).unwrap();
        fx.streams.port(GPS).unwrap().set_room(0);

        let mut r = reader(wire(&[(GPS, "fix")]));
        fx.mux.demux_once(&mut r).unwrap();

        assert!(fx.streams.port(GPS).unwrap().received().is_empty());
        assert_eq!(fx.mux.stats().stream_overruns, 1);
    }

    #[test]
    fn network_rejection_keeps_stream_aligned() {
        let fx = fixture(Vec::new(), MuxConfig::default());
        fx.mux.activate(1, ChannelType::Data, false).unwrap();
        fx.net.reject_inbound(true);

        let mut r = reader(wire(&[(1, "a"), (1, "b")]));
        fx.mux.demux_once(&mut r).unwrap();
        fx.net.reject_inbound(false);
        fx.mux.demux_once(&mut r).unwrap();

        assert_eq!(fx.net.inbound_bytes(1), b"b");
        assert_eq!(fx.mux.stats().sink_errors, 1);
    }

    #[test]
    fn eof_is_a_transport_error() {
        let fx = fixture(Vec::new(), MuxConfig::default());
        let err = fx.mux.demux_once(&mut reader(Vec::new())).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn transmit_rejects_when_ring_is_full() {
        let config = MuxConfig {
            ring_capacity: 3,
            ..MuxConfig::default()
        };
        let fx = fixture(Vec::new(), config);
        fx.mux.activate(1, ChannelType::Data, false).unwrap();

        fx.mux.transmit(1, Bytes::from_static(b"one")).unwrap();
        fx.mux.transmit(1, Bytes::from_static(b"two")).unwrap();
        assert!(matches!(
            fx.mux.transmit(1, Bytes::from_static(b"three")),
            Err(MuxError::QueueFull(1))
        ));
        assert_eq!(fx.mux.channel(1).unwrap().queued, Some(2));
        assert_eq!(fx.mux.stats().queue_rejections, 1);
    }

    #[test]
    fn transmit_needs_a_data_channel() {
        let fx = fixture(Vec::new(), MuxConfig::default());
        fx.mux.activate(i32::from(CSD), ChannelType::Stream, true).unwrap();

        assert!(matches!(
            fx.mux.transmit(4, Bytes::new()),
            Err(MuxError::UnknownChannel(4))
        ));
        assert!(matches!(
            fx.mux.transmit(CSD, Bytes::new()),
            Err(MuxError::WrongKind { channel: CSD, expected: ChannelType::Data })
        ));
    }

    #[test]
    fn flush_sends_queued_units_in_order() {
        let buf = SharedBuf::default();
        let fx = fixture(buf.clone(), MuxConfig::default());
        fx.mux.activate(1, ChannelType::Data, false).unwrap();
        fx.mux.transmit(1, Bytes::from_static(b"first")).unwrap();
        fx.mux.transmit(1, Bytes::from_static(b"second")).unwrap();

        assert!(fx.mux.has_pending());
        assert_eq!(fx.mux.flush_pending().unwrap(), 2);
        assert!(!fx.mux.has_pending());

        let mut frames = FrameReader::new(Cursor::new(buf.bytes()));
        assert_eq!(&frames.read_frame().unwrap().payload[..], b"first");
        assert_eq!(&frames.read_frame().unwrap().payload[..], b"second");
        let stats = fx.mux.channel(1).unwrap().stats.unwrap();
        assert_eq!((stats.tx_units, stats.tx_bytes), (2, 11));
    }

    #[test]
    fn failed_flush_keeps_unit_for_retry() {
        let gated = GatedBuf::default();
        let fx = fixture(gated.clone(), MuxConfig::default());
        fx.mux.activate(1, ChannelType::Data, false).unwrap();
        fx.mux.transmit(1, Bytes::from_static(b"retry me")).unwrap();

        assert!(fx.mux.flush_pending().is_err());
        assert_eq!(fx.mux.channel(1).unwrap().queued, Some(1));

        gated.open.store(true, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(fx.mux.flush_pending().unwrap(), 1);
        let mut frames = FrameReader::new(Cursor::new(gated.inner.bytes()));
        assert_eq!(&frames.read_frame().unwrap().payload[..], b"retry me");
    }

    #[test]
    fn pump_pulls_outbound_while_room_remains() {
        let config = MuxConfig {
            ring_capacity: 3,
            ..MuxConfig::default()
        };
        let fx = fixture(Vec::new(), config);
        fx.mux.activate(1, ChannelType::Data, false).unwrap();
        for unit in [&b"a"[..], b"b", b"c"] {
            fx.net.queue_outbound(1, unit);
        }

        assert_eq!(fx.mux.pump_outbound(), 2);
        assert_eq!(fx.net.pending_outbound(), 1);
        assert_eq!(fx.mux.channel(1).unwrap().queued, Some(2));
    }

    #[test]
    fn full_ring_leaves_its_backlog_in_the_sink() {
        let config = MuxConfig {
            ring_capacity: 2,
            ..MuxConfig::default()
        };
        let fx = fixture(Vec::new(), config);
        fx.mux.activate(1, ChannelType::Data, false).unwrap();
        fx.mux.activate(2, ChannelType::Data, false).unwrap();
        fx.mux.transmit(1, Bytes::from_static(b"queued")).unwrap();
        fx.net.queue_outbound(1, &b"waiting"[..]);
        fx.net.queue_outbound(2, &b"other"[..]);

        assert_eq!(fx.mux.pump_outbound(), 1);
        assert_eq!(fx.net.pending_outbound(), 1);
        assert_eq!(fx.mux.channel(1).unwrap().queued, Some(1));
        assert_eq!(fx.mux.channel(2).unwrap().queued, Some(1));

        assert_eq!(fx.mux.flush_pending().unwrap(), 2);
        assert_eq!(fx.mux.pump_outbound(), 1);
        assert_eq!(fx.net.pending_outbound(), 0);
        assert_eq!(fx.mux.channel(1).unwrap().queued, Some(1));
    }

    #[test]
    fn stalled_unit_is_queued_before_new_ones() {
        let config = MuxConfig {
            ring_capacity: 2,
            ..MuxConfig::default()
        };
        let fx = fixture(SharedBuf::default(), config);
        fx.mux.activate(1, ChannelType::Data, false).unwrap();
        fx.mux.transmit(1, Bytes::from_static(b"first")).unwrap();
        fx.mux.lock().stalled = Some((1, Bytes::from_static(b"second")));
        fx.net.queue_outbound(1, &b"third"[..]);

        assert_eq!(fx.mux.pump_outbound(), 0);
        assert!(fx.mux.lock().stalled.is_some());
        assert_eq!(fx.net.pending_outbound(), 1);

        assert_eq!(fx.mux.flush_pending().unwrap(), 1);
        assert_eq!(fx.mux.pump_outbound(), 1);
        assert!(fx.mux.lock().stalled.is_none());
        assert_eq!(fx.net.pending_outbound(), 1);

        assert_eq!(fx.mux.flush_pending().unwrap(), 1);
        assert_eq!(fx.mux.pump_outbound(), 1);
        assert_eq!(fx.mux.flush_pending().unwrap(), 1);
    }

    #[test]
    fn replaced_channel_keeps_its_unsent_unit() {
        let fx = fixture(Vec::new(), MuxConfig::default());
        fx.mux.activate(1, ChannelType::Data, false).unwrap();
        fx.mux.transmit(1, Bytes::from_static(b"old")).unwrap();
        let head = fx.mux.next_queued().unwrap();

        fx.mux.deactivate(1, false).unwrap();
        fx.mux.activate(1, ChannelType::Data, false).unwrap();
        fx.mux.transmit(1, Bytes::from_static(b"old")).unwrap();
        fx.mux.complete_queued(&head);

        let info = fx.mux.channel(1).unwrap();
        assert_eq!(info.queued, Some(1));
        assert_eq!(info.stats.unwrap().tx_units, 0);
    }

    #[test]
    fn stream_write_checks_kind_and_open_state() {
        let buf = SharedBuf::default();
        let fx = fixture(buf.clone(), MuxConfig::default());
        fx.mux.activate(i32::from(CSD), ChannelType::Stream, true).unwrap();
        fx.mux.activate(2, ChannelType::Data, false).unwrap();

        assert_eq!(fx.mux.stream_write(CSD, b"AT\r").unwrap(), 3);
        assert!(matches!(
            fx.mux.stream_write(2, b"x"),
            Err(MuxError::WrongKind { channel: 2, expected: ChannelType::Stream })
        ));
        assert!(matches!(
            fx.mux.stream_write(9, b"x"),
            Err(MuxError::UnknownChannel(9))
        ));
        fx.streams.port(CSD).unwrap().set_open(false);
        assert!(matches!(
            fx.mux.stream_write(CSD, b"x"),
            Err(MuxError::ChannelClosed(CSD))
        ));

        let mut frames = FrameReader::new(Cursor::new(buf.bytes()));
        let frame = frames.read_frame().unwrap();
        assert_eq!((frame.channel, &frame.payload[..]), (CSD, &b"AT\r"[..]));
    }

    #[test]
    fn concurrent_senders_never_split_a_frame() {
        let buf = SharedBuf::default();
        let fx = fixture(buf.clone(), MuxConfig::default());
        let mux = Arc::new(fx.mux);

        let workers: Vec<_> = (1u8..=4)
            .map(|channel| {
                let mux = Arc::clone(&mux);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        mux.mux_send(channel, &[channel; 300]).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let mut frames = FrameReader::new(Cursor::new(buf.bytes()));
        let mut count = 0;
        while let Ok(frame) = frames.read_frame() {
            assert!(frame.payload.iter().all(|b| *b == frame.channel));
            count += 1;
        }
        assert_eq!(count, 200);
    }

    #[test]
    fn into_writer_returns_transport() {
        let fx = fixture(Vec::new(), MuxConfig::default());
        fx.mux.mux_send(1, b"x").unwrap();
        assert_eq!(fx.mux.into_writer(), wire(&[(1, "x")]));
    }
}
