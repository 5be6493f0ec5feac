//! In-memory sinks.
//!
//! They record every registration and delivery so a link can be driven end
//! to end without a network stack or TTY layer. Built for unit tests and,
//! behind the `testing` feature, for integration tests of dependent crates.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};

use crate::error::SinkError;
use crate::sink::{NetSink, SinkHandle, StreamPort, StreamSink};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct NetState {
    next_handle: u64,
    registered: Vec<(SinkHandle, u8, String)>,
    unregistered: Vec<SinkHandle>,
    inbound: Vec<(u8, Bytes)>,
    outbound: VecDeque<(u8, Bytes)>,
}

/// Network sink that stores inbound payloads and serves queued outbound units.
#[derive(Debug, Default)]
pub struct MemoryNetSink {
    state: Mutex<NetState>,
    refuse_register: AtomicBool,
    reject_inbound: AtomicBool,
}

impl MemoryNetSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent registrations fail.
    pub fn refuse_registrations(&self, refuse: bool) {
        self.refuse_register.store(refuse, Ordering::SeqCst);
    }

    /// Make subsequent inbound submissions fail.
    pub fn reject_inbound(&self, reject: bool) {
        self.reject_inbound.store(reject, Ordering::SeqCst);
    }

    /// Queue a unit for [`NetSink::take_outbound`].
    pub fn queue_outbound(&self, channel: u8, unit: impl Into<Bytes>) {
        lock(&self.state).outbound.push_back((channel, unit.into()));
    }

    /// Every payload submitted so far, in arrival order.
    pub fn inbound(&self) -> Vec<(u8, Bytes)> {
        lock(&self.state).inbound.clone()
    }

    /// Concatenated payloads received on `channel`.
    pub fn inbound_bytes(&self, channel: u8) -> Vec<u8> {
        lock(&self.state)
            .inbound
            .iter()
            .filter(|(id, _)| *id == channel)
            .flat_map(|(_, payload)| payload.iter().copied())
            .collect()
    }

    /// Names of endpoints currently registered.
    pub fn registered_names(&self) -> Vec<String> {
        lock(&self.state)
            .registered
            .iter()
            .map(|(_, _, name)| name.clone())
            .collect()
    }

    pub fn unregistered_count(&self) -> usize {
        lock(&self.state).unregistered.len()
    }

    pub fn pending_outbound(&self) -> usize {
        lock(&self.state).outbound.len()
    }
}

impl NetSink for MemoryNetSink {
    fn register(&self, channel: u8, name: &str) -> Result<SinkHandle, SinkError> {
        if self.refuse_register.load(Ordering::SeqCst) {
            return Err(SinkError::Refused(format!("{name} refused")));
        }
        let mut state = lock(&self.state);
        state.next_handle += 1;
        let handle = SinkHandle(state.next_handle);
        state.registered.push((handle, channel, name.to_string()));
        Ok(handle)
    }

    fn unregister(&self, handle: SinkHandle) {
        let mut state = lock(&self.state);
        state.registered.retain(|(registered, _, _)| *registered != handle);
        state.unregistered.push(handle);
    }

    fn submit_inbound(&self, channel: u8, payload: &[u8]) -> Result<(), SinkError> {
        if self.reject_inbound.load(Ordering::SeqCst) {
            return Err(SinkError::Rejected("inbound disabled".into()));
        }
        lock(&self.state)
            .inbound
            .push((channel, Bytes::copy_from_slice(payload)));
        Ok(())
    }

    fn take_outbound(&self, ready: &[u8]) -> Option<(u8, Bytes)> {
        let mut state = lock(&self.state);
        let position = state
            .outbound
            .iter()
            .position(|(channel, _)| ready.contains(channel))?;
        state.outbound.remove(position)
    }
}

#[derive(Debug, Default)]
struct PortState {
    pending: BytesMut,
    delivered: Vec<Bytes>,
    flushes: usize,
}

/// Stream port with a bounded per-reservation room, like a TTY flip buffer.
#[derive(Debug)]
pub struct MemoryPort {
    channel: u8,
    name: String,
    room: AtomicUsize,
    open: AtomicBool,
    state: Mutex<PortState>,
}

impl MemoryPort {
    fn new(channel: u8, name: &str, room: usize) -> Self {
        Self {
            channel,
            name: name.to_string(),
            room: AtomicUsize::new(room),
            open: AtomicBool::new(true),
            state: Mutex::new(PortState::default()),
        }
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Simulate a consumer opening or closing the port.
    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    /// Largest grant per reservation; zero simulates a full buffer.
    pub fn set_room(&self, room: usize) {
        self.room.store(room, Ordering::SeqCst);
    }

    /// Bytes pushed per flush, in order (empty flushes are not recorded).
    pub fn deliveries(&self) -> Vec<Bytes> {
        lock(&self.state).delivered.clone()
    }

    /// All delivered bytes concatenated.
    pub fn received(&self) -> Vec<u8> {
        lock(&self.state)
            .delivered
            .iter()
            .flat_map(|chunk| chunk.iter().copied())
            .collect()
    }

    pub fn flush_count(&self) -> usize {
        lock(&self.state).flushes
    }
}

impl StreamPort for MemoryPort {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn reserve(&self, max_len: usize) -> usize {
        max_len.min(self.room.load(Ordering::SeqCst))
    }

    fn commit(&self, data: &[u8]) {
        lock(&self.state).pending.extend_from_slice(data);
    }

    fn flush(&self) {
        let mut state = lock(&self.state);
        state.flushes += 1;
        if !state.pending.is_empty() {
            let chunk = state.pending.split().freeze();
            state.delivered.push(chunk);
        }
    }
}

/// Stream sink handing out [`MemoryPort`]s.
#[derive(Debug)]
pub struct MemoryStreamSink {
    ports: Mutex<Vec<Arc<MemoryPort>>>,
    room: usize,
    refuse_register: AtomicBool,
    refused_channels: Mutex<Vec<u8>>,
}

impl MemoryStreamSink {
    /// Default reservation room, matching a typical TTY flip buffer chunk.
    pub const DEFAULT_ROOM: usize = 512;

    pub fn new() -> Self {
        Self::with_room(Self::DEFAULT_ROOM)
    }

    /// Ports created by this sink grant at most `room` bytes per reservation.
    pub fn with_room(room: usize) -> Self {
        Self {
            ports: Mutex::new(Vec::new()),
            room,
            refuse_register: AtomicBool::new(false),
            refused_channels: Mutex::new(Vec::new()),
        }
    }

    pub fn refuse_registrations(&self, refuse: bool) {
        self.refuse_register.store(refuse, Ordering::SeqCst);
    }

    /// Refuse registrations for `channel` only.
    pub fn refuse_channel(&self, channel: u8) {
        lock(&self.refused_channels).push(channel);
    }

    /// The registered port for `channel`, if any.
    pub fn port(&self, channel: u8) -> Option<Arc<MemoryPort>> {
        lock(&self.ports)
            .iter()
            .find(|port| port.channel == channel)
            .cloned()
    }

    pub fn port_names(&self) -> Vec<String> {
        lock(&self.ports)
            .iter()
            .map(|port| port.name.clone())
            .collect()
    }
}

impl Default for MemoryStreamSink {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSink for MemoryStreamSink {
    fn register(&self, channel: u8, name: &str) -> Result<Arc<dyn StreamPort>, SinkError> {
        if self.refuse_register.load(Ordering::SeqCst)
            || lock(&self.refused_channels).contains(&channel)
        {
            return Err(SinkError::Refused(format!("{name} refused")));
        }
        let port = Arc::new(MemoryPort::new(channel, name, self.room));
        lock(&self.ports).push(Arc::clone(&port));
        Ok(port)
    }

    fn unregister(&self, port: &Arc<dyn StreamPort>) {
        let target = Arc::as_ptr(port) as *const ();
        lock(&self.ports).retain(|candidate| {
            if Arc::as_ptr(candidate) as *const () == target {
                candidate.set_open(false);
                false
            } else {
                true
            }
        });
    }
}
