use std::io::Write;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::channel::{
    sink_name, Channel, ChannelKind, ChannelType, DataState, StreamState, STREAM_CHANNELS,
};
use crate::error::{ActivationError, DeactivationError, Exhausted, RegistryError};
use crate::mux::{MuxState, Multiplexer};
use crate::registry::InsertError;

/// Result of a successful activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivationInfo {
    /// Id the channel is registered under on the wire.
    pub effective_id: u8,
    /// Name of the sink endpoint created for it.
    pub sink_name: String,
}

impl<W: Write> Multiplexer<W> {
    /// Create a channel and its sink endpoint.
    ///
    /// Data-channel ids are shifted by the current id adjustment; stream ids
    /// are used as given. The sink is registered with the lock released, and
    /// if the slot is lost in the meantime the sink is unregistered again.
    pub fn activate(
        &self,
        requested_id: i32,
        kind: ChannelType,
        sticky: bool,
    ) -> Result<ActivationInfo, ActivationError> {
        let id = {
            let state = self.lock();
            let effective = match kind {
                ChannelType::Data => requested_id.saturating_add(state.id_adjustment),
                ChannelType::Stream => requested_id,
            };
            let id = u8::try_from(effective).map_err(|_| ActivationError::InvalidId(effective))?;
            if state.registry.find_by_id(id).is_some() {
                return Err(ActivationError::AlreadyActive(id));
            }
            if state.registry.is_full() {
                return Err(ActivationError::ResourceExhausted {
                    channel: id,
                    reason: Exhausted::NoFreeSlot,
                });
            }
            id
        };

        let name = sink_name(kind, id);
        let exhausted = |err| ActivationError::ResourceExhausted {
            channel: id,
            reason: Exhausted::Sink(err),
        };
        let channel_kind = match kind {
            ChannelType::Data => {
                let handle = self.net.register(id, &name).map_err(exhausted)?;
                let mut data = DataState::new(name.clone(), handle, self.config().ring_capacity);
                data.generation = self.next_generation();
                ChannelKind::Data(data)
            }
            ChannelType::Stream => {
                let port = self.streams.register(id, &name).map_err(exhausted)?;
                ChannelKind::Stream(StreamState::new(name.clone(), port))
            }
        };

        let inserted = self
            .lock()
            .registry
            .insert(Channel::new(id, sticky, channel_kind));
        match inserted {
            Ok(slot) => {
                info!(channel = id, %kind, sticky, sink = %name, slot, "channel activated");
                Ok(ActivationInfo {
                    effective_id: id,
                    sink_name: name,
                })
            }
            Err(InsertError { error, channel }) => {
                self.teardown(channel);
                Err(match error {
                    RegistryError::AlreadyExists(id) => ActivationError::AlreadyActive(id),
                    RegistryError::NoSpace => ActivationError::ResourceExhausted {
                        channel: id,
                        reason: Exhausted::NoFreeSlot,
                    },
                })
            }
        }
    }

    /// Remove a channel and tear down its sink endpoint.
    ///
    /// `requested_id` is first resolved through the id adjustment, which only
    /// matches a data channel; otherwise it names a stream channel directly.
    pub fn deactivate(&self, requested_id: i32, force: bool) -> Result<(), DeactivationError> {
        let channel = {
            let mut state = self.lock();
            let id = resolve_deactivation(&state, requested_id)
                .ok_or(DeactivationError::NotFound(requested_id))?;
            let sticky = state
                .registry
                .find_by_id(id)
                .is_some_and(Channel::is_sticky);
            if sticky && !force {
                return Err(DeactivationError::Sticky(id));
            }
            state
                .registry
                .remove_by_id(id)
                .ok_or(DeactivationError::NotFound(requested_id))?
        };

        info!(channel = channel.id(), kind = %channel.channel_type(), force, "channel deactivated");
        self.teardown(channel);
        Ok(())
    }

    /// Remove every channel, sticky or not, in slot order.
    ///
    /// Returns the number of channels torn down.
    pub fn shutdown_all(&self) -> usize {
        let drained: Vec<Channel> = {
            let mut state = self.lock();
            if let Some((channel, _)) = state.stalled.take() {
                debug!(channel, "discarding stalled outbound unit");
            }
            (0..state.registry.capacity())
                .filter_map(|slot| state.registry.remove_slot(slot))
                .collect()
        };
        let count = drained.len();
        for channel in drained {
            self.teardown(channel);
        }
        info!(channels = count, "all channels shut down");
        count
    }

    /// Activate the built-in stream channels (CSD, ROUTER, GPS).
    ///
    /// All or nothing: if one activation fails, the channels brought up before
    /// it are torn down again, newest first.
    pub fn activate_defaults(&self) -> Result<Vec<ActivationInfo>, ActivationError> {
        let mut activated: Vec<ActivationInfo> = Vec::with_capacity(STREAM_CHANNELS.len());
        for spec in &STREAM_CHANNELS {
            match self.activate(i32::from(spec.id), ChannelType::Stream, spec.sticky) {
                Ok(info) => activated.push(info),
                Err(err) => {
                    for info in activated.iter().rev() {
                        let removed = self.lock().registry.remove_by_id(info.effective_id);
                        if let Some(channel) = removed {
                            self.teardown(channel);
                        }
                    }
                    warn!(channel = spec.id, error = %err, "default channels rolled back");
                    return Err(err);
                }
            }
        }
        Ok(activated)
    }

    fn teardown(&self, channel: Channel) {
        let id = channel.id();
        match channel.into_kind() {
            ChannelKind::Data(mut data) => {
                let dropped = data.outbound.clear();
                if dropped > 0 {
                    debug!(channel = id, dropped, "discarding queued outbound units");
                }
                self.net.unregister(data.handle);
            }
            ChannelKind::Stream(stream) => self.streams.unregister(&stream.port),
        }
    }
}

fn resolve_deactivation<W>(state: &MuxState<W>, requested_id: i32) -> Option<u8> {
    let adjusted = requested_id
        .checked_add(state.id_adjustment)
        .and_then(|id| u8::try_from(id).ok());
    if let Some(id) = adjusted {
        let is_data = state
            .registry
            .find_by_id(id)
            .is_some_and(|channel| channel.channel_type() == ChannelType::Data);
        if is_data {
            return Some(id);
        }
    }

    let id = u8::try_from(requested_id).ok()?;
    state
        .registry
        .find_by_id(id)
        .filter(|channel| channel.channel_type() == ChannelType::Stream)
        .map(Channel::id)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use multipdp_frame::{CSD, GPS, ROUTER};

    use super::*;
    use crate::config::MuxConfig;
    use crate::memory::{MemoryNetSink, MemoryStreamSink};

    fn mux_with(config: MuxConfig) -> (Multiplexer<Vec<u8>>, Arc<MemoryNetSink>, Arc<MemoryStreamSink>) {
        let net = Arc::new(MemoryNetSink::new());
        let streams = Arc::new(MemoryStreamSink::new());
        let mux = Multiplexer::new(Vec::new(), net.clone(), streams.clone(), config);
        (mux, net, streams)
    }

    fn mux() -> (Multiplexer<Vec<u8>>, Arc<MemoryNetSink>, Arc<MemoryStreamSink>) {
        mux_with(MuxConfig::default())
    }

    #[test]
    fn data_activation_registers_network_endpoint() {
        let (mux, net, _) = mux();
        let info = mux.activate(3, ChannelType::Data, false).unwrap();

        assert_eq!(info.effective_id, 3);
        assert_eq!(info.sink_name, "pdp2");
        assert_eq!(net.registered_names(), vec!["pdp2".to_string()]);
    }

    #[test]
    fn defaults_bring_up_sticky_streams() {
        let (mux, _, streams) = mux();
        let infos = mux.activate_defaults().unwrap();

        let ids: Vec<u8> = infos.iter().map(|info| info.effective_id).collect();
        assert_eq!(ids, vec![CSD, ROUTER, GPS]);
        assert_eq!(streams.port_names(), vec!["ttyCSD", "ttyROUTER", "ttyGPS"]);
        assert!(mux.channels().iter().all(|info| info.sticky));
    }

    #[test]
    fn failed_default_rolls_back_earlier_streams() {
        let (mux, _, streams) = mux();
        streams.refuse_channel(ROUTER);

        let err = mux.activate_defaults().unwrap_err();
        assert!(matches!(
            err,
            ActivationError::ResourceExhausted { channel: ROUTER, .. }
        ));
        assert!(streams.port_names().is_empty());
        assert!(mux.channels().is_empty());
    }

    #[test]
    fn duplicate_activation_is_rejected() {
        let (mux, net, _) = mux();
        mux.activate(2, ChannelType::Data, false).unwrap();

        assert_eq!(
            mux.activate(2, ChannelType::Data, false),
            Err(ActivationError::AlreadyActive(2))
        );
        assert_eq!(net.registered_names().len(), 1);
        assert_eq!(mux.channels().len(), 1);
    }

    #[test]
    fn full_registry_reports_no_free_slot() {
        let (mux, _, _) = mux_with(MuxConfig {
            slot_count: 1,
            ..MuxConfig::default()
        });
        mux.activate(1, ChannelType::Data, false).unwrap();

        assert_eq!(
            mux.activate(2, ChannelType::Data, false),
            Err(ActivationError::ResourceExhausted {
                channel: 2,
                reason: Exhausted::NoFreeSlot,
            })
        );
    }

    #[test]
    fn refused_sink_leaves_registry_untouched() {
        let (mux, net, streams) = mux();
        net.refuse_registrations(true);
        streams.refuse_registrations(true);

        assert!(matches!(
            mux.activate(1, ChannelType::Data, false),
            Err(ActivationError::ResourceExhausted {
                channel: 1,
                reason: Exhausted::Sink(_),
            })
        ));
        assert!(mux.activate(GPS.into(), ChannelType::Stream, true).is_err());
        assert!(mux.channels().is_empty());
    }

    #[test]
    fn out_of_range_id_is_invalid() {
        let (mux, _, _) = mux();
        assert_eq!(
            mux.activate(256, ChannelType::Stream, false),
            Err(ActivationError::InvalidId(256))
        );

        mux.set_id_adjustment(-5);
        assert_eq!(
            mux.activate(2, ChannelType::Data, false),
            Err(ActivationError::InvalidId(-3))
        );
    }

    #[test]
    fn sticky_channel_needs_force() {
        let (mux, _, streams) = mux();
        mux.activate(CSD.into(), ChannelType::Stream, true).unwrap();

        assert_eq!(mux.deactivate(1, false), Err(DeactivationError::Sticky(1)));
        assert!(streams.port(CSD).is_some());

        mux.deactivate(1, true).unwrap();
        assert!(streams.port(CSD).is_none());
        assert!(mux.channels().is_empty());
    }

    #[test]
    fn adjustment_applies_to_data_activation_and_deactivation() {
        let (mux, net, _) = mux();
        mux.set_id_adjustment(5);

        let info = mux.activate(1, ChannelType::Data, false).unwrap();
        assert_eq!(info.effective_id, 6);
        assert_eq!(info.sink_name, "pdp5");

        mux.deactivate(1, false).unwrap();
        assert!(mux.channel(6).is_none());
        assert_eq!(net.unregistered_count(), 1);
    }

    #[test]
    fn adjustment_does_not_shift_stream_ids() {
        let (mux, _, _) = mux();
        mux.set_id_adjustment(4);
        mux.activate(GPS.into(), ChannelType::Stream, false).unwrap();
        mux.activate(2, ChannelType::Data, false).unwrap();

        // 1 + 4 lands on the stream channel, which the adjusted lookup skips.
        assert_eq!(mux.deactivate(1, false), Err(DeactivationError::NotFound(1)));

        mux.deactivate(GPS.into(), false).unwrap();
        assert!(mux.channel(GPS).is_none());
        assert_eq!(mux.channel(6).unwrap().kind, ChannelType::Data);
    }

    #[test]
    fn unknown_deactivation_is_not_found() {
        let (mux, _, _) = mux();
        assert_eq!(mux.deactivate(7, true), Err(DeactivationError::NotFound(7)));
        assert_eq!(mux.deactivate(-1, true), Err(DeactivationError::NotFound(-1)));
    }

    #[test]
    fn shutdown_removes_everything_including_sticky() {
        let (mux, net, streams) = mux();
        mux.activate_defaults().unwrap();
        mux.activate(2, ChannelType::Data, false).unwrap();

        assert_eq!(mux.shutdown_all(), 4);
        assert!(mux.channels().is_empty());
        assert!(streams.port_names().is_empty());
        assert_eq!(net.unregistered_count(), 1);
    }
}
