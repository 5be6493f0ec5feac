use std::path::Path;
use std::sync::Arc;

use multipdp_frame::FrameError;
use multipdp_transport::{DeviceStream, DpramDevice};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::MuxConfig;
use crate::error::ServiceError;
use crate::flush::{spawn_flush, FlushScheduler};
use crate::mux::Multiplexer;
use crate::reader::{spawn_reader, ReaderExit, ReaderHandle};
use crate::sink::{NetSink, StreamSink};

/// A running multiplexer bound to one transport.
///
/// Owns the reader and flush threads. Both share one cancellation token: a
/// transport failure in the reader stops the scheduler as well.
#[derive(Debug)]
pub struct MuxService {
    mux: Arc<Multiplexer<DeviceStream>>,
    reader: Option<ReaderHandle>,
    flush: Option<FlushScheduler>,
    token: CancellationToken,
}

impl MuxService {
    /// Open the DPRAM device at `path` and start the service on it.
    pub fn open(
        path: impl AsRef<Path>,
        net: Arc<dyn NetSink>,
        streams: Arc<dyn StreamSink>,
        config: MuxConfig,
    ) -> Result<Self, ServiceError> {
        let stream = DpramDevice::open(path)?;
        Self::start(stream, net, streams, config)
    }

    /// Start the service on an already opened transport.
    ///
    /// Brings up the default stream channels before the reader starts, so
    /// no early CSD/ROUTER/GPS frame is dropped as unknown.
    pub fn start(
        stream: DeviceStream,
        net: Arc<dyn NetSink>,
        streams: Arc<dyn StreamSink>,
        config: MuxConfig,
    ) -> Result<Self, ServiceError> {
        config.validate()?;
        let transport = stream.transport_name();
        let writer = stream.try_clone()?;
        let mux = Arc::new(Multiplexer::new(writer, net, streams, config));
        if let Err(err) = mux.activate_defaults() {
            mux.shutdown_all();
            return Err(err.into());
        }

        let token = CancellationToken::new();
        let flush = match spawn_flush(Arc::clone(&mux), token.clone()) {
            Ok(flush) => flush,
            Err(err) => {
                mux.shutdown_all();
                return Err(ServiceError::Spawn(err));
            }
        };
        let reader = match spawn_reader(Arc::clone(&mux), stream, token.clone()) {
            Ok(reader) => reader,
            Err(err) => {
                flush.stop();
                mux.shutdown_all();
                return Err(ServiceError::Spawn(err));
            }
        };

        info!(transport, "multiplexer started");
        Ok(Self {
            mux,
            reader: Some(reader),
            flush: Some(flush),
            token,
        })
    }

    pub fn multiplexer(&self) -> &Arc<Multiplexer<DeviceStream>> {
        &self.mux
    }

    /// Token shared by the worker threads; cancelling it stops the service.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether the reader has stopped (cancelled or transport gone).
    pub fn is_finished(&self) -> bool {
        self.reader.as_ref().is_none_or(ReaderHandle::is_finished)
    }

    /// Stop both workers and tear down every channel.
    pub fn shutdown(mut self) -> Result<ReaderExit, ServiceError> {
        match self.stop() {
            Some(result) => result.map_err(ServiceError::Reader),
            None => Ok(ReaderExit::Cancelled),
        }
    }

    fn stop(&mut self) -> Option<Result<ReaderExit, FrameError>> {
        self.token.cancel();
        if let Some(flush) = self.flush.take() {
            flush.stop();
        }
        let exit = self.reader.take().map(ReaderHandle::join);
        if exit.is_some() {
            let channels = self.mux.shutdown_all();
            info!(channels, "multiplexer stopped");
        }
        exit
    }
}

impl Drop for MuxService {
    fn drop(&mut self) {
        if let Some(Err(err)) = self.stop() {
            warn!(error = %err, "reader failed during shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;
    use std::time::{Duration, Instant};

    use bytes::Bytes;
    use multipdp_frame::{FrameReader, FrameWriter, CSD};

    use super::*;
    use crate::channel::ChannelType;
    use crate::memory::{MemoryNetSink, MemoryStreamSink};

    fn start() -> (MuxService, UnixStream, Arc<MemoryNetSink>, Arc<MemoryStreamSink>) {
        let (local, remote) = UnixStream::pair().unwrap();
        let net = Arc::new(MemoryNetSink::new());
        let streams = Arc::new(MemoryStreamSink::new());
        let config = MuxConfig {
            poll_interval_ms: 10,
            ..MuxConfig::default()
        };
        let service = MuxService::start(
            DeviceStream::from_unix(local),
            net.clone(),
            streams.clone(),
            config,
        )
        .unwrap();
        (service, remote, net, streams)
    }

    fn wait_for(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn start_brings_up_default_streams() {
        let (service, _remote, _, streams) = start();
        assert_eq!(streams.port_names(), vec!["ttyCSD", "ttyROUTER", "ttyGPS"]);
        assert_eq!(service.multiplexer().channels().len(), 3);

        assert_eq!(service.shutdown().unwrap(), ReaderExit::Cancelled);
        assert!(streams.port_names().is_empty());
    }

    #[test]
    fn frames_flow_both_ways() {
        let (service, remote, net, streams) = start();
        let mux = Arc::clone(service.multiplexer());
        mux.activate(1, ChannelType::Data, false).unwrap();

        let mut peer = FrameWriter::new(remote.try_clone().unwrap());
        peer.write_frame(CSD, b"RING").unwrap();
        peer.write_frame(1, b"ip packet").unwrap();
        wait_for(|| net.inbound_bytes(1) == b"ip packet");
        wait_for(|| streams.port(CSD).unwrap().received() == b"RING");

        mux.transmit(1, Bytes::from_static(b"reply")).unwrap();
        let mut inbound = FrameReader::new(remote);
        let frame = inbound.read_frame().unwrap();
        assert_eq!((frame.channel, &frame.payload[..]), (1, &b"reply"[..]));

        service.shutdown().unwrap();
    }

    #[test]
    fn peer_hangup_finishes_service() {
        let (service, remote, _, _) = start();
        drop(remote);

        wait_for(|| service.is_finished());
        assert!(service.cancellation_token().is_cancelled());
        assert_eq!(service.shutdown().unwrap(), ReaderExit::Closed);
    }

    #[test]
    fn refused_default_stream_leaves_no_port_behind() {
        let (local, _remote) = UnixStream::pair().unwrap();
        let streams = Arc::new(MemoryStreamSink::new());
        streams.refuse_channel(multipdp_frame::ROUTER);

        let err = MuxService::start(
            DeviceStream::from_unix(local),
            Arc::new(MemoryNetSink::new()),
            streams.clone(),
            MuxConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ServiceError::Activation(_)));
        assert!(streams.port_names().is_empty());
    }

    #[test]
    fn invalid_config_is_rejected_before_start() {
        let (local, _remote) = UnixStream::pair().unwrap();
        let err = MuxService::start(
            DeviceStream::from_unix(local),
            Arc::new(MemoryNetSink::new()),
            Arc::new(MemoryStreamSink::new()),
            MuxConfig {
                ring_capacity: 0,
                ..MuxConfig::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, ServiceError::Config(_)));
    }
}
