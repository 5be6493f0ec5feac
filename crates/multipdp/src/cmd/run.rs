use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use multipdp_mux::{
    ChannelType, ManagementRequest, MuxConfig, MuxService, NetSink, SinkError, SinkHandle,
    StreamPort, StreamSink,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cmd::RunArgs;
use crate::exit::{config_error, management_error, service_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_channels, print_delivery, print_stats, OutputFormat};

const IDLE_TICK: Duration = Duration::from_millis(50);

pub fn run(args: RunArgs, format: OutputFormat) -> CliResult<i32> {
    let mut config = match &args.config {
        Some(path) => {
            MuxConfig::load(path).map_err(|err| config_error("config load failed", err))?
        }
        None => MuxConfig::default(),
    };
    if let Some(offset) = args.id_adjustment {
        config.id_adjustment = offset;
    }

    let sink = Arc::new(PrintSink::new(format));
    let service = MuxService::open(&args.device, sink.clone(), sink, config)
        .map_err(|err| service_error("start failed", err))?;
    let mux = Arc::clone(service.multiplexer());

    for &requested_id in &args.data_channels {
        let response = mux
            .handle(ManagementRequest::Activate {
                requested_id,
                kind: ChannelType::Data,
                sticky: false,
            })
            .map_err(|err| management_error("activate failed", err))?;
        debug!(?response, "data channel requested");
    }
    if args.list {
        print_channels(&mux.channels(), format);
    }

    let token = service.cancellation_token().clone();
    install_ctrlc_handler(token.clone())?;
    info!(device = %args.device.display(), "running; press Ctrl-C to stop");
    while !token.is_cancelled() {
        thread::sleep(IDLE_TICK);
    }

    let exit = service
        .shutdown()
        .map_err(|err| service_error("reader failed", err))?;
    info!(?exit, "multiplexer stopped");
    print_stats(&mux.stats(), format);
    Ok(SUCCESS)
}

fn install_ctrlc_handler(token: CancellationToken) -> CliResult<()> {
    ctrlc::set_handler(move || {
        token.cancel();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

/// Sink printing every payload the link delivers.
///
/// Serves both channel kinds: data payloads print per frame, stream bytes
/// print per port flush.
struct PrintSink {
    format: OutputFormat,
    next_handle: AtomicU64,
    names: Mutex<HashMap<u8, String>>,
}

impl PrintSink {
    fn new(format: OutputFormat) -> Self {
        Self {
            format,
            next_handle: AtomicU64::new(1),
            names: Mutex::new(HashMap::new()),
        }
    }

    fn name(&self, channel: u8) -> String {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&channel)
            .cloned()
            .unwrap_or_else(|| format!("pdp{}", channel.saturating_sub(1)))
    }
}

impl NetSink for PrintSink {
    fn register(&self, channel: u8, name: &str) -> Result<SinkHandle, SinkError> {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel, name.to_string());
        let handle = SinkHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        debug!(channel, name, handle = handle.0, "network endpoint registered");
        Ok(handle)
    }

    fn unregister(&self, handle: SinkHandle) {
        debug!(handle = handle.0, "network endpoint removed");
    }

    fn submit_inbound(&self, channel: u8, payload: &[u8]) -> Result<(), SinkError> {
        print_delivery(channel, &self.name(channel), payload, self.format);
        Ok(())
    }
}

impl StreamSink for PrintSink {
    fn register(&self, channel: u8, name: &str) -> Result<Arc<dyn StreamPort>, SinkError> {
        debug!(channel, name, "stream port registered");
        Ok(Arc::new(PrintPort {
            channel,
            name: name.to_string(),
            format: self.format,
            pending: Mutex::new(Vec::new()),
        }))
    }

    fn unregister(&self, _port: &Arc<dyn StreamPort>) {
        debug!("stream port removed");
    }
}

struct PrintPort {
    channel: u8,
    name: String,
    format: OutputFormat,
    pending: Mutex<Vec<u8>>,
}

impl StreamPort for PrintPort {
    fn is_open(&self) -> bool {
        true
    }

    fn reserve(&self, max_len: usize) -> usize {
        max_len
    }

    fn commit(&self, data: &[u8]) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(data);
    }

    fn flush(&self) {
        let pending =
            std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));
        if !pending.is_empty() {
            print_delivery(self.channel, &self.name, &pending, self.format);
        }
    }
}
