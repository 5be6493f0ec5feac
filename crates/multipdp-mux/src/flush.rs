use std::io::{self, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::mux::Multiplexer;

/// Deferred sender draining data-channel outbound rings.
///
/// Woken by [`Multiplexer::transmit`]; otherwise it polls the network sink
/// once per poll interval. A failed send leaves the unit queued and is
/// retried after the configured retry delay.
#[derive(Debug)]
pub struct FlushScheduler {
    join: Option<JoinHandle<()>>,
    token: CancellationToken,
    wake: Sender<()>,
}

impl FlushScheduler {
    /// Stop the scheduler and wait for its thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(JoinHandle::is_finished)
    }

    fn shutdown(&mut self) {
        self.token.cancel();
        let _ = self.wake.send(());
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!("flush thread panicked");
            }
        }
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Start the flush scheduler for `mux` on a dedicated thread.
///
/// The scheduler stops when `token` is cancelled.
pub fn spawn_flush<W>(mux: Arc<Multiplexer<W>>, token: CancellationToken) -> io::Result<FlushScheduler>
where
    W: Write + Send + 'static,
{
    let (wake, kicks) = mpsc::channel();
    mux.attach_flush_signal(wake.clone());

    let worker_mux = Arc::clone(&mux);
    let worker_token = token.clone();
    let spawned = thread::Builder::new()
        .name("multipdp-flush".into())
        .spawn(move || {
            run_flush(&worker_mux, &kicks, &worker_token);
            worker_mux.detach_flush_signal();
            debug!("flush scheduler stopped");
        });

    match spawned {
        Ok(join) => Ok(FlushScheduler {
            join: Some(join),
            token,
            wake,
        }),
        Err(err) => {
            mux.detach_flush_signal();
            Err(err)
        }
    }
}

fn run_flush<W: Write>(mux: &Multiplexer<W>, kicks: &Receiver<()>, token: &CancellationToken) {
    let idle = mux.config().poll_interval();
    let retry = mux.config().flush_retry_delay();
    let mut wait = idle;

    while !token.is_cancelled() {
        match kicks.recv_timeout(wait) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        // Coalesce kicks that piled up while the last pass ran.
        while kicks.try_recv().is_ok() {}

        wait = loop {
            if token.is_cancelled() {
                break idle;
            }
            let pulled = mux.pump_outbound();
            if let Err(err) = mux.flush_pending() {
                warn!(error = %err, retry_ms = retry.as_millis() as u64, "flush failed");
                break retry;
            }
            if pulled == 0 {
                break idle;
            }
        };
    }
}
