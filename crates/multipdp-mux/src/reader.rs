#[cfg(unix)]
use std::io::{Read, Write};

#[cfg(unix)]
use multipdp_frame::{FrameError, FrameReader};
#[cfg(unix)]
use multipdp_transport::WaitReadable;
#[cfg(unix)]
use tokio_util::sync::CancellationToken;

#[cfg(unix)]
use crate::error::DemuxError;
#[cfg(unix)]
use crate::mux::Multiplexer;

/// Why the reader loop returned normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderExit {
    /// The cancellation token fired.
    Cancelled,
    /// The transport reached end of stream.
    Closed,
}

#[cfg(unix)]
/// Demultiplex frames from `reader` until cancelled or the transport fails.
///
/// Between frames the loop waits at most `poll_interval` for input, so a
/// cancellation is observed within one interval. Framing and routing faults
/// are logged by the multiplexer and skipped.
pub fn run_reader<W, R>(
    mux: &Multiplexer<W>,
    reader: &mut FrameReader<R>,
    token: &CancellationToken,
) -> Result<ReaderExit, FrameError>
where
    W: Write,
    R: Read + WaitReadable,
{
    let poll_interval = mux.config().poll_interval();
    loop {
        if token.is_cancelled() {
            return Ok(ReaderExit::Cancelled);
        }
        if !reader.wait_readable(Some(poll_interval))? {
            continue;
        }
        match mux.demux_once(reader) {
            Ok(()) => {}
            Err(DemuxError::Transport(FrameError::ConnectionClosed)) => {
                return Ok(ReaderExit::Closed)
            }
            Err(DemuxError::Transport(err)) => return Err(err),
            Err(_) => {}
        }
    }
}

#[cfg(unix)]
pub use self::worker::{spawn_reader, ReaderHandle};

#[cfg(unix)]
mod worker {
    use std::io::{self, Write};
    use std::sync::Arc;
    use std::thread::{self, JoinHandle};

    use multipdp_frame::{FrameError, FrameReader};
    use multipdp_transport::DeviceStream;
    use tokio_util::sync::CancellationToken;
    use tracing::{debug, error, info};

    use super::{run_reader, ReaderExit};
    use crate::mux::Multiplexer;

    /// Handle to a running reader thread.
    #[derive(Debug)]
    pub struct ReaderHandle {
        join: JoinHandle<Result<ReaderExit, FrameError>>,
        token: CancellationToken,
    }

    impl ReaderHandle {
        /// Ask the reader to stop; it exits within one poll interval.
        pub fn cancel(&self) {
            self.token.cancel();
        }

        pub fn is_finished(&self) -> bool {
            self.join.is_finished()
        }

        /// Wait for the reader thread and return its exit reason.
        pub fn join(self) -> Result<ReaderExit, FrameError> {
            self.join
                .join()
                .unwrap_or_else(|_| Err(FrameError::Io(io::Error::other("reader thread panicked"))))
        }
    }

    /// Run [`run_reader`] on a dedicated thread over `stream`.
    ///
    /// When the loop ends for any reason the transport is closed and `token`
    /// is cancelled, so sibling workers sharing it stop too.
    pub fn spawn_reader<W>(
        mux: Arc<Multiplexer<W>>,
        stream: DeviceStream,
        token: CancellationToken,
    ) -> io::Result<ReaderHandle>
    where
        W: Write + Send + 'static,
    {
        let worker_token = token.clone();
        let join = thread::Builder::new()
            .name("multipdp-reader".into())
            .spawn(move || {
                let mut reader = FrameReader::new(stream);
                let result = run_reader(&mux, &mut reader, &worker_token);
                match &result {
                    Ok(exit) => info!(?exit, "reader stopped"),
                    Err(err) => error!(error = %err, "reader failed"),
                }
                if let Err(err) = reader.into_inner().close() {
                    debug!(error = %err, "transport close failed");
                }
                worker_token.cancel();
                result
            })?;
        Ok(ReaderHandle { join, token })
    }
}
