use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use tracing::debug;

use crate::error::{Result, TransportError};

/// Readiness wait used by the demux reader loop between frames.
pub trait WaitReadable {
    /// Block until data is available or `timeout` elapses.
    ///
    /// Returns `Ok(true)` when the stream is readable (or hung up, so the next
    /// read observes EOF) and `Ok(false)` when the wait timed out or was
    /// interrupted by a signal. `None` waits indefinitely.
    fn wait_readable(&self, timeout: Option<Duration>) -> Result<bool>;
}

/// A connected transport stream implementing Read + Write.
///
/// Wraps either the DPRAM character device or one end of a Unix socket pair
/// (loopback links and tests).
pub struct DeviceStream {
    inner: DeviceStreamInner,
}

enum DeviceStreamInner {
    Device(std::fs::File),
    Unix(std::os::unix::net::UnixStream),
}

impl Read for DeviceStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            DeviceStreamInner::Device(file) => file.read(buf),
            DeviceStreamInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for DeviceStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            DeviceStreamInner::Device(file) => file.write(buf),
            DeviceStreamInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            DeviceStreamInner::Device(file) => file.flush(),
            DeviceStreamInner::Unix(stream) => stream.flush(),
        }
    }
}

impl DeviceStream {
    /// Wrap an opened device node.
    pub(crate) fn from_device(file: std::fs::File) -> Self {
        Self {
            inner: DeviceStreamInner::Device(file),
        }
    }

    /// Wrap one end of a Unix stream (e.g. from `UnixStream::pair()`).
    pub fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: DeviceStreamInner::Unix(stream),
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    ///
    /// The demux reader and the mux writer each own one handle.
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            DeviceStreamInner::Device(file) => Ok(Self::from_device(file.try_clone()?)),
            DeviceStreamInner::Unix(stream) => Ok(Self::from_unix(stream.try_clone()?)),
        }
    }

    /// Close the stream.
    ///
    /// Socket-backed streams are shut down in both directions so the other
    /// handle observes EOF as well; device handles are simply released.
    pub fn close(self) -> Result<()> {
        match self.inner {
            DeviceStreamInner::Device(file) => {
                drop(file);
                debug!("closed device stream");
                Ok(())
            }
            DeviceStreamInner::Unix(stream) => {
                match stream.shutdown(std::net::Shutdown::Both) {
                    Ok(()) => {}
                    Err(err) if err.kind() == ErrorKind::NotConnected => {}
                    Err(err) => return Err(TransportError::Io(err)),
                }
                debug!("closed socket stream");
                Ok(())
            }
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            DeviceStreamInner::Device(_) => "dpram-device",
            DeviceStreamInner::Unix(_) => "unix-socket",
        }
    }
}

impl AsRawFd for DeviceStream {
    fn as_raw_fd(&self) -> RawFd {
        match &self.inner {
            DeviceStreamInner::Device(file) => file.as_raw_fd(),
            DeviceStreamInner::Unix(stream) => stream.as_raw_fd(),
        }
    }
}

impl WaitReadable for DeviceStream {
    fn wait_readable(&self, timeout: Option<Duration>) -> Result<bool> {
        poll_readable(self.as_raw_fd(), timeout)
    }
}

fn poll_readable(fd: RawFd, timeout: Option<Duration>) -> Result<bool> {
    let timeout_ms = match timeout {
        Some(timeout) => timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
        None => -1,
    };
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    // SAFETY: `pfd` is a valid, writable pollfd and we pass a count of exactly one.
    let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if rc < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(TransportError::Io(err));
    }
    if rc == 0 {
        return Ok(false);
    }
    if pfd.revents & libc::POLLNVAL != 0 {
        return Err(TransportError::Io(std::io::Error::from_raw_os_error(
            libc::EBADF,
        )));
    }

    Ok(pfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0)
}

impl std::fmt::Debug for DeviceStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceStream")
            .field("type", &self.transport_name())
            .field("fd", &self.as_raw_fd())
            .finish()
    }
}
