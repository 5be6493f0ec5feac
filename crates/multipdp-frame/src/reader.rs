use std::io::{ErrorKind, Read};

use bytes::Bytes;
#[cfg(unix)]
use multipdp_transport::WaitReadable;
use tracing::trace;

use crate::codec::{Frame, FrameConfig, FrameHeader, END_MARKER, HEADER_SIZE, START_MARKER};
use crate::error::{FrameError, Result};

const DISCARD_CHUNK_SIZE: usize = 256;

/// Reads frames piecewise from any `Read` stream.
///
/// The transport has no frame boundaries of its own, so the demuxer drives
/// the parse step by step: start marker, header, routing decision, then
/// payload (or a drain of it) and end marker. [`FrameReader::read_frame`]
/// composes the steps for callers that do not route.
///
/// Short reads, `Interrupted` and `WouldBlock` are retried internally.
pub struct FrameReader<T> {
    inner: T,
    payload: Vec<u8>,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            payload: Vec::with_capacity(config.max_payload_size),
            config,
        }
    }

    /// Consume one byte and check it is the start marker.
    ///
    /// On mismatch only that byte is consumed.
    pub fn read_start(&mut self) -> Result<()> {
        let byte = self.read_byte()?;
        if byte != START_MARKER {
            return Err(FrameError::BadStart(byte));
        }
        Ok(())
    }

    /// Read the header that follows the start marker.
    pub fn read_header(&mut self) -> Result<FrameHeader> {
        let mut raw = [0u8; HEADER_SIZE];
        self.fill(&mut raw)?;
        Ok(FrameHeader::from_bytes(raw))
    }

    /// Read exactly `len` payload bytes into the reader's own buffer.
    ///
    /// The buffer is reused across frames.
    pub fn read_payload(&mut self, len: usize) -> Result<&[u8]> {
        let mut payload = std::mem::take(&mut self.payload);
        payload.resize(len, 0);
        let filled = self.fill(&mut payload);
        self.payload = payload;
        filled?;
        Ok(&self.payload[..len])
    }

    /// Consume and throw away `len` bytes.
    pub fn discard(&mut self, len: usize) -> Result<()> {
        trace!(len, "discarding frame bytes");
        let mut scratch = [0u8; DISCARD_CHUNK_SIZE];
        let mut remaining = len;
        while remaining > 0 {
            let n = remaining.min(DISCARD_CHUNK_SIZE);
            self.fill(&mut scratch[..n])?;
            remaining -= n;
        }
        Ok(())
    }

    /// Consume one byte and check it is the end marker.
    pub fn read_end(&mut self) -> Result<()> {
        let byte = self.read_byte()?;
        if byte != END_MARKER {
            return Err(FrameError::BadEnd(byte));
        }
        Ok(())
    }

    /// Read the next complete frame (blocking).
    ///
    /// Follows the same drain rules as the demuxer: once the header is known,
    /// a rejected frame still consumes its declared payload and trailing
    /// marker so the next call starts on a frame boundary.
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_frame(&mut self) -> Result<Frame> {
        self.read_start()?;
        let header = self.read_header()?;
        let payload_len = header.payload_len().ok_or(FrameError::Malformed {
            length: header.length,
        })?;

        if payload_len > self.config.max_payload_size {
            self.discard(payload_len + 1)?;
            return Err(FrameError::PayloadTooLarge {
                size: payload_len,
                max: self.config.max_payload_size,
            });
        }

        let payload = Bytes::copy_from_slice(self.read_payload(payload_len)?);
        self.read_end()?;

        Ok(Frame {
            channel: header.channel,
            payload,
        })
    }

    fn read_byte(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.fill(&mut byte)?;
        Ok(byte[0])
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < buf.len() {
            match self.inner.read(&mut buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => std::thread::yield_now(),
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        Ok(())
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum payload size for subsequent frames.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(unix)]
impl<T: WaitReadable> WaitReadable for FrameReader<T> {
    fn wait_readable(
        &self,
        timeout: Option<std::time::Duration>,
    ) -> multipdp_transport::Result<bool> {
        self.inner.wait_readable(timeout)
    }
}
