//! Byte-stream transport beneath the multipdp framing protocol.
//!
//! The modem side of the link is a DPRAM character device: one shared,
//! effectively half-duplex byte pipe with no frame boundaries of its own.
//! This crate wraps it (or any other fd-backed stream) in [`DeviceStream`],
//! which adds readiness polling on top of `Read + Write`.
//!
//! This is the lowest layer of multipdp. Everything else builds on top of it.

pub mod error;

#[cfg(unix)]
pub mod device;
#[cfg(unix)]
pub mod traits;

pub use error::{Result, TransportError};

#[cfg(unix)]
pub use device::DpramDevice;
#[cfg(unix)]
pub use traits::{DeviceStream, WaitReadable};
