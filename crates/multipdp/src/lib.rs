//! Channel multiplexing over a shared DPRAM link.
//!
//! One half-duplex byte transport carries several logical channels: network
//! data channels (PDP contexts) and virtual serial lines (CSD, ROUTER, GPS).
//!
//! # Crate Structure
//!
//! - [`transport`]: DPRAM device transport and readiness polling
//! - [`frame`]: Start/end-marker framing with per-channel addressing
//! - [`mux`]: Channel registry, multiplexer, reader and flush workers (behind `mux` feature)

/// Re-export transport types.
pub mod transport {
    pub use multipdp_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use multipdp_frame::*;
}

/// Re-export multiplexer types (requires `mux` feature).
#[cfg(feature = "mux")]
pub mod mux {
    pub use multipdp_mux::*;
}
