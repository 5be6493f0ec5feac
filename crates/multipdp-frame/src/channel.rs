//! Well-known channel ids.
//!
//! Stream (virtual serial) channels use fixed ids. Data channels are PDP
//! contexts whose ids come from the management surface and may overlap the
//! stream ids before offset adjustment.

/// Circuit-switched data serial channel.
pub const CSD: u8 = 1;

/// GPS serial channel.
pub const GPS: u8 = 5;

/// Router (modem tethering) serial channel.
pub const ROUTER: u8 = 25;
