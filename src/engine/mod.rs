//! Reliable-UDP engine integration
//!
//! The engine itself is the external `kcp` crate; this module holds the
//! thin adapter the client drives ([`RdpEngine`]) and the datagram sink it
//! emits through ([`UdpOutput`]). All tunneling policy lives in the client;
//! nothing here decides what to send or when.

mod output;
mod rdp;

pub use output::UdpOutput;
pub use rdp::RdpEngine;
