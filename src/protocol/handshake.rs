//! Conversation-id negotiation packet
//!
//! Before any engine traffic flows, the client announces its conversation id
//! with a fixed 12-byte datagram of three little-endian words:
//!
//! ```text
//! | 0x00000000 u32 | conv u32 | conv + 1 u32 |
//! ```
//!
//! The upstream acknowledges by echoing the identical packet. The leading
//! zero word is what distinguishes the packet from engine segments, whose
//! first word is the (nonzero) conversation id.

/// Size of the negotiation packet on the wire
pub const HANDSHAKE_LEN: usize = 12;

/// Encode the negotiation packet for `conv`
pub fn encode(conv: u32) -> [u8; HANDSHAKE_LEN] {
    let mut pkt = [0u8; HANDSHAKE_LEN];
    pkt[4..8].copy_from_slice(&conv.to_le_bytes());
    pkt[8..12].copy_from_slice(&conv.wrapping_add(1).to_le_bytes());
    pkt
}

/// Check whether `datagram` is the upstream's echo of our packet for `conv`
pub fn is_echo(datagram: &[u8], conv: u32) -> bool {
    datagram.len() == HANDSHAKE_LEN && datagram == encode(conv)
}
