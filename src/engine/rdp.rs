//! Adapter around the reliable-UDP engine
//!
//! [`RdpEngine`] wraps `kcp::Kcp` with the exact tuning the tunnel runs:
//! send/receive windows of 256 segments and nodelay mode (10 ms internal
//! interval, fast resend after 2 duplicate ACKs, congestion control off).
//! The adapter carries no policy; the client decides what to feed in and
//! when to tick.

use crate::engine::UdpOutput;
use bytes::BytesMut;
use kcp::Kcp;
use tracing::warn;

/// Send and receive window, in segments
const WINDOW_SIZE: u16 = 256;

/// Internal engine interval, milliseconds
const NODELAY_INTERVAL_MS: i32 = 10;

/// Trigger a resend after this many duplicate ACKs
const FAST_RESEND: i32 = 2;

/// Initial scratch size for popping delivered messages
const RECV_SCRATCH_LEN: usize = 2048;

/// The tunnel's view of the reliable-UDP engine
pub struct RdpEngine {
    kcp: Kcp<UdpOutput>,
    conv: u32,
    scratch: Vec<u8>,
}

impl RdpEngine {
    /// Create an engine for `conv`, emitting datagrams through `output`
    pub fn new(conv: u32, output: UdpOutput) -> Self {
        let mut kcp = Kcp::new(conv, output);
        kcp.set_wndsize(WINDOW_SIZE, WINDOW_SIZE);
        kcp.set_nodelay(true, NODELAY_INTERVAL_MS, FAST_RESEND, true);

        RdpEngine {
            kcp,
            conv,
            scratch: vec![0u8; RECV_SCRATCH_LEN],
        }
    }

    /// The conversation id this engine speaks
    pub fn conv(&self) -> u32 {
        self.conv
    }

    /// Feed one raw UDP datagram into the engine
    ///
    /// A rejection is datagram-local: the caller logs it and drops the
    /// datagram without touching any other state.
    pub fn input(&mut self, datagram: &[u8]) -> kcp::KcpResult<()> {
        self.kcp.input(datagram).map(|_| ())
    }

    /// Enqueue one application message for reliable, ordered delivery
    pub fn send(&mut self, message: &[u8]) -> kcp::KcpResult<()> {
        self.kcp.send(message).map(|_| ())
    }

    /// Drain every complete delivered message into `dst`
    ///
    /// Returns the number of bytes appended. The scratch grows to the
    /// pending message size, so even maximum-length frames are popped.
    pub fn drain_into(&mut self, dst: &mut BytesMut) -> usize {
        let mut total = 0;
        loop {
            let pending = match self.kcp.peeksize() {
                Ok(n) => n,
                Err(_) => break, // queue empty or fragment incomplete
            };
            if pending > self.scratch.len() {
                self.scratch.resize(pending, 0);
            }

            match self.kcp.recv(&mut self.scratch) {
                Ok(n) => {
                    dst.extend_from_slice(&self.scratch[..n]);
                    total += n;
                }
                Err(kcp::Error::RecvQueueEmpty) | Err(kcp::Error::ExpectingFragment) => break,
                Err(e) => {
                    warn!("engine recv error: {}", e);
                    break;
                }
            }
        }
        total
    }

    /// Drive timers and retransmissions at `now_ms`
    ///
    /// The engine may invoke the output hook any number of times from in
    /// here. `now_ms` must come from a monotonic clock.
    pub fn update(&mut self, now_ms: u32) {
        if let Err(e) = self.kcp.update(now_ms) {
            warn!("engine update error: {}", e);
        }
    }
}

impl std::fmt::Debug for RdpEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RdpEngine").field("conv", &self.conv).finish()
    }
}
