//! Helper utilities for Muxtun
//!
//! Small pieces shared across the client: the engine clock, the
//! conversation-id seed, and IPv4-only host resolution.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::net::lookup_host;

/// Default buffer size for per-session TCP reads
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8192;

/// Monotonic millisecond clock for driving the reliable-UDP engine
///
/// The engine wants a `u32` millisecond timestamp that never goes
/// backwards. Wall clocks can; this one is anchored to an [`Instant`]
/// taken at construction.
#[derive(Debug, Clone)]
pub struct EngineClock {
    origin: Instant,
}

impl EngineClock {
    /// Create a clock anchored at the current instant
    pub fn new() -> Self {
        EngineClock {
            origin: Instant::now(),
        }
    }

    /// Milliseconds elapsed since the clock was created
    ///
    /// Wraps around after ~49 days, which the engine handles by design.
    pub fn now_ms(&self) -> u32 {
        self.origin.elapsed().as_millis() as u32
    }
}

impl Default for EngineClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Pick a conversation id seeded from the wall clock
///
/// The id only needs to differ between client restarts; the upstream
/// learns it through the handshake.
pub fn seed_conversation_id() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(1)
}

/// Resolve `host:port` to the first IPv4 address
///
/// The tunnel speaks IPv4 only, so IPv6 records are skipped.
pub async fn resolve_ipv4(host: &str, port: u16) -> Result<SocketAddr> {
    let addrs = lookup_host((host, port))
        .await
        .with_context(|| format!("Failed to resolve upstream host: {}", host))?;

    addrs
        .into_iter()
        .find(|addr| addr.is_ipv4())
        .with_context(|| format!("No IPv4 address found for: {}", host))
}
