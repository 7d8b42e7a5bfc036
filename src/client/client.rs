//! Main client structure
//!
//! [`TunnelClient::setup`] brings the tunnel to the serving state: UDP
//! socket, one-shot upstream resolution, the conversation handshake, the
//! engine, and the local TCP listener. [`TunnelClient::run`] then hands
//! everything to the mux loop. Any failure during setup surfaces as an
//! error so the binary can exit nonzero.

use crate::client::event_loop::{EventLoop, MAX_DATAGRAM_LEN};
use crate::config::ClientConfig;
use crate::engine::{RdpEngine, UdpOutput};
use crate::error::MuxtunError;
use crate::helper::{resolve_ipv4, seed_conversation_id, EngineClock};
use crate::protocol::handshake;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket, UdpSocket};
use tokio::sync::broadcast;
use tokio::time::{self, Instant};
use tracing::{debug, info};

/// Resend the handshake packet this often until acknowledged
const HANDSHAKE_RETRY: Duration = Duration::from_secs(1);

/// Give up on the handshake after this long
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Listener backlog
const LISTEN_BACKLOG: u32 = 1024;

/// Main Muxtun client
pub struct TunnelClient {
    event_loop: EventLoop,
    conv: u32,
    upstream: SocketAddr,
    listen_addr: SocketAddr,
}

impl TunnelClient {
    /// Create the sockets, negotiate the conversation, bind the listener
    pub async fn setup(config: ClientConfig) -> Result<Self> {
        config
            .validate()
            .map_err(MuxtunError::Config)
            .context("Invalid client configuration")?;

        let upstream = resolve_ipv4(&config.udp_upstream_host, config.udp_upstream_port)
            .await
            .context("Failed to resolve upstream")?;

        let udp = UdpSocket::bind("0.0.0.0:0")
            .await
            .context("Failed to create udp socket")?;
        udp.connect(upstream)
            .await
            .with_context(|| format!("Failed to target upstream {}", upstream))?;
        let udp = Arc::new(udp);

        info!(
            "udp socket {} -> upstream {}",
            udp.local_addr()?,
            upstream
        );

        let conv = seed_conversation_id();
        negotiate_conversation(&udp, conv).await?;
        info!("conversation {:#010x} acknowledged", conv);

        let clock = EngineClock::new();
        let mut engine = RdpEngine::new(conv, UdpOutput::new(udp.clone()));
        engine.update(clock.now_ms());

        let (listen_ip, listen_port) = config
            .listen_addr()
            .map_err(MuxtunError::Config)
            .context("Invalid listen address")?;
        let listener = bind_listener(SocketAddr::from((listen_ip, listen_port)))
            .with_context(|| format!("Cannot listen on {}:{}", listen_ip, listen_port))?;
        let listen_addr = listener.local_addr()?;
        info!("tcp listener on {}", listen_addr);

        let event_loop = EventLoop::new(
            udp,
            engine,
            clock,
            listener,
            config.read_timeout(),
            config.write_timeout(),
        );

        Ok(TunnelClient {
            event_loop,
            conv,
            upstream,
            listen_addr,
        })
    }

    /// The negotiated conversation id
    pub fn conv(&self) -> u32 {
        self.conv
    }

    /// The resolved upstream address
    pub fn upstream(&self) -> SocketAddr {
        self.upstream
    }

    /// The bound listener address
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Serve until a shutdown signal arrives, then drain and return
    pub async fn run(self, shutdown_rx: broadcast::Receiver<bool>) -> Result<()> {
        self.event_loop.run(shutdown_rx).await
    }
}

impl std::fmt::Debug for TunnelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelClient")
            .field("conv", &self.conv)
            .field("upstream", &self.upstream)
            .field("listen_addr", &self.listen_addr)
            .finish()
    }
}

/// Announce `conv` and wait for the upstream to echo it back
///
/// The packet goes out immediately and then once a second; a wrong or
/// foreign datagram during this phase is ignored. After ten seconds
/// without the echo the whole setup fails.
async fn negotiate_conversation(udp: &UdpSocket, conv: u32) -> Result<()> {
    let packet = handshake::encode(conv);
    udp.send(&packet)
        .await
        .context("Failed to send handshake")?;

    let mut retry = time::interval_at(Instant::now() + HANDSHAKE_RETRY, HANDSHAKE_RETRY);
    let mut buf = [0u8; MAX_DATAGRAM_LEN];

    let wait = async {
        loop {
            tokio::select! {
                result = udp.recv(&mut buf) => {
                    let n = result.context("udp recv failed during handshake")?;
                    if handshake::is_echo(&buf[..n], conv) {
                        return Ok(());
                    }
                    debug!("ignoring {}-byte datagram during handshake", n);
                }
                _ = retry.tick() => {
                    debug!("resending handshake");
                    udp.send(&packet)
                        .await
                        .context("Failed to resend handshake")?;
                }
            }
        }
    };

    time::timeout(HANDSHAKE_TIMEOUT, wait)
        .await
        .map_err(|_| MuxtunError::HandshakeTimeout(HANDSHAKE_TIMEOUT))?
}

/// Bind the local listener with address reuse and the default backlog
fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    Ok(socket.listen(LISTEN_BACKLOG)?)
}
