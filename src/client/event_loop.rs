//! The mux reactor
//!
//! One task owns everything: the UDP socket, the reliable-UDP engine, the
//! TCP listener, the connection table, and the assembly buffer. The loop
//! interleaves UDP datagrams, TCP accepts, session events, the 10 ms
//! engine update tick, the 20 s keepalive tick, and shutdown. Each arm
//! runs to completion before the next event is taken, so no state is ever
//! observed mid-transition.
//!
//! Engine updates run on the periodic tick and immediately after any
//! `send` or `input` that may have queued work; the manual path resets the
//! tick so the next automatic update is a full interval away.

use crate::client::session::{SessionEvent, TcpSession};
use crate::engine::RdpEngine;
use crate::error::MuxtunError;
use crate::helper::EngineClock;
use crate::protocol::{frame, handshake};
use anyhow::Result;
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// Periodic engine update interval
pub(crate) const UPDATE_INTERVAL: Duration = Duration::from_millis(10);

/// Keepalive emission interval
pub(crate) const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);

/// How long shutdown keeps the engine running to flush close frames
pub(crate) const SHUTDOWN_DRAIN: Duration = Duration::from_secs(3);

/// Receive buffer for one UDP datagram; engine segments stay well under this
pub(crate) const MAX_DATAGRAM_LEN: usize = 2048;

/// Capacity of the session → mux event channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Highest reserved connection index (0 = control, 1 = counter seed)
const RESERVED_CONN_IDX_MAX: u16 = 1;

/// Step the connection counter past the reserved values
fn bump_conn_idx(idx: u16) -> u16 {
    let mut next = idx.wrapping_add(1);
    while next <= RESERVED_CONN_IDX_MAX {
        next = next.wrapping_add(1);
    }
    next
}

/// State owned by the mux loop
pub(crate) struct EventLoop {
    udp: Arc<UdpSocket>,
    engine: RdpEngine,
    clock: EngineClock,
    listener: Option<TcpListener>,
    sessions: HashMap<u16, TcpSession>,
    next_conn_idx: u16,
    assembly: BytesMut,
    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: mpsc::Receiver<SessionEvent>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    running: bool,
}

impl EventLoop {
    /// Assemble the loop state around an acknowledged engine
    pub(crate) fn new(
        udp: Arc<UdpSocket>,
        engine: RdpEngine,
        clock: EngineClock,
        listener: TcpListener,
        read_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        EventLoop {
            udp,
            engine,
            clock,
            listener: Some(listener),
            sessions: HashMap::new(),
            next_conn_idx: RESERVED_CONN_IDX_MAX,
            assembly: BytesMut::new(),
            events_tx,
            events_rx,
            read_timeout,
            write_timeout,
            running: true,
        }
    }

    /// Serve until shutdown is requested and the drain deadline passes
    pub(crate) async fn run(mut self, mut shutdown_rx: broadcast::Receiver<bool>) -> Result<()> {
        let mut listener = self.listener.take();
        let mut udp_buf = vec![0u8; MAX_DATAGRAM_LEN];

        let mut update_tick = time::interval(UPDATE_INTERVAL);
        update_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut keepalive_tick =
            time::interval_at(Instant::now() + KEEPALIVE_INTERVAL, KEEPALIVE_INTERVAL);
        keepalive_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Armed only when shutdown begins.
        let drain = time::sleep(Duration::from_secs(86400));
        tokio::pin!(drain);

        loop {
            tokio::select! {
                result = self.udp.recv(&mut udp_buf) => {
                    match result {
                        Ok(n) => {
                            if self.handle_datagram(&udp_buf[..n]).await? {
                                self.engine.update(self.clock.now_ms());
                                update_tick.reset();
                            }
                        }
                        Err(e) => warn!("udp recv error: {}", e),
                    }
                }

                accepted = async { listener.as_ref().expect("accept polled without listener").accept().await },
                        if listener.is_some() && self.running => {
                    match accepted {
                        Ok((stream, peer)) => self.accept_session(stream, peer),
                        Err(e) => warn!("tcp accept error: {}", e),
                    }
                }

                Some(event) = self.events_rx.recv() => {
                    if self.handle_session_event(event).await? {
                        self.engine.update(self.clock.now_ms());
                        update_tick.reset();
                    }
                }

                _ = update_tick.tick() => {
                    self.engine.update(self.clock.now_ms());
                }

                _ = keepalive_tick.tick(), if self.running => {
                    trace!("sending keepalive");
                    self.send_frame(&frame::encode_keepalive())?;
                    self.engine.update(self.clock.now_ms());
                    update_tick.reset();
                }

                _ = shutdown_rx.recv(), if self.running => {
                    self.begin_shutdown()?;
                    listener = None;
                    drain.as_mut().reset(Instant::now() + SHUTDOWN_DRAIN);
                    self.engine.update(self.clock.now_ms());
                    update_tick.reset();
                }

                _ = &mut drain, if !self.running => {
                    break;
                }
            }
        }

        info!("client closed");
        Ok(())
    }

    /// One inbound UDP datagram; returns whether the engine took input
    async fn handle_datagram(&mut self, datagram: &[u8]) -> Result<bool> {
        // A late handshake echo is a retry the upstream already cleared.
        if handshake::is_echo(datagram, self.engine.conv()) {
            trace!("absorbing repeated handshake echo");
            return Ok(false);
        }

        if let Err(e) = self.engine.input(datagram) {
            warn!("engine rejected datagram ({} bytes): {}", datagram.len(), e);
            return Ok(false);
        }

        self.engine.drain_into(&mut self.assembly);

        loop {
            match frame::next_frame(&mut self.assembly) {
                Ok(Some(parsed)) => self.dispatch_frame(parsed).await?,
                Ok(None) => break,
                Err(e) => {
                    error!("corrupt frame stream from upstream: {}", e);
                    self.assembly.clear();
                    break;
                }
            }
        }

        Ok(true)
    }

    /// One parsed frame from the application stream
    async fn dispatch_frame(&mut self, parsed: frame::Frame) -> Result<()> {
        match parsed {
            frame::Frame::Data { conn_idx, payload } => {
                trace!("upstream data for {}: {} bytes", conn_idx, payload.len());
                let delivered = match self.sessions.get(&conn_idx) {
                    Some(session) => {
                        session.deliver(payload).await;
                        true
                    }
                    None => false,
                };
                if !delivered {
                    // The upstream still has a stream we dropped; telling it
                    // to close converges the two tables.
                    debug!("data for unknown connection {}, requesting close", conn_idx);
                    self.send_frame(&frame::encode_close_conn(conn_idx))?;
                }
            }
            frame::Frame::CloseConn { conn_idx } => {
                match self.sessions.remove(&conn_idx) {
                    Some(session) => {
                        info!("upstream closed connection {}", conn_idx);
                        drop(session);
                    }
                    None => warn!("close for unknown connection {}", conn_idx),
                }
            }
            frame::Frame::Keepalive => trace!("keepalive from upstream"),
            frame::Frame::UnknownControl { control_type } => {
                warn!("unknown control frame type: {:#04x}", control_type);
            }
        }
        Ok(())
    }

    /// One event from a session; returns whether the engine took work
    async fn handle_session_event(&mut self, event: SessionEvent) -> Result<bool> {
        match event {
            SessionEvent::Data { conn_idx, payload } => {
                if !self.sessions.contains_key(&conn_idx) {
                    // Session was removed while this event was queued.
                    trace!("dropping late data event for {}", conn_idx);
                    return Ok(false);
                }
                self.send_session_payload(conn_idx, payload)?;
                Ok(true)
            }
            SessionEvent::Closed { conn_idx, reason } => {
                match self.sessions.remove(&conn_idx) {
                    Some(session) => {
                        info!("connection {} closed locally ({})", conn_idx, reason);
                        drop(session);
                        self.send_frame(&frame::encode_close_conn(conn_idx))?;
                        Ok(true)
                    }
                    None => {
                        trace!("dropping late close event for {} ({})", conn_idx, reason);
                        Ok(false)
                    }
                }
            }
        }
    }

    /// Frame a session's payload in wire-sized chunks and enqueue them
    fn send_session_payload(&mut self, conn_idx: u16, payload: Bytes) -> Result<()> {
        for chunk in payload.chunks(frame::MAX_CHUNK_LEN) {
            self.send_frame(&frame::encode_data(conn_idx, chunk))?;
        }
        Ok(())
    }

    /// Hand one framed message to the engine
    ///
    /// A rejection here means the engine state is corrupt; nothing above
    /// the engine retries, so it ends the client.
    fn send_frame(&mut self, framed: &[u8]) -> Result<()> {
        if let Err(e) = self.engine.send(framed) {
            error!("engine send error: {}", e);
            return Err(MuxtunError::Engine(format!(
                "engine rejected a {}-byte frame: {}",
                framed.len(),
                e
            ))
            .into());
        }
        Ok(())
    }

    /// Register a newly accepted local connection
    fn accept_session(&mut self, stream: tokio::net::TcpStream, peer: std::net::SocketAddr) {
        let conn_idx = self.allocate_conn_idx();
        info!("accepted {} as connection {}", peer, conn_idx);

        let session = TcpSession::spawn(
            conn_idx,
            stream,
            self.read_timeout,
            self.write_timeout,
            self.events_tx.clone(),
        );
        self.sessions.insert(conn_idx, session);
    }

    /// Next free connection index
    ///
    /// The counter wraps; the table is the source of truth for liveness,
    /// so any index still in use is skipped.
    fn allocate_conn_idx(&mut self) -> u16 {
        loop {
            self.next_conn_idx = bump_conn_idx(self.next_conn_idx);
            if !self.sessions.contains_key(&self.next_conn_idx) {
                return self.next_conn_idx;
            }
        }
    }

    /// Tear down every session, announce the closes, and arm the drain
    fn begin_shutdown(&mut self) -> Result<()> {
        self.running = false;

        info!("stopping tcp listener");
        info!("removing {} tcp connections", self.sessions.len());

        let live: Vec<u16> = self.sessions.keys().copied().collect();
        for conn_idx in live {
            if let Some(session) = self.sessions.remove(&conn_idx) {
                drop(session);
            }
            self.send_frame(&frame::encode_close_conn(conn_idx))?;
        }

        info!("closing client in {:?}", SHUTDOWN_DRAIN);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::UdpOutput;

    async fn test_event_loop(conv: u32) -> EventLoop {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        udp.connect(peer.local_addr().unwrap()).await.unwrap();
        let udp = Arc::new(udp);

        let engine = RdpEngine::new(conv, UdpOutput::new(udp.clone()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        EventLoop::new(udp, engine, EngineClock::new(), listener, None, None)
    }

    #[tokio::test]
    async fn test_repeated_handshake_echo_is_absorbed() {
        let conv = 0x11223344;
        let mut event_loop = test_event_loop(conv).await;
        let echo = handshake::encode(conv);

        // Acknowledgement retries change nothing, however often they come.
        for _ in 0..3 {
            let took_input = event_loop.handle_datagram(&echo).await.unwrap();
            assert!(!took_input);
        }
        assert!(event_loop.sessions.is_empty());
        assert!(event_loop.assembly.is_empty());
    }

    #[tokio::test]
    async fn test_non_matching_short_datagram_is_dropped() {
        let mut event_loop = test_event_loop(7).await;

        // Twelve bytes but the wrong signature: goes to the engine, which
        // rejects it without disturbing anything.
        let took_input = event_loop
            .handle_datagram(&handshake::encode(8))
            .await
            .unwrap();
        assert!(!took_input);
        assert!(event_loop.assembly.is_empty());
    }

    #[test]
    fn test_bump_skips_reserved_values() {
        assert_eq!(bump_conn_idx(1), 2);
        assert_eq!(bump_conn_idx(2), 3);
        assert_eq!(bump_conn_idx(u16::MAX - 1), u16::MAX);
        // Wraparound lands past both reserved values.
        assert_eq!(bump_conn_idx(u16::MAX), 2);
    }

    #[test]
    fn test_first_allocated_index_is_two() {
        // The counter seed is 1, so the first bump yields 2.
        assert_eq!(bump_conn_idx(RESERVED_CONN_IDX_MAX), 2);
    }

    #[test]
    fn test_intervals() {
        assert_eq!(UPDATE_INTERVAL, Duration::from_millis(10));
        assert_eq!(KEEPALIVE_INTERVAL, Duration::from_secs(20));
        assert_eq!(SHUTDOWN_DRAIN, Duration::from_secs(3));
        assert!(MAX_DATAGRAM_LEN >= 2048);
    }
}
