//! Test utilities and mocks for Muxtun
//!
//! The centerpiece is [`spawn_mock_peer`]: a UDP upstream that answers the
//! conversation handshake and then speaks the mux framing over a real
//! `kcp` engine, so integration tests observe exactly what a server
//! would.

use bytes::{Bytes, BytesMut};
use kcp::Kcp;
use muxtun::config::{ClientConfig, Config};
use muxtun::protocol::{encode_data, next_frame, Frame};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;

/// Behavior switches for the mock upstream
#[derive(Debug, Clone, Copy)]
pub struct PeerOptions {
    /// Echo the 12-byte handshake packet back to the client
    pub acknowledge_handshake: bool,
    /// Reflect every data frame back on the same connection index
    pub echo_data: bool,
}

impl Default for PeerOptions {
    fn default() -> Self {
        PeerOptions {
            acknowledge_handshake: true,
            echo_data: false,
        }
    }
}

/// Handle to a running mock upstream
pub struct MockPeer {
    /// Address the client should use as its upstream
    pub addr: SocketAddr,
    /// Every application frame the peer received from the client
    pub frames_rx: mpsc::UnboundedReceiver<Frame>,
    /// Framed messages for the peer to send to the client over the engine
    pub inject_tx: mpsc::UnboundedSender<Bytes>,
    task: JoinHandle<()>,
}

impl Drop for MockPeer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl MockPeer {
    /// Wait for data on `conn_idx` carrying `expected` bytes
    ///
    /// Frames may split a TCP write arbitrarily; payload bytes are
    /// accumulated until `expected` is matched. Frames for other
    /// connections (including closes of earlier sessions) are skipped.
    pub async fn expect_data(&mut self, conn_idx: u16, expected: &[u8]) {
        let mut collected = Vec::new();
        let deadline = Duration::from_secs(5);
        while collected.len() < expected.len() {
            let frame = time::timeout(deadline, self.frames_rx.recv())
                .await
                .expect("timed out waiting for data frame")
                .expect("peer task ended");
            match frame {
                Frame::Data { conn_idx: idx, payload } if idx == conn_idx => {
                    collected.extend_from_slice(&payload);
                }
                _ => {}
            }
        }
        assert_eq!(collected.as_slice(), expected);
    }

    /// Wait until the client announces CLOSE_CONN for `conn_idx`
    ///
    /// Unrelated frames are skipped.
    pub async fn expect_close(&mut self, conn_idx: u16) {
        let deadline = Duration::from_secs(5);
        loop {
            let frame = time::timeout(deadline, self.frames_rx.recv())
                .await
                .expect("timed out waiting for close frame")
                .expect("peer task ended");
            if matches!(frame, Frame::CloseConn { conn_idx: idx } if idx == conn_idx) {
                return;
            }
        }
    }
}

/// `Write` sink pushing engine segments to the client's address
struct PeerOutput {
    socket: Arc<UdpSocket>,
    target: SocketAddr,
}

impl Write for PeerOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.socket.try_send_to(buf, self.target);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Start a mock upstream on an ephemeral port
pub async fn spawn_mock_peer(opts: PeerOptions) -> MockPeer {
    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let addr = socket.local_addr().unwrap();

    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let (inject_tx, mut inject_rx) = mpsc::unbounded_channel::<Bytes>();

    let task = tokio::spawn({
        let socket = socket.clone();
        async move {
            let origin = Instant::now();
            let mut engine: Option<Kcp<PeerOutput>> = None;
            let mut assembly = BytesMut::new();
            let mut scratch = vec![0u8; 2048];
            let mut buf = [0u8; 2048];
            let mut tick = time::interval(Duration::from_millis(10));
            tick.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

            loop {
                let now_ms = origin.elapsed().as_millis() as u32;
                tokio::select! {
                    result = socket.recv_from(&mut buf) => {
                        let (n, src) = match result {
                            Ok(pair) => pair,
                            Err(_) => continue,
                        };
                        let data = &buf[..n];

                        // Handshake packets lead with a zero word.
                        if n == 12 && data[..4] == [0, 0, 0, 0] {
                            if !opts.acknowledge_handshake {
                                continue;
                            }
                            let _ = socket.send_to(data, src).await;
                            if engine.is_none() {
                                let conv = u32::from_le_bytes(data[4..8].try_into().unwrap());
                                let output = PeerOutput {
                                    socket: socket.clone(),
                                    target: src,
                                };
                                let mut kcp = Kcp::new(conv, output);
                                kcp.set_wndsize(256, 256);
                                kcp.set_nodelay(true, 10, 2, true);
                                let _ = kcp.update(now_ms);
                                engine = Some(kcp);
                            }
                            continue;
                        }

                        let Some(kcp) = engine.as_mut() else { continue };
                        if kcp.input(data).is_err() {
                            continue;
                        }

                        loop {
                            let size = match kcp.peeksize() {
                                Ok(size) => size,
                                Err(_) => break,
                            };
                            if size > scratch.len() {
                                scratch.resize(size, 0);
                            }
                            match kcp.recv(&mut scratch) {
                                Ok(m) => assembly.extend_from_slice(&scratch[..m]),
                                Err(_) => break,
                            }
                        }

                        while let Ok(Some(frame)) = next_frame(&mut assembly) {
                            if opts.echo_data {
                                if let Frame::Data { conn_idx, payload } = &frame {
                                    let _ = kcp.send(&encode_data(*conn_idx, payload));
                                }
                            }
                            let _ = frames_tx.send(frame);
                        }
                        let _ = kcp.update(now_ms);
                    }

                    Some(framed) = inject_rx.recv() => {
                        if let Some(kcp) = engine.as_mut() {
                            let _ = kcp.send(&framed);
                            let _ = kcp.update(now_ms);
                        }
                    }

                    _ = tick.tick() => {
                        if let Some(kcp) = engine.as_mut() {
                            let _ = kcp.update(now_ms);
                        }
                    }
                }
            }
        }
    });

    MockPeer {
        addr,
        frames_rx,
        inject_tx,
        task,
    }
}

/// Client configuration pointing at the mock peer
pub fn test_config(upstream: SocketAddr, listen_port: u16) -> Config {
    Config {
        client: ClientConfig {
            udp_upstream_host: upstream.ip().to_string(),
            udp_upstream_port: upstream.port(),
            listen_ip: "127.0.0.1".to_string(),
            listen_port,
            tcp_read_timeout_s: 0,
            tcp_write_timeout_s: 0,
        },
    }
}

/// Grab a currently free local TCP port
pub async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}
