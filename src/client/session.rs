//! Per-connection TCP session
//!
//! Each accepted local TCP connection becomes a [`TcpSession`]: a pair of
//! pump tasks around the split stream, talking to the mux loop through
//! channels. The reader pushes everything it drains as [`SessionEvent`]s;
//! the writer consumes payloads the mux received from upstream. Either
//! side hitting EOF, an error, or its configured timeout reports a
//! `Closed` event and stops; the mux then drops the session, which aborts
//! both tasks and closes the socket.
//!
//! Sessions never touch the mux state directly; a late event for a
//! session that was already removed simply misses the table lookup.

use crate::helper::DEFAULT_READ_BUFFER_SIZE;
use bytes::{Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Capacity of the mux → session write queue
const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// Why a session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseReason {
    /// Local peer shut down its write side
    Eof,
    /// Socket error while reading or writing
    Error,
    /// Configured read or write timeout fired
    Timeout,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Eof => write!(f, "eof"),
            CloseReason::Error => write!(f, "error"),
            CloseReason::Timeout => write!(f, "timeout"),
        }
    }
}

/// Event a session reports to the mux loop
#[derive(Debug)]
pub(crate) enum SessionEvent {
    /// Bytes drained from the local socket, in read order
    Data {
        /// Index of the reporting session
        conn_idx: u16,
        /// The drained bytes
        payload: Bytes,
    },
    /// The session stopped and should be removed from the table
    Closed {
        /// Index of the reporting session
        conn_idx: u16,
        /// What stopped it
        reason: CloseReason,
    },
}

/// One accepted local TCP connection
#[derive(Debug)]
pub(crate) struct TcpSession {
    conn_idx: u16,
    outbound_tx: mpsc::Sender<Bytes>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl TcpSession {
    /// Split `stream` and start the pump tasks
    pub(crate) fn spawn(
        conn_idx: u16,
        stream: TcpStream,
        read_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);

        let reader = tokio::spawn(read_pump(conn_idx, read_half, read_timeout, events.clone()));
        let writer = tokio::spawn(write_pump(
            conn_idx,
            write_half,
            write_timeout,
            outbound_rx,
            events,
        ));

        TcpSession {
            conn_idx,
            outbound_tx,
            reader,
            writer,
        }
    }

    /// Index of this session
    pub(crate) fn conn_idx(&self) -> u16 {
        self.conn_idx
    }

    /// Queue upstream payload for the local socket
    ///
    /// Returns `false` if the writer is gone; its `Closed` event is
    /// already on the way and the payload is dropped with the session.
    pub(crate) async fn deliver(&self, payload: Bytes) -> bool {
        self.outbound_tx.send(payload).await.is_ok()
    }
}

impl Drop for TcpSession {
    fn drop(&mut self) {
        // Aborting the pumps drops both socket halves, closing the fd.
        self.reader.abort();
        self.writer.abort();
        trace!("session {} dropped", self.conn_idx);
    }
}

/// Drain the local socket into `Data` events until it stops
async fn read_pump(
    conn_idx: u16,
    mut read_half: OwnedReadHalf,
    read_timeout: Option<Duration>,
    events: mpsc::Sender<SessionEvent>,
) {
    let mut buf = BytesMut::with_capacity(DEFAULT_READ_BUFFER_SIZE);

    let reason = loop {
        let read = read_half.read_buf(&mut buf);
        let result = match read_timeout {
            Some(limit) => match timeout(limit, read).await {
                Ok(inner) => inner,
                Err(_) => break CloseReason::Timeout,
            },
            None => read.await,
        };

        match result {
            Ok(0) => break CloseReason::Eof,
            Ok(n) => {
                trace!("session {} read {} bytes", conn_idx, n);
                let payload = buf.split().freeze();
                if events
                    .send(SessionEvent::Data { conn_idx, payload })
                    .await
                    .is_err()
                {
                    // Mux is gone; nothing left to report to.
                    return;
                }
                buf.reserve(DEFAULT_READ_BUFFER_SIZE);
            }
            Err(e) => {
                debug!("session {} read error: {}", conn_idx, e);
                break CloseReason::Error;
            }
        }
    };

    let _ = events.send(SessionEvent::Closed { conn_idx, reason }).await;
}

/// Write queued upstream payloads to the local socket until it stops
async fn write_pump(
    conn_idx: u16,
    mut write_half: OwnedWriteHalf,
    write_timeout: Option<Duration>,
    mut outbound_rx: mpsc::Receiver<Bytes>,
    events: mpsc::Sender<SessionEvent>,
) {
    while let Some(payload) = outbound_rx.recv().await {
        let write = write_half.write_all(&payload);
        let result = match write_timeout {
            Some(limit) => match timeout(limit, write).await {
                Ok(inner) => inner,
                Err(_) => {
                    let _ = events
                        .send(SessionEvent::Closed {
                            conn_idx,
                            reason: CloseReason::Timeout,
                        })
                        .await;
                    return;
                }
            },
            None => write.await,
        };

        if let Err(e) = result {
            debug!("session {} write error: {}", conn_idx, e);
            let _ = events
                .send(SessionEvent::Closed {
                    conn_idx,
                    reason: CloseReason::Error,
                })
                .await;
            return;
        }
        trace!("session {} wrote {} bytes", conn_idx, payload.len());
    }
    // Channel closed: the session is being dropped by the mux; the socket
    // half closes with us.
}
