//! Datagram sink for the reliable-UDP engine
//!
//! The engine emits ready-to-send segments synchronously from inside its
//! `input`/`send`/`update` calls through a [`std::io::Write`] hook. This
//! sink forwards each segment to the connected upstream socket with
//! `try_send`; a failed send is logged and dropped, since the engine
//! retransmits anything the upstream does not acknowledge.

use std::io::{self, Write};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::warn;

/// `Write` adapter emitting engine segments as UDP datagrams
#[derive(Debug, Clone)]
pub struct UdpOutput {
    socket: Arc<UdpSocket>,
}

impl UdpOutput {
    /// Wrap a socket already connected to the upstream address
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        UdpOutput { socket }
    }
}

impl Write for UdpOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.socket.try_send(buf) {
            Ok(n) => Ok(n),
            Err(e) => {
                warn!("udp send error ({} bytes): {}", buf.len(), e);
                // Report the segment as written; the engine retransmits.
                Ok(buf.len())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_forwards_datagram() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.connect(receiver.local_addr().unwrap()).await.unwrap();

        let mut output = UdpOutput::new(Arc::new(sender));
        assert_eq!(output.write(b"segment").unwrap(), 7);

        let mut buf = [0u8; 32];
        let n = receiver.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"segment");
    }

    #[tokio::test]
    async fn test_write_swallows_send_errors() {
        // Unconnected socket: try_send fails, but the adapter reports the
        // bytes as written so the engine treats loss like any other drop.
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut output = UdpOutput::new(Arc::new(sender));
        assert_eq!(output.write(b"lost").unwrap(), 4);
        assert!(output.flush().is_ok());
    }
}
