//! Datagram transports.

use bytes::Bytes;
use parking_lot::Mutex;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;

/// Outbound half of a datagram transport.
///
/// `send` must not block: dispatch runs synchronously on the reactor task.
pub trait Transport: Send + Sync {
    /// Send one datagram, returning the bytes written.
    fn send(&self, peer: SocketAddr, datagram: &[u8]) -> io::Result<usize>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, peer: SocketAddr, datagram: &[u8]) -> io::Result<usize> {
        (**self).send(peer, datagram)
    }
}

/// UDP transport over a shared tokio socket.
#[derive(Debug, Clone)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self { socket }
    }

    pub fn socket(&self) -> &Arc<UdpSocket> {
        &self.socket
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Transport for UdpTransport {
    fn send(&self, peer: SocketAddr, datagram: &[u8]) -> io::Result<usize> {
        self.socket.try_send_to(datagram, peer)
    }
}

/// In-memory transport that records every datagram sent.
///
/// Used for deterministic protocol tests and simulations.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<(SocketAddr, Bytes)>>,
    fail_sends: Mutex<bool>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends fail with `WouldBlock`.
    pub fn set_failing(&self, failing: bool) {
        *self.fail_sends.lock() = failing;
    }

    /// Remove and return everything sent so far.
    pub fn take_sent(&self) -> Vec<(SocketAddr, Bytes)> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Number of datagrams sent and not yet taken.
    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

impl Transport for MemoryTransport {
    fn send(&self, peer: SocketAddr, datagram: &[u8]) -> io::Result<usize> {
        if *self.fail_sends.lock() {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "send buffer full",
            ));
        }
        self.sent
            .lock()
            .push((peer, Bytes::copy_from_slice(datagram)));
        Ok(datagram.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_transport_records() {
        let transport = Arc::new(MemoryTransport::new());
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();

        let shared: Arc<dyn Transport> = transport.clone();
        assert_eq!(shared.send(peer, b"abc").unwrap(), 3);

        let sent = transport.take_sent();
        assert_eq!(sent, vec![(peer, Bytes::from_static(b"abc"))]);
        assert_eq!(transport.sent_count(), 0);
    }

    #[test]
    fn test_memory_transport_failure() {
        let transport = MemoryTransport::new();
        transport.set_failing(true);
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let err = transport.send(peer, b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert_eq!(transport.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_udp_transport_sends() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let transport = UdpTransport::new(client);

        transport
            .socket()
            .writable()
            .await
            .unwrap();
        let n = transport
            .send(server.local_addr().unwrap(), b"ping")
            .unwrap();
        assert_eq!(n, 4);

        let mut buf = [0u8; 16];
        let (len, from) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"ping");
        assert_eq!(from, transport.local_addr().unwrap());
    }
}
