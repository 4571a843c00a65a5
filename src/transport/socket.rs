//! Async UDP socket wrapper.
//!
//! A [`DatagramSocket`] owns its receive buffer, so exactly one task reads
//! from it. Any number of [`DatagramSender`] handles can share the same
//! socket for fire-and-forget sends.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::info;

use crate::core::{DATAGRAM_HEADER_SIZE, DEFAULT_MAX_PAYLOAD, DEFAULT_RECV_BUFFER_SIZE};

fn oversized(len: usize, max: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("datagram of {len} bytes exceeds limit of {max}"),
    )
}

/// Async UDP socket with an owned receive buffer.
#[derive(Debug)]
pub struct DatagramSocket {
    socket: Arc<UdpSocket>,
    recv_buffer: Vec<u8>,
    max_payload_size: usize,
}

impl DatagramSocket {
    /// Bind a socket with default options.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        DatagramSocketBuilder::new().bind(addr).await
    }

    /// Bind to `local` and connect to `peer`.
    ///
    /// The kernel then filters out datagrams from any other source.
    pub async fn bind_connected(local: SocketAddr, peer: SocketAddr) -> io::Result<Self> {
        DatagramSocketBuilder::new().bind_connected(local, peer).await
    }

    /// Wrap an existing UDP socket with default options.
    pub fn from_socket(socket: UdpSocket) -> Self {
        DatagramSocketBuilder::new().from_socket(socket)
    }

    /// Local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Connected peer, if any.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.socket.peer_addr()
    }

    /// Connect to a remote address.
    ///
    /// After connecting, `send` and `recv` can be used instead of
    /// `send_to` and `recv_from`.
    pub async fn connect(&self, addr: SocketAddr) -> io::Result<()> {
        self.socket.connect(addr).await
    }

    /// Send one datagram to `addr`.
    pub async fn send_to(&self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.check_size(data)?;
        self.socket.send_to(data, addr).await
    }

    /// Send one datagram to the connected peer.
    pub async fn send(&self, data: &[u8]) -> io::Result<usize> {
        self.check_size(data)?;
        self.socket.send(data).await
    }

    /// Receive one datagram and its source.
    pub async fn recv_from(&mut self) -> io::Result<(&[u8], SocketAddr)> {
        let (len, addr) = self.socket.recv_from(&mut self.recv_buffer).await?;
        Ok((&self.recv_buffer[..len], addr))
    }

    /// Receive one datagram from the connected peer.
    pub async fn recv(&mut self) -> io::Result<&[u8]> {
        let len = self.socket.recv(&mut self.recv_buffer).await?;
        Ok(&self.recv_buffer[..len])
    }

    /// Receive without waiting.
    ///
    /// Returns `Ok(None)` if no datagram is queued.
    pub fn try_recv_from(&mut self) -> io::Result<Option<(&[u8], SocketAddr)>> {
        match self.socket.try_recv_from(&mut self.recv_buffer) {
            Ok((len, addr)) => Ok(Some((&self.recv_buffer[..len], addr))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Send-only handle sharing this socket.
    pub fn sender(&self) -> DatagramSender {
        DatagramSender {
            socket: Arc::clone(&self.socket),
            max_datagram_size: self.max_datagram_size(),
        }
    }

    /// Largest object payload accepted.
    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    /// Largest datagram accepted (header plus payload).
    pub fn max_datagram_size(&self) -> usize {
        self.max_payload_size + DATAGRAM_HEADER_SIZE
    }

    fn check_size(&self, data: &[u8]) -> io::Result<()> {
        let max = self.max_datagram_size();
        if data.len() > max {
            return Err(oversized(data.len(), max));
        }
        Ok(())
    }
}

/// Cloneable send half of a [`DatagramSocket`].
#[derive(Debug, Clone)]
pub struct DatagramSender {
    socket: Arc<UdpSocket>,
    max_datagram_size: usize,
}

impl DatagramSender {
    /// Send one datagram to `addr`.
    pub async fn send_to(&self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        if data.len() > self.max_datagram_size {
            return Err(oversized(data.len(), self.max_datagram_size));
        }
        self.socket.send_to(data, addr).await
    }

    /// Send one datagram to the connected peer.
    pub async fn send(&self, data: &[u8]) -> io::Result<usize> {
        if data.len() > self.max_datagram_size {
            return Err(oversized(data.len(), self.max_datagram_size));
        }
        self.socket.send(data).await
    }

    /// Local address of the shared socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

/// Builder for sockets with custom options.
#[derive(Debug, Clone)]
pub struct DatagramSocketBuilder {
    recv_buffer_size: usize,
    max_payload_size: usize,
}

impl Default for DatagramSocketBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DatagramSocketBuilder {
    /// Create a builder with default options.
    pub fn new() -> Self {
        Self {
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }

    /// Set the receive buffer size.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    /// Set the maximum object payload size.
    pub fn max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }

    /// Bind to `addr`.
    pub async fn bind(self, addr: SocketAddr) -> io::Result<DatagramSocket> {
        let socket = UdpSocket::bind(addr).await?;
        info!(local = %socket.local_addr()?, "bound datagram socket");
        Ok(self.from_socket(socket))
    }

    /// Bind to `local` and connect to `peer`.
    pub async fn bind_connected(
        self,
        local: SocketAddr,
        peer: SocketAddr,
    ) -> io::Result<DatagramSocket> {
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        info!(local = %socket.local_addr()?, %peer, "bound connected datagram socket");
        Ok(self.from_socket(socket))
    }

    /// Wrap an existing UDP socket.
    pub fn from_socket(self, socket: UdpSocket) -> DatagramSocket {
        DatagramSocket {
            socket: Arc::new(socket),
            recv_buffer: vec![0u8; self.recv_buffer_size],
            max_payload_size: self.max_payload_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn localhost() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_socket_bind() {
        let socket = DatagramSocket::bind(localhost()).await.unwrap();
        assert_ne!(socket.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_socket_send_recv() {
        let mut server = DatagramSocket::bind(localhost()).await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let client = DatagramSocket::bind(localhost()).await.unwrap();

        client.send_to(b"hello", server_addr).await.unwrap();

        let (received, from) = server.recv_from().await.unwrap();
        assert_eq!(received, b"hello");
        assert_eq!(from, client.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_bind_connected() {
        let mut server = DatagramSocket::bind(localhost()).await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let client = DatagramSocket::bind_connected(localhost(), server_addr)
            .await
            .unwrap();
        assert_eq!(client.peer_addr().unwrap(), server_addr);
        client.send(b"connected send").await.unwrap();

        let (received, _) = server.recv_from().await.unwrap();
        assert_eq!(received, b"connected send");
    }

    #[tokio::test]
    async fn test_sender_shares_socket() {
        let mut server = DatagramSocket::bind(localhost()).await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let client = DatagramSocket::bind(localhost()).await.unwrap();

        let sender = client.sender();
        assert_eq!(sender.local_addr().unwrap(), client.local_addr().unwrap());
        sender.send_to(b"via sender", server_addr).await.unwrap();

        let (received, from) = server.recv_from().await.unwrap();
        assert_eq!(received, b"via sender");
        assert_eq!(from, client.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_oversized_datagram_rejected() {
        let socket = DatagramSocketBuilder::new()
            .max_payload_size(8)
            .bind(localhost())
            .await
            .unwrap();
        assert_eq!(socket.max_datagram_size(), 8 + DATAGRAM_HEADER_SIZE);

        let data = vec![0u8; socket.max_datagram_size() + 1];
        let err = socket.send_to(&data, localhost()).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        let err = socket.sender().send_to(&data, localhost()).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_try_recv_empty() {
        let mut socket = DatagramSocket::bind(localhost()).await.unwrap();
        assert!(socket.try_recv_from().unwrap().is_none());
    }

    #[test]
    fn test_socket_builder() {
        let builder = DatagramSocketBuilder::new()
            .recv_buffer_size(4096)
            .max_payload_size(1400);

        assert_eq!(builder.recv_buffer_size, 4096);
        assert_eq!(builder.max_payload_size, 1400);
    }
}
