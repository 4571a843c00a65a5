//! Connection-multiplexing server socket.
//!
//! A [`ServerSocket`] owns one or more physical UDP sockets ("channels") and
//! demultiplexes inbound datagrams by source address onto per-peer
//! [`LogicalConnection`]s. Channel 0 is the socket bound to the configured
//! address; further channels are opened according to the [`ChannelPolicy`].
//!
//! Each channel has its own receive task. All of them feed one queue that
//! [`ServerSocket::recv`] drains, so codec state is only ever touched by the
//! caller of `recv` and needs no locking.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::pool::{ChannelPolicy, ChannelPool};
use crate::codec::{CodecError, TypeRegistry};
use crate::core::{
    ByteBuffer, DEFAULT_INBOUND_QUEUE, DEFAULT_MAX_PAYLOAD, DEFAULT_RECV_BUFFER_SIZE, Streamable,
    StreamableType, UNBOUNDED_CLIENTS,
};
use crate::transport::{
    Arrival, DatagramHeader, DatagramSender, DatagramSocket, DatagramSocketBuilder,
    LogicalConnection, TransportError, TransportResult,
};

/// Index of the socket bound to the configured address.
pub const PRIMARY_CHANNEL: usize = 0;

/// Errors that can occur in the server socket.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind the primary socket.
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Configuration rejected before binding.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No logical connection for this address.
    #[error("unknown peer: {0}")]
    UnknownPeer(SocketAddr),

    /// Encoding failed; the peer's outbound stream is unusable.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// All receive loops are gone.
    #[error("server shut down")]
    Shutdown,
}

impl From<TransportError> for ServerError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Codec(err) => ServerError::Codec(err),
            err => ServerError::Transport(err),
        }
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address of the primary socket. Extra channels bind the same IP.
    pub bind_addr: SocketAddr,

    /// Peers per physical socket: [`UNBOUNDED_CLIENTS`], 1, or a pool size.
    pub clients_per_channel: usize,

    /// Receive buffer size per socket.
    pub recv_buffer_size: usize,

    /// Largest object payload per datagram.
    pub max_payload_size: usize,

    /// Datagrams buffered between the receive loops and [`ServerSocket::recv`].
    pub inbound_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            clients_per_channel: UNBOUNDED_CLIENTS,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            inbound_queue: DEFAULT_INBOUND_QUEUE,
        }
    }
}

impl ServerConfig {
    fn socket_builder(&self) -> DatagramSocketBuilder {
        DatagramSocketBuilder::new()
            .recv_buffer_size(self.recv_buffer_size)
            .max_payload_size(self.max_payload_size)
    }
}

/// Builder for a [`ServerSocket`].
#[derive(Debug)]
pub struct ServerSocketBuilder {
    config: ServerConfig,
}

impl ServerSocketBuilder {
    /// Create a new server builder.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Set the bind address.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Set the number of peers per physical socket.
    pub fn clients_per_channel(mut self, clients: usize) -> Self {
        self.config.clients_per_channel = clients;
        self
    }

    /// Set the receive buffer size.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.config.recv_buffer_size = size;
        self
    }

    /// Set the maximum payload size.
    pub fn max_payload_size(mut self, size: usize) -> Self {
        self.config.max_payload_size = size;
        self
    }

    /// Set the inbound queue depth.
    pub fn inbound_queue(mut self, depth: usize) -> Self {
        self.config.inbound_queue = depth;
        self
    }

    /// Build the server configuration.
    pub fn build(self) -> ServerConfig {
        self.config
    }

    /// Bind a server socket with this configuration.
    pub async fn bind(self, registry: Arc<TypeRegistry>) -> ServerResult<ServerSocket> {
        ServerSocket::bind(self.config, registry).await
    }
}

impl Default for ServerSocketBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Event from the server socket.
#[derive(Debug)]
pub enum ServerEvent {
    /// First datagram from a new peer; its logical connection now exists.
    Connected {
        /// Peer address.
        peer: SocketAddr,
        /// Channel the peer was assigned to.
        channel: usize,
    },

    /// An object arrived.
    Object {
        /// Sender.
        peer: SocketAddr,
        /// Datagram header.
        header: DatagramHeader,
        /// Ordering relative to the peer's earlier datagrams.
        arrival: Arrival,
        /// Decoded object, `None` for null.
        object: Option<Box<dyn Streamable>>,
    },

    /// The peer's inbound stream failed and will be ignored from now on.
    ///
    /// Call [`ServerSocket::disconnect`] to let the peer start over.
    Failed {
        /// Peer address.
        peer: SocketAddr,
        /// What broke the stream.
        error: CodecError,
    },
}

#[derive(Debug)]
struct Inbound {
    channel: usize,
    from: SocketAddr,
    data: Bytes,
}

/// One physical socket and its receive task.
#[derive(Debug)]
struct Channel {
    sender: DatagramSender,
    local_addr: SocketAddr,
    /// Set for sockets connected to a single peer.
    peer: Option<SocketAddr>,
    task: JoinHandle<()>,
}

impl Channel {
    fn spawn(
        mut socket: DatagramSocket,
        index: usize,
        peer: Option<SocketAddr>,
        tx: mpsc::Sender<Inbound>,
    ) -> io::Result<Self> {
        let local_addr = socket.local_addr()?;
        let sender = socket.sender();
        let task = tokio::spawn(async move {
            loop {
                let inbound = match socket.recv_from().await {
                    Ok((data, from)) => Inbound {
                        channel: index,
                        from,
                        data: Bytes::copy_from_slice(data),
                    },
                    // ICMP errors surface on connected sockets; the socket is fine
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
                        ) =>
                    {
                        debug!(channel = index, error = %e, "ignoring receive error");
                        continue;
                    }
                    Err(e) => {
                        warn!(channel = index, error = %e, "receive loop stopped");
                        break;
                    }
                };
                if tx.send(inbound).await.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            sender,
            local_addr,
            peer,
            task,
        })
    }

    async fn send(&self, data: &[u8], to: SocketAddr) -> io::Result<usize> {
        match self.peer {
            Some(_) => self.sender.send(data).await,
            None => self.sender.send_to(data, to).await,
        }
    }
}

/// Multiplexes logical peer connections over physical UDP sockets.
///
/// # Example
///
/// ```ignore
/// let server = ServerSocketBuilder::new()
///     .bind_addr("0.0.0.0:7777".parse()?)
///     .clients_per_channel(8)
///     .bind(Arc::new(registry))
///     .await?;
///
/// loop {
///     match server.recv().await? {
///         ServerEvent::Connected { peer, .. } => println!("{peer} joined"),
///         ServerEvent::Object { peer, object, .. } => {
///             server.send_object(peer, object.as_deref()).await?;
///         }
///         ServerEvent::Failed { peer, .. } => {
///             server.disconnect(peer);
///         }
///     }
/// }
/// ```
#[derive(Debug)]
pub struct ServerSocket {
    config: ServerConfig,
    policy: ChannelPolicy,
    registry: Arc<TypeRegistry>,
    local_addr: SocketAddr,

    /// Closed dedicated channels leave `None` so indices stay stable.
    channels: Vec<Option<Channel>>,
    pool: ChannelPool,
    /// Pool slot to channel index.
    pool_channels: Vec<usize>,

    connections: HashMap<SocketAddr, LogicalConnection>,
    pending: VecDeque<ServerEvent>,

    /// Only receive tasks hold strong senders, so the queue closes once
    /// they are all gone.
    inbound_tx: mpsc::WeakSender<Inbound>,
    inbound_rx: mpsc::Receiver<Inbound>,

    send_buf: ByteBuffer,
    recv_buf: ByteBuffer,
}

impl ServerSocket {
    /// Bind the primary socket and start receiving.
    pub async fn bind(config: ServerConfig, registry: Arc<TypeRegistry>) -> ServerResult<Self> {
        if config.inbound_queue == 0 {
            return Err(ServerError::InvalidConfig(
                "inbound_queue must be at least 1".into(),
            ));
        }

        let socket = config
            .socket_builder()
            .bind(config.bind_addr)
            .await
            .map_err(|source| ServerError::BindFailed {
                addr: config.bind_addr,
                source,
            })?;

        let (tx, inbound_rx) = mpsc::channel(config.inbound_queue);
        let inbound_tx = tx.downgrade();
        let primary = Channel::spawn(socket, PRIMARY_CHANNEL, None, tx)?;
        let local_addr = primary.local_addr;
        let policy = ChannelPolicy::from_clients_per_channel(config.clients_per_channel);
        info!(local = %local_addr, ?policy, "server socket listening");

        Ok(Self {
            pool: ChannelPool::new(config.clients_per_channel),
            config,
            policy,
            registry,
            local_addr,
            channels: vec![Some(primary)],
            pool_channels: Vec::new(),
            connections: HashMap::new(),
            pending: VecDeque::new(),
            inbound_tx,
            inbound_rx,
            send_buf: ByteBuffer::new(),
            recv_buf: ByteBuffer::new(),
        })
    }

    /// Wait for the next event.
    ///
    /// Datagrams that fail routing are logged and dropped here; they never
    /// surface as events. Returns [`ServerError::Shutdown`] once the primary
    /// receive loop or every receive loop has stopped.
    pub async fn recv(&mut self) -> ServerResult<ServerEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(event);
            }
            if !self.primary_alive() {
                return Err(ServerError::Shutdown);
            }

            let Some(inbound) = self.inbound_rx.recv().await else {
                warn!(local = %self.local_addr, "all receive loops stopped");
                return Err(ServerError::Shutdown);
            };
            let (channel, from) = (inbound.channel, inbound.from);
            match self.dispatch(inbound).await {
                Ok(()) => {}
                Err(TransportError::EmptyDatagram) => {
                    warn!(channel, %from, "dropping empty datagram");
                }
                Err(err) if err.is_silent_drop() => {
                    debug!(channel, %from, error = %err, "dropping datagram");
                }
                Err(err) => {
                    warn!(channel, %from, error = %err, "failed to handle datagram");
                }
            }
        }
    }

    fn primary_alive(&self) -> bool {
        self.channels
            .get(PRIMARY_CHANNEL)
            .and_then(Option::as_ref)
            .is_some_and(|channel| !channel.task.is_finished())
    }

    async fn dispatch(&mut self, inbound: Inbound) -> TransportResult<()> {
        let Inbound {
            channel,
            from,
            data,
        } = inbound;

        if data.is_empty() {
            return Err(TransportError::EmptyDatagram);
        }
        if from.ip().is_unspecified() || from.port() == 0 {
            return Err(TransportError::UnresolvableSource(from));
        }

        match self.connections.get(&from) {
            Some(conn) if channel != PRIMARY_CHANNEL && channel != conn.channel() => {
                return Err(TransportError::UnknownPeer(from));
            }
            Some(conn) if conn.is_failed() => {
                debug!(peer = %from, "dropping datagram for failed stream");
                return Ok(());
            }
            Some(_) => {}
            None => {
                if channel != PRIMARY_CHANNEL {
                    return Err(TransportError::UnknownPeer(from));
                }
                // A new source must at least carry a header before it gets state
                DatagramHeader::from_bytes(&data)?;
                self.accept(from).await?;
            }
        }

        let Some(conn) = self.connections.get_mut(&from) else {
            return Err(TransportError::UnknownPeer(from));
        };
        self.recv_buf.load(&data);
        match conn.decode(&mut self.recv_buf) {
            Ok(received) => {
                self.pending.push_back(ServerEvent::Object {
                    peer: from,
                    header: received.header,
                    arrival: received.arrival,
                    object: received.object,
                });
                Ok(())
            }
            Err(TransportError::Codec(error)) => {
                warn!(peer = %from, %error, "peer stream failed");
                self.pending.push_back(ServerEvent::Failed { peer: from, error });
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn accept(&mut self, peer: SocketAddr) -> TransportResult<()> {
        let channel = match self.policy {
            ChannelPolicy::Shared => PRIMARY_CHANNEL,
            ChannelPolicy::Dedicated => self.open_channel(Some(peer)).await?,
            ChannelPolicy::Pooled(_) => match self.pool.assign(peer) {
                Some(slot) => self.pool_channels[slot],
                None => {
                    let channel = self.open_channel(None).await?;
                    self.pool.add_slot(peer);
                    self.pool_channels.push(channel);
                    channel
                }
            },
        };

        debug!(%peer, channel, "new logical connection");
        let conn = LogicalConnection::new(peer, channel, Arc::clone(&self.registry))
            .with_max_payload_size(self.config.max_payload_size);
        self.connections.insert(peer, conn);
        self.pending
            .push_back(ServerEvent::Connected { peer, channel });
        Ok(())
    }

    async fn open_channel(&mut self, peer: Option<SocketAddr>) -> io::Result<usize> {
        let local = SocketAddr::new(self.config.bind_addr.ip(), 0);
        let builder = self.config.socket_builder();
        let socket = match peer {
            Some(peer) => builder.bind_connected(local, peer).await?,
            None => builder.bind(local).await?,
        };

        let tx = self.inbound_tx.upgrade().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "server receive queue closed")
        })?;
        let index = self.channels.len();
        let channel = Channel::spawn(socket, index, peer, tx)?;
        debug!(channel = index, local = %channel.local_addr, "opened channel");
        self.channels.push(Some(channel));
        Ok(index)
    }

    /// Encode `obj` for `peer` and send it on the peer's channel.
    ///
    /// A datagram that could not be sent leaves no trace in the peer's
    /// outbound stream.
    pub async fn send_object(
        &mut self,
        peer: SocketAddr,
        obj: Option<&dyn Streamable>,
    ) -> ServerResult<DatagramHeader> {
        let conn = self
            .connections
            .get_mut(&peer)
            .ok_or(ServerError::UnknownPeer(peer))?;
        let Some(channel) = self.channels.get(conn.channel()).and_then(Option::as_ref) else {
            return Err(TransportError::ConnectionClosed.into());
        };
        let header = conn.encode(obj, &mut self.send_buf)?;
        if let Err(e) = channel.send(self.send_buf.as_slice(), peer).await {
            conn.cancel_encode();
            return Err(e.into());
        }
        Ok(header)
    }

    /// Typed form of [`send_object`](Self::send_object).
    pub async fn send_value<T: StreamableType>(
        &mut self,
        peer: SocketAddr,
        value: Option<&T>,
    ) -> ServerResult<DatagramHeader> {
        self.send_object(peer, value.map(|v| v as &dyn Streamable))
            .await
    }

    /// Forget `peer`, freeing its pool seat or closing its dedicated socket.
    ///
    /// Returns `false` if the peer had no connection.
    pub fn disconnect(&mut self, peer: SocketAddr) -> bool {
        let Some(conn) = self.connections.remove(&peer) else {
            return false;
        };

        match self.policy {
            ChannelPolicy::Shared => {}
            ChannelPolicy::Dedicated if conn.channel() != PRIMARY_CHANNEL => {
                if let Some(channel) = self.channels.get_mut(conn.channel()).and_then(Option::take) {
                    channel.task.abort();
                }
            }
            ChannelPolicy::Dedicated => {}
            ChannelPolicy::Pooled(_) => {
                self.pool.release(peer);
            }
        }
        self.pending.retain(|event| match event {
            ServerEvent::Connected { peer: p, .. }
            | ServerEvent::Object { peer: p, .. }
            | ServerEvent::Failed { peer: p, .. } => *p != peer,
        });

        debug!(%peer, channel = conn.channel(), "disconnected peer");
        true
    }

    /// Stop every receive loop and discard all connection state.
    pub fn shutdown(mut self) {
        self.close_all();
        info!(local = %self.local_addr, "server socket shut down");
    }

    fn close_all(&mut self) {
        for channel in self.channels.iter_mut().filter_map(Option::take) {
            channel.task.abort();
        }
        self.connections.clear();
        self.pending.clear();
    }

    /// Address of the primary socket.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Local address of channel `index`, if open.
    pub fn channel_addr(&self, index: usize) -> Option<SocketAddr> {
        self.channels
            .get(index)
            .and_then(Option::as_ref)
            .map(|c| c.local_addr)
    }

    /// Number of open physical sockets, primary included.
    pub fn channel_count(&self) -> usize {
        self.channels.iter().flatten().count()
    }

    /// Number of pool channels opened so far.
    pub fn pool_channel_count(&self) -> usize {
        self.pool.slot_count()
    }

    /// Peers in pool channel `slot`.
    pub fn pool_occupancy(&self, slot: usize) -> usize {
        self.pool.occupancy(slot)
    }

    /// Connection for `peer`.
    pub fn connection(&self, peer: SocketAddr) -> Option<&LogicalConnection> {
        self.connections.get(&peer)
    }

    /// Connection for `peer`, for round management on its writer.
    pub fn connection_mut(&mut self, peer: SocketAddr) -> Option<&mut LogicalConnection> {
        self.connections.get_mut(&peer)
    }

    /// Addresses of all connected peers.
    pub fn peers(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        self.connections.keys().copied()
    }

    /// Number of logical connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Channel policy in effect.
    pub fn policy(&self) -> ChannelPolicy {
        self.policy
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

impl Drop for ServerSocket {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::codec::fixtures::{self, Player, Vec2};

    fn localhost() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    async fn server(clients_per_channel: usize) -> ServerSocket {
        ServerSocketBuilder::new()
            .bind_addr(localhost())
            .clients_per_channel(clients_per_channel)
            .bind(Arc::new(fixtures::registry()))
            .await
            .unwrap()
    }

    /// A raw socket plus the codec state a client would keep.
    struct TestPeer {
        socket: DatagramSocket,
        conn: LogicalConnection,
        buf: ByteBuffer,
    }

    impl TestPeer {
        async fn new(server: SocketAddr) -> Self {
            Self {
                socket: DatagramSocket::bind(localhost()).await.unwrap(),
                conn: LogicalConnection::new(server, 0, Arc::new(fixtures::registry())),
                buf: ByteBuffer::new(),
            }
        }

        fn addr(&self) -> SocketAddr {
            self.socket.local_addr().unwrap()
        }

        async fn send(&mut self, obj: &dyn Streamable, to: SocketAddr) {
            self.conn.encode(Some(obj), &mut self.buf).unwrap();
            self.socket.send_to(self.buf.as_slice(), to).await.unwrap();
        }

        async fn recv(&mut self) -> (Box<dyn Streamable>, SocketAddr) {
            let (data, from) = self.socket.recv_from().await.unwrap();
            self.buf.load(data);
            let received = self.conn.decode(&mut self.buf).unwrap();
            (received.object.unwrap(), from)
        }
    }

    async fn expect_connected(server: &mut ServerSocket) -> (SocketAddr, usize) {
        match server.recv().await.unwrap() {
            ServerEvent::Connected { peer, channel } => (peer, channel),
            other => panic!("expected Connected, got {other:?}"),
        }
    }

    async fn expect_object(server: &mut ServerSocket) -> (SocketAddr, Box<dyn Streamable>) {
        match server.recv().await.unwrap() {
            ServerEvent::Object {
                peer,
                object: Some(object),
                ..
            } => (peer, object),
            other => panic!("expected Object, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_bind() {
        let server = server(UNBOUNDED_CLIENTS).await;
        assert_ne!(server.local_addr().port(), 0);
        assert_eq!(server.channel_count(), 1);
        assert_eq!(server.policy(), ChannelPolicy::Shared);
        assert_eq!(server.channel_addr(PRIMARY_CHANNEL), Some(server.local_addr()));
    }

    #[tokio::test]
    async fn test_zero_queue_rejected() {
        let result = ServerSocketBuilder::new()
            .bind_addr(localhost())
            .inbound_queue(0)
            .bind(Arc::new(fixtures::registry()))
            .await;
        assert!(matches!(result, Err(ServerError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_new_peer_then_object() {
        let mut server = server(UNBOUNDED_CLIENTS).await;
        let mut peer = TestPeer::new(server.local_addr()).await;
        let player = Player::new("ada", 90);

        peer.send(&player, server.local_addr()).await;

        let (addr, channel) = expect_connected(&mut server).await;
        assert_eq!(addr, peer.addr());
        assert_eq!(channel, PRIMARY_CHANNEL);
        let (from, object) = expect_object(&mut server).await;
        assert_eq!(from, peer.addr());
        assert_eq!(object.downcast_ref::<Player>(), Some(&player));
        assert_eq!(server.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_reply_reaches_peer() {
        let mut server = server(UNBOUNDED_CLIENTS).await;
        let mut peer = TestPeer::new(server.local_addr()).await;
        peer.send(&Vec2 { x: 1.0, y: 2.0 }, server.local_addr()).await;
        expect_connected(&mut server).await;
        expect_object(&mut server).await;

        let reply = Vec2 { x: 3.0, y: 4.0 };
        let header = server.send_value(peer.addr(), Some(&reply)).await.unwrap();
        assert_eq!(header.acknowledgment, 1);

        let (object, from) = peer.recv().await;
        assert_eq!(from, server.local_addr());
        assert_eq!(object.downcast_ref::<Vec2>(), Some(&reply));
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer() {
        let mut server = server(UNBOUNDED_CLIENTS).await;
        let err = server
            .send_value::<Vec2>("127.0.0.1:9".parse().unwrap(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::UnknownPeer(_)));
    }

    #[tokio::test]
    async fn test_empty_and_short_datagrams_dropped() {
        let mut server = server(UNBOUNDED_CLIENTS).await;
        let noisy = DatagramSocket::bind(localhost()).await.unwrap();
        noisy.send_to(&[], server.local_addr()).await.unwrap();
        noisy.send_to(&[1, 2, 3], server.local_addr()).await.unwrap();

        let mut peer = TestPeer::new(server.local_addr()).await;
        peer.send(&Vec2 { x: 0.0, y: 0.0 }, server.local_addr()).await;

        let (addr, _) = expect_connected(&mut server).await;
        assert_eq!(addr, peer.addr());
        assert!(server.connection(noisy.local_addr().unwrap()).is_none());
    }

    #[tokio::test]
    async fn test_codec_failure_reported_once() {
        let mut server = server(UNBOUNDED_CLIENTS).await;
        let socket = DatagramSocket::bind(localhost()).await.unwrap();

        // Header followed by a bare code whose metadata never arrived
        let mut buf = ByteBuffer::new();
        DatagramHeader::new(1, 0, 1, 0).write_to(&mut buf);
        buf.put_i16(5);
        socket.send_to(buf.as_slice(), server.local_addr()).await.unwrap();
        socket.send_to(buf.as_slice(), server.local_addr()).await.unwrap();

        expect_connected(&mut server).await;
        match server.recv().await.unwrap() {
            ServerEvent::Failed { error, .. } => {
                assert_eq!(error, CodecError::UnknownClassCode(5));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        let next = tokio::time::timeout(Duration::from_millis(100), server.recv()).await;
        assert!(next.is_err());

        assert!(server.disconnect(socket.local_addr().unwrap()));
        assert_eq!(server.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_dedicated_channel() {
        let mut server = server(1).await;
        let mut peer = TestPeer::new(server.local_addr()).await;
        peer.send(&Vec2 { x: 1.0, y: 1.0 }, server.local_addr()).await;

        let (_, channel) = expect_connected(&mut server).await;
        assert_eq!(channel, 1);
        assert_eq!(server.channel_count(), 2);
        expect_object(&mut server).await;

        // Replies come from the dedicated socket
        server
            .send_value(peer.addr(), Some(&Vec2 { x: 2.0, y: 2.0 }))
            .await
            .unwrap();
        let (_, from) = peer.recv().await;
        assert_eq!(Some(from), server.channel_addr(channel));

        // And the peer can keep talking on it
        peer.send(&Vec2 { x: 3.0, y: 3.0 }, from).await;
        let (addr, _) = expect_object(&mut server).await;
        assert_eq!(addr, peer.addr());

        assert!(server.disconnect(peer.addr()));
        assert_eq!(server.channel_count(), 1);
        assert_eq!(server.channel_addr(channel), None);
    }

    #[tokio::test]
    async fn test_pool_channel_rejects_strangers() {
        let mut server = server(2).await;
        let mut member = TestPeer::new(server.local_addr()).await;
        member.send(&Vec2 { x: 0.0, y: 0.0 }, server.local_addr()).await;
        let (_, channel) = expect_connected(&mut server).await;
        expect_object(&mut server).await;
        let pool_addr = server.channel_addr(channel).unwrap();

        // A peer the server never saw writes straight to the pool socket
        let mut stranger = TestPeer::new(pool_addr).await;
        stranger.send(&Vec2 { x: 9.0, y: 9.0 }, pool_addr).await;
        member.send(&Vec2 { x: 1.0, y: 1.0 }, pool_addr).await;

        let (from, _) = expect_object(&mut server).await;
        assert_eq!(from, member.addr());
        assert!(server.connection(stranger.addr()).is_none());
    }

    #[tokio::test]
    async fn test_disconnect_frees_pool_seat() {
        let mut server = server(2).await;
        let mut peers = Vec::new();
        for _ in 0..2 {
            let mut peer = TestPeer::new(server.local_addr()).await;
            peer.send(&Vec2 { x: 0.0, y: 0.0 }, server.local_addr()).await;
            expect_connected(&mut server).await;
            expect_object(&mut server).await;
            peers.push(peer);
        }
        assert_eq!(server.pool_occupancy(0), 2);

        assert!(server.disconnect(peers[0].addr()));
        assert!(!server.disconnect(peers[0].addr()));
        assert_eq!(server.pool_occupancy(0), 1);

        let mut late = TestPeer::new(server.local_addr()).await;
        late.send(&Vec2 { x: 0.0, y: 0.0 }, server.local_addr()).await;
        let (_, channel) = expect_connected(&mut server).await;
        assert_eq!(channel, 1);
        assert_eq!(server.pool_channel_count(), 1);
    }

    #[tokio::test]
    async fn test_unresolvable_source_dropped() {
        let mut server = server(UNBOUNDED_CLIENTS).await;
        let mut buf = ByteBuffer::new();
        DatagramHeader::new(1, 0, 1, 0).write_to(&mut buf);
        buf.put_i16(0);

        for from in ["0.0.0.0:4000", "127.0.0.1:0"] {
            let from: SocketAddr = from.parse().unwrap();
            let inbound = Inbound {
                channel: PRIMARY_CHANNEL,
                from,
                data: Bytes::copy_from_slice(buf.as_slice()),
            };
            assert!(matches!(
                server.dispatch(inbound).await,
                Err(TransportError::UnresolvableSource(addr)) if addr == from
            ));
        }
        assert_eq!(server.connection_count(), 0);
        assert!(server.pending.is_empty());
    }

    #[tokio::test]
    async fn test_primary_loop_gone_reports_shutdown() {
        let mut server = server(UNBOUNDED_CLIENTS).await;
        if let Some(primary) = &server.channels[PRIMARY_CHANNEL] {
            primary.task.abort();
        }

        let result = tokio::time::timeout(Duration::from_secs(1), server.recv())
            .await
            .expect("recv must not hang once the receive loop is gone");
        assert!(matches!(result, Err(ServerError::Shutdown)));
    }

    #[tokio::test]
    async fn test_oversize_reply_keeps_stream_usable() {
        let mut server = ServerSocketBuilder::new()
            .bind_addr(localhost())
            .max_payload_size(64)
            .bind(Arc::new(fixtures::registry()))
            .await
            .unwrap();
        let mut peer = TestPeer::new(server.local_addr()).await;
        peer.send(&Vec2 { x: 0.0, y: 0.0 }, server.local_addr()).await;
        expect_connected(&mut server).await;
        expect_object(&mut server).await;

        let big = Player::new(&"x".repeat(200), 1);
        let err = server.send_value(peer.addr(), Some(&big)).await.unwrap_err();
        assert!(matches!(
            err,
            ServerError::Transport(TransportError::Oversize { .. })
        ));

        let small = Player::new("x", 1);
        let header = server.send_value(peer.addr(), Some(&small)).await.unwrap();
        assert_eq!(header.sequence, 1);
        let (object, _) = peer.recv().await;
        assert_eq!(object.downcast_ref::<Player>(), Some(&small));
    }
}
