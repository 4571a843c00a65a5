//! Client side of a multiplexed connection.
//!
//! A [`ClientSocket`] talks to one server through a single
//! [`LogicalConnection`]. Servers running dedicated or pooled channels answer
//! from a different port than the one the client first wrote to; the client
//! follows such a redirect when it comes from the server's host.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::codec::{CodecError, TypeRegistry};
use crate::core::{
    ByteBuffer, DEFAULT_MAX_PAYLOAD, DEFAULT_RECV_BUFFER_SIZE, Streamable, StreamableType,
};
use crate::transport::{
    DatagramHeader, DatagramSocket, DatagramSocketBuilder, LogicalConnection, Received,
    TransportError,
};

/// Errors that can occur in the client socket.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Failed to bind the local socket.
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

    /// The connection's stream failed; build a new client to start over.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Codec(err) => ClientError::Codec(err),
            err => ClientError::Transport(err),
        }
    }
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server primary socket.
    pub server_addr: SocketAddr,

    /// Local address to bind.
    pub bind_addr: SocketAddr,

    /// Receive buffer size.
    pub recv_buffer_size: usize,

    /// Largest object payload per datagram.
    pub max_payload_size: usize,

    /// Re-target to a new server port on the same host when the server
    /// answers from one.
    pub follow_channel_redirect: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            follow_channel_redirect: true,
        }
    }
}

/// Builder for a [`ClientSocket`].
#[derive(Debug)]
pub struct ClientSocketBuilder {
    config: ClientConfig,
}

impl ClientSocketBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    /// Set the server address.
    pub fn server_addr(mut self, addr: SocketAddr) -> Self {
        self.config.server_addr = addr;
        self
    }

    /// Set the local bind address.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
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

    /// Enable or disable following channel redirects.
    pub fn follow_channel_redirect(mut self, enabled: bool) -> Self {
        self.config.follow_channel_redirect = enabled;
        self
    }

    /// Build the client configuration.
    pub fn build(self) -> ClientConfig {
        self.config
    }

    /// Bind a client socket with this configuration.
    pub async fn connect(self, registry: Arc<TypeRegistry>) -> ClientResult<ClientSocket> {
        ClientSocket::connect(self.config, registry).await
    }
}

impl Default for ClientSocketBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One logical connection to a server.
///
/// The local socket stays unconnected so replies from a redirected server
/// port are still received.
#[derive(Debug)]
pub struct ClientSocket {
    config: ClientConfig,
    socket: DatagramSocket,
    connection: LogicalConnection,
    send_buf: ByteBuffer,
    recv_buf: ByteBuffer,
}

impl ClientSocket {
    /// Bind a local socket and set up the connection to `config.server_addr`.
    ///
    /// Nothing is sent; the server learns about the client from its first
    /// datagram.
    pub async fn connect(config: ClientConfig, registry: Arc<TypeRegistry>) -> ClientResult<Self> {
        if config.server_addr.port() == 0 || config.server_addr.ip().is_unspecified() {
            return Err(ClientError::InvalidConfig(format!(
                "server address {} is not routable",
                config.server_addr
            )));
        }

        let socket = DatagramSocketBuilder::new()
            .recv_buffer_size(config.recv_buffer_size)
            .max_payload_size(config.max_payload_size)
            .bind(config.bind_addr)
            .await
            .map_err(|source| ClientError::BindFailed {
                addr: config.bind_addr,
                source,
            })?;
        info!(local = %socket.local_addr()?, server = %config.server_addr, "client socket ready");

        Ok(Self {
            connection: LogicalConnection::new(config.server_addr, 0, registry)
                .with_max_payload_size(config.max_payload_size),
            config,
            socket,
            send_buf: ByteBuffer::new(),
            recv_buf: ByteBuffer::new(),
        })
    }

    /// Encode `obj` and send it to the server.
    ///
    /// A datagram that could not be sent leaves no trace in the outbound
    /// stream.
    pub async fn send_object(
        &mut self,
        obj: Option<&dyn Streamable>,
    ) -> ClientResult<DatagramHeader> {
        let header = self.connection.encode(obj, &mut self.send_buf)?;
        if let Err(e) = self
            .socket
            .send_to(self.send_buf.as_slice(), self.connection.peer())
            .await
        {
            self.connection.cancel_encode();
            return Err(e.into());
        }
        Ok(header)
    }

    /// Typed form of [`send_object`](Self::send_object).
    pub async fn send_value<T: StreamableType>(
        &mut self,
        value: Option<&T>,
    ) -> ClientResult<DatagramHeader> {
        self.send_object(value.map(|v| v as &dyn Streamable)).await
    }

    /// Wait for the next object from the server.
    ///
    /// Datagrams from other sources and unframed datagrams are dropped. A
    /// codec error ends the connection.
    pub async fn recv_object(&mut self) -> ClientResult<Received> {
        loop {
            let (data, from) = self.socket.recv_from().await?;
            if data.is_empty() {
                warn!(%from, "dropping empty datagram");
                continue;
            }

            let server = self.connection.peer();
            let redirect = from != server;
            if redirect && !(self.config.follow_channel_redirect && from.ip() == server.ip()) {
                debug!(%from, %server, "dropping datagram from unknown source");
                continue;
            }

            self.recv_buf.load(data);
            match self.connection.decode(&mut self.recv_buf) {
                Ok(received) => {
                    if redirect {
                        debug!(%from, previous = %server, "following channel redirect");
                        self.connection.set_peer(from);
                    }
                    return Ok(received);
                }
                Err(err) if err.is_silent_drop() => {
                    debug!(%from, error = %err, "dropping datagram");
                }
                Err(TransportError::Codec(err)) => {
                    warn!(%from, error = %err, "server stream failed");
                    return Err(ClientError::Codec(err));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Receive the next object, requiring it to be a `T` or null.
    pub async fn recv_value<T: StreamableType>(&mut self) -> ClientResult<Option<T>> {
        let received = self.recv_object().await?;
        let Some(object) = received.object else {
            return Ok(None);
        };
        let found = object.stream_name();
        object
            .downcast::<T>()
            .map(|value| Some(*value))
            .ok_or_else(|| {
                ClientError::Codec(
                    crate::codec::MalformedData::TypeMismatch {
                        expected: T::TYPE_NAME,
                        found,
                    }
                    .into(),
                )
            })
    }

    /// Server address currently targeted (changes on redirect).
    pub fn server_addr(&self) -> SocketAddr {
        self.connection.peer()
    }

    /// Local socket address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// The logical connection.
    pub fn connection(&self) -> &LogicalConnection {
        &self.connection
    }

    /// The logical connection, for round management on its writer.
    pub fn connection_mut(&mut self) -> &mut LogicalConnection {
        &mut self.connection
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}
