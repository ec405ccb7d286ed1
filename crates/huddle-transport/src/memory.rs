//! In-memory transport.
//!
//! A [`MemoryConnection`] and its [`MemoryClient`] exchange encoded frames
//! over a pair of unbounded channels, so a session can be driven end to
//! end without sockets. Frames still go through the codec.

use async_trait::async_trait;
use huddle_core::ConnectionId;
use huddle_protocol::{codec, ClientEvent, Encoding, ServerEvent, WireFrame};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::traits::{Connection, TransportError, DEFAULT_MAX_MESSAGE_SIZE};

/// Create a connected server/client pair.
#[must_use]
pub fn pair(encoding: Encoding) -> (MemoryConnection, MemoryClient) {
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();

    let connection = MemoryConnection {
        id: ConnectionId::generate(),
        inbound: server_rx,
        outbound: server_tx,
        encoding,
        max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        last_seen: Instant::now(),
        is_open: true,
    };
    let client = MemoryClient {
        outbound: Some(client_tx),
        inbound: client_rx,
        encoding,
    };
    (connection, client)
}

/// Server side of an in-memory connection.
pub struct MemoryConnection {
    id: ConnectionId,
    inbound: mpsc::UnboundedReceiver<WireFrame>,
    outbound: mpsc::UnboundedSender<WireFrame>,
    encoding: Encoding,
    max_message_size: usize,
    last_seen: Instant,
    is_open: bool,
}

impl MemoryConnection {
    /// Set the maximum accepted inbound frame size in bytes.
    #[must_use]
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<ClientEvent>, TransportError> {
        match self.inbound.recv().await {
            Some(frame) => {
                self.last_seen = Instant::now();
                Ok(Some(codec::decode_limited(&frame, self.max_message_size)?))
            }
            None => {
                self.is_open = false;
                Ok(None)
            }
        }
    }

    async fn send(&mut self, event: &ServerEvent) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }
        let frame = codec::encode(event, self.encoding)?;
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::SendFailed("client dropped".into()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.is_open = false;
        self.inbound.close();
        Ok(())
    }

    fn last_seen(&self) -> Instant {
        self.last_seen
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}

/// Client side of an in-memory connection.
pub struct MemoryClient {
    outbound: Option<mpsc::UnboundedSender<WireFrame>>,
    inbound: mpsc::UnboundedReceiver<WireFrame>,
    encoding: Encoding,
}

impl MemoryClient {
    /// Send an event to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the connection is closed.
    pub fn send(&self, event: &ClientEvent) -> Result<(), TransportError> {
        let frame = codec::encode(event, self.encoding)?;
        self.send_frame(frame)
    }

    /// Send a raw frame to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed.
    pub fn send_frame(&self, frame: WireFrame) -> Result<(), TransportError> {
        self.outbound
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Receive the next event from the server.
    ///
    /// Returns `Ok(None)` once the server side is gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be decoded.
    pub async fn recv(&mut self) -> Result<Option<ServerEvent>, TransportError> {
        match self.inbound.recv().await {
            Some(frame) => Ok(Some(codec::decode(&frame)?)),
            None => Ok(None),
        }
    }

    /// Close the client side; the server observes a clean disconnect.
    pub fn close(&mut self) {
        self.outbound = None;
    }
}
