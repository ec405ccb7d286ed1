//! WebSocket transport implementation.
//!
//! Adapts an upgraded axum WebSocket to the [`Connection`] trait. Each
//! WebSocket message carries exactly one event: JSON in text messages,
//! MessagePack in binary messages.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use huddle_core::ConnectionId;
use huddle_protocol::{codec, ClientEvent, Encoding, ServerEvent, WireFrame};
use std::net::SocketAddr;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::traits::{Connection, TransportError, DEFAULT_MAX_MESSAGE_SIZE};

/// A WebSocket connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    socket: WebSocket,
    encoding: Encoding,
    remote_addr: Option<SocketAddr>,
    max_message_size: usize,
    last_seen: Instant,
    is_open: bool,
}

impl WebSocketConnection {
    /// Wrap an upgraded WebSocket, assigning it a fresh connection ID.
    #[must_use]
    pub fn new(socket: WebSocket, encoding: Encoding) -> Self {
        Self {
            id: ConnectionId::generate(),
            socket,
            encoding,
            remote_addr: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            last_seen: Instant::now(),
            is_open: true,
        }
    }

    /// Set the peer address reported by [`Connection::remote_addr`].
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Set the maximum accepted inbound message size in bytes.
    #[must_use]
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<ClientEvent>, TransportError> {
        loop {
            let received = self.socket.recv().await;
            if let Some(Ok(_)) = received {
                self.last_seen = Instant::now();
            }

            let frame = match received {
                Some(Ok(Message::Text(text))) => WireFrame::Text(text),
                Some(Ok(Message::Binary(data))) => WireFrame::Binary(Bytes::from(data)),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    // Pings are answered by axum itself; both count as activity.
                    continue;
                }
                Some(Ok(Message::Close(_))) => {
                    debug!(connection = %self.id, "Received close frame");
                    self.is_open = false;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    warn!(connection = %self.id, error = %e, "WebSocket error");
                    self.is_open = false;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!(connection = %self.id, "WebSocket stream ended");
                    self.is_open = false;
                    return Ok(None);
                }
            };

            let event = codec::decode_limited(&frame, self.max_message_size)?;
            return Ok(Some(event));
        }
    }

    async fn send(&mut self, event: &ServerEvent) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }

        let message = match codec::encode(event, self.encoding)? {
            WireFrame::Text(text) => Message::Text(text),
            WireFrame::Binary(data) => Message::Binary(data.to_vec()),
        };
        self.socket
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.is_open {
            return Ok(()); // Already closed
        }
        self.is_open = false;

        self.socket
            .send(Message::Close(None))
            .await
            .map_err(|e| TransportError::SendFailed(format!("Failed to close: {}", e)))
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }
        self.socket
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn last_seen(&self) -> Instant {
        self.last_seen
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}
