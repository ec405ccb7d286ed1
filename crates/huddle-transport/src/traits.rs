//! Transport abstraction traits for Huddle.
//!
//! These traits define the interface every transport implementation must
//! provide, allowing the session driver to be transport-agnostic.

use async_trait::async_trait;
use huddle_core::ConnectionId;
use huddle_protocol::{ClientEvent, ServerEvent};
use thiserror::Error;
use tokio::time::Instant;

/// Default maximum inbound message size (64 KB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// A frame could not be decoded or encoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] huddle_protocol::ProtocolError),
}

impl TransportError {
    /// Whether the connection is unusable after this error.
    ///
    /// Protocol errors only affect the offending frame.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::Protocol(_))
    }
}

/// An active connection over a transport.
///
/// Connections handle the bidirectional flow of events between the server
/// and a single client.
#[async_trait]
pub trait Connection: Send {
    /// Get the connection's unique identifier.
    fn id(&self) -> &ConnectionId;

    /// Receive the next event from the connection.
    ///
    /// Returns `None` if the connection is closed cleanly. Must be
    /// cancel-safe: the session driver races it against outbound delivery.
    async fn recv(&mut self) -> Result<Option<ClientEvent>, TransportError>;

    /// Send an event to the connection.
    async fn send(&mut self, event: &ServerEvent) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Send a transport-level liveness ping.
    ///
    /// Transports whose peers cannot answer pings leave this a no-op.
    async fn ping(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// When the last frame of any kind arrived from the peer.
    fn last_seen(&self) -> Instant;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_protocol::ProtocolError;

    #[test]
    fn test_error_fatality() {
        let protocol = TransportError::Protocol(ProtocolError::FrameTooLarge {
            size: 10,
            limit: 5,
        });
        assert!(!protocol.is_fatal());
        assert!(TransportError::ConnectionClosed.is_fatal());
        assert!(TransportError::ReceiveFailed("reset".into()).is_fatal());
    }
}
