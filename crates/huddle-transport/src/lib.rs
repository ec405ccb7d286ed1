//! # huddle-transport
//!
//! Transport abstraction layer for the Huddle chat relay.
//!
//! - **WebSocket** - Upgraded axum WebSocket, one event per message
//! - **Memory** - Channel-backed pair for driving sessions in-process
//!
//! ## Transport Abstraction
//!
//! Every transport implements the `Connection` trait, so the session
//! driver never sees the underlying protocol.
//!
//! ```rust,ignore
//! use huddle_transport::Connection;
//!
//! async fn handle_connection(mut conn: impl Connection) {
//!     while let Ok(Some(event)) = conn.recv().await {
//!         // Dispatch event
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{MemoryClient, MemoryConnection};
pub use traits::{Connection, TransportError, DEFAULT_MAX_MESSAGE_SIZE};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnection;
