//! # huddle-core
//!
//! Session and broadcast engine for the Huddle chat relay.
//!
//! This crate provides the building blocks the server wires to a transport:
//!
//! - **ConnectionRegistry** - Who is connected and under which name
//! - **SessionRouter** - Per-connection state machine and event dispatch
//! - **PresenceBroadcaster** - Join/leave announcements
//! - **MessageBroadcaster** - Chat fan-out, sender included
//! - **TypingTracker** - Typing indicator relay
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌───────────────┐     ┌────────────────────┐
//! │  Connection │────▶│ SessionRouter │────▶│ ConnectionRegistry │
//! └─────────────┘     └───────────────┘     └────────────────────┘
//!                             │
//!          ┌──────────────────┼──────────────────┐
//!          ▼                  ▼                  ▼
//!   ┌────────────┐     ┌────────────┐     ┌────────────┐
//!   │  Presence  │     │  Message   │     │   Typing   │
//!   └────────────┘     └────────────┘     └────────────┘
//! ```

pub mod broadcast;
pub mod connection;
pub mod message;
pub mod presence;
pub mod registry;
pub mod router;
pub mod typing;

pub use broadcast::{Audience, Delivery, MessageBroadcaster};
pub use connection::{ConnectionId, SessionState};
pub use message::{ChatMessage, PresenceEvent, PresenceKind, TypingEvent};
pub use presence::PresenceBroadcaster;
pub use registry::{ConnectionRegistry, Outbox, RegistryError};
pub use router::{
    Departure, Dispatch, DropReason, RouterConfig, RouterError, RouterStats, SessionRouter,
};
pub use typing::TypingTracker;
