//! # huddle-protocol
//!
//! Wire events for the Huddle chat relay.
//!
//! Every frame is an `{ "event": ..., "data": ... }` envelope, carried as
//! JSON in text frames or MessagePack in binary frames.
//!
//! ## Events
//!
//! - Inbound: `join`, `send_message`, `typing`
//! - Outbound: `connected`, `user_joined`, `receive_message`,
//!   `user_typing`, `user_left`
//!
//! ## Example
//!
//! ```rust
//! use huddle_protocol::{codec, ClientEvent, Encoding};
//!
//! let frame = codec::encode(&ClientEvent::join("alice"), Encoding::Json).unwrap();
//! let decoded: ClientEvent = codec::decode(&frame).unwrap();
//! assert_eq!(decoded, ClientEvent::join("alice"));
//! ```

pub mod codec;
pub mod events;
pub mod version;

pub use codec::{decode, decode_limited, encode, Encoding, ProtocolError, WireFrame};
pub use events::{ChatPayload, ClientEvent, PresenceNotice, ServerEvent, Timestamp, TypingNotice};
pub use version::{Version, PROTOCOL_VERSION};
