//! Event types for the Huddle protocol.
//!
//! Every frame on the wire is an envelope of the form
//! `{ "event": <name>, "data": <payload> }`. Inbound and outbound events
//! are separate enums so a client can never name a server-only event.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::version::{Version, PROTOCOL_VERSION};

/// An instant attached to outbound events.
pub type Timestamp = DateTime<Utc>;

/// Write a timestamp as RFC 3339 with exactly three fractional digits.
fn serialize_millis<S: Serializer>(ts: &Timestamp, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Events sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Declare a display name for this connection.
    #[serde(alias = "user_join")]
    Join {
        /// Requested display name.
        username: String,
    },

    /// Post a chat message to everyone.
    SendMessage {
        /// Message body.
        message: String,
    },

    /// Report a change in typing state.
    Typing {
        /// Whether the client is currently typing.
        #[serde(rename = "isTyping")]
        is_typing: bool,
    },
}

impl ClientEvent {
    /// Wire name of the event, used for logging and metric labels.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join { .. } => "join",
            ClientEvent::SendMessage { .. } => "send_message",
            ClientEvent::Typing { .. } => "typing",
        }
    }

    /// Create a join event.
    #[must_use]
    pub fn join(username: impl Into<String>) -> Self {
        ClientEvent::Join {
            username: username.into(),
        }
    }

    /// Create a send_message event.
    #[must_use]
    pub fn send_message(message: impl Into<String>) -> Self {
        ClientEvent::SendMessage {
            message: message.into(),
        }
    }

    /// Create a typing event.
    #[must_use]
    pub fn typing(is_typing: bool) -> Self {
        ClientEvent::Typing { is_typing }
    }
}

/// Payload of `user_joined` and `user_left`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceNotice {
    /// Display name of the user who joined or left.
    pub username: String,
    /// Human-readable notice, e.g. `"alice joined the chat"`.
    pub message: String,
    /// When the server observed the change.
    #[serde(serialize_with = "serialize_millis")]
    pub timestamp: Timestamp,
}

/// Payload of `receive_message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    /// Sender's display name, resolved by the server.
    pub username: String,
    /// Message body.
    pub message: String,
    /// When the server accepted the message.
    #[serde(serialize_with = "serialize_millis")]
    pub timestamp: Timestamp,
}

/// Payload of `user_typing`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingNotice {
    /// Display name of the typist.
    pub username: String,
    /// Last reported typing state.
    #[serde(rename = "isTyping")]
    pub is_typing: bool,
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Connection established; sent only to the new connection.
    Connected {
        /// Identifier assigned by the server.
        connection_id: String,
        /// Protocol version spoken by the server.
        version: Version,
    },

    /// Someone declared a display name.
    UserJoined(PresenceNotice),

    /// A chat message, echoed to its sender as well.
    ReceiveMessage(ChatPayload),

    /// Someone's typing state changed.
    UserTyping(TypingNotice),

    /// A named connection went away.
    UserLeft(PresenceNotice),
}

impl ServerEvent {
    /// Wire name of the event, used for logging and metric labels.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::UserJoined(_) => "user_joined",
            ServerEvent::ReceiveMessage(_) => "receive_message",
            ServerEvent::UserTyping(_) => "user_typing",
            ServerEvent::UserLeft(_) => "user_left",
        }
    }

    /// Create a Connected event for the current protocol version.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>) -> Self {
        ServerEvent::Connected {
            connection_id: connection_id.into(),
            version: PROTOCOL_VERSION,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_client_event_shapes() {
        let join: ClientEvent =
            serde_json::from_value(json!({"event": "join", "data": {"username": "alice"}}))
                .unwrap();
        assert_eq!(join, ClientEvent::join("alice"));

        let typing: ClientEvent =
            serde_json::from_value(json!({"event": "typing", "data": {"isTyping": true}}))
                .unwrap();
        assert_eq!(typing, ClientEvent::typing(true));
    }

    #[test]
    fn test_user_join_alias() {
        let event: ClientEvent =
            serde_json::from_value(json!({"event": "user_join", "data": {"username": "bob"}}))
                .unwrap();
        assert_eq!(event, ClientEvent::join("bob"));
        assert_eq!(event.name(), "join");
    }

    #[test]
    fn test_forged_sender_is_ignored() {
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "send_message",
            "data": {"message": "hi", "username": "mallory"}
        }))
        .unwrap();
        assert_eq!(event, ClientEvent::send_message("hi"));
    }

    #[test]
    fn test_malformed_client_events() {
        let cases = [
            json!({"event": "join", "data": {}}),
            json!({"event": "typing", "data": {"isTyping": "yes"}}),
            json!({"event": "user_joined", "data": {"username": "x"}}),
            json!({"data": {"message": "hi"}}),
        ];
        for case in cases {
            assert!(serde_json::from_value::<ClientEvent>(case).is_err());
        }
    }

    #[test]
    fn test_server_event_shape() {
        let event = ServerEvent::UserTyping(TypingNotice {
            username: "alice".into(),
            is_typing: false,
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "user_typing", "data": {"username": "alice", "isTyping": false}})
        );
    }

    #[test]
    fn test_connected_event() {
        let event = ServerEvent::connected("conn_1");
        assert_eq!(event.name(), "connected");
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event": "connected",
                "data": {"connection_id": "conn_1", "version": {"major": 1, "minor": 0}}
            })
        );
    }

    #[test]
    fn test_timestamp_always_has_millis() {
        let whole_second = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let event = ServerEvent::ReceiveMessage(ChatPayload {
            username: "a".into(),
            message: "b".into(),
            timestamp: whole_second,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["data"]["timestamp"], "2024-05-01T12:00:00.000Z");

        let back: ServerEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);

        let notice = PresenceNotice {
            username: "a".into(),
            message: "a left the chat".into(),
            timestamp: whole_second + chrono::Duration::milliseconds(7),
        };
        assert_eq!(
            serde_json::to_value(&notice).unwrap()["timestamp"],
            "2024-05-01T12:00:00.007Z"
        );
    }
}
