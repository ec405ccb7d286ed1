//! Event model for Huddle.
//!
//! These values are built once per inbound event by the router, handed to
//! a broadcaster and dropped after fan-out. Nothing here is persisted.

use chrono::{SubsecRound, Utc};
use huddle_protocol::{ChatPayload, PresenceNotice, ServerEvent, Timestamp, TypingNotice};

/// Current time with millisecond precision.
#[must_use]
pub fn timestamp_now() -> Timestamp {
    Utc::now().trunc_subsecs(3)
}

/// A chat message being relayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Sender's display name, resolved from the registry.
    pub sender: String,
    /// Message body as sent by the client.
    pub body: String,
    /// When the router accepted the message.
    pub sent_at: Timestamp,
}

impl ChatMessage {
    /// Create a new chat message.
    #[must_use]
    pub fn new(sender: impl Into<String>, body: impl Into<String>, sent_at: Timestamp) -> Self {
        Self {
            sender: sender.into(),
            body: body.into(),
            sent_at,
        }
    }
}

impl From<ChatMessage> for ServerEvent {
    fn from(msg: ChatMessage) -> Self {
        ServerEvent::ReceiveMessage(ChatPayload {
            username: msg.sender,
            message: msg.body,
            timestamp: msg.sent_at,
        })
    }
}

/// Kind of presence change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceKind {
    /// A connection bound a display name.
    Joined,
    /// A named connection disconnected.
    Left,
}

/// A presence change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEvent {
    /// Display name of the user.
    pub display_name: String,
    /// Join or leave.
    pub kind: PresenceKind,
    /// When the router observed the change.
    pub occurred_at: Timestamp,
}

impl PresenceEvent {
    /// A user joined.
    #[must_use]
    pub fn joined(display_name: impl Into<String>, occurred_at: Timestamp) -> Self {
        Self {
            display_name: display_name.into(),
            kind: PresenceKind::Joined,
            occurred_at,
        }
    }

    /// A user left.
    #[must_use]
    pub fn left(display_name: impl Into<String>, occurred_at: Timestamp) -> Self {
        Self {
            display_name: display_name.into(),
            kind: PresenceKind::Left,
            occurred_at,
        }
    }

    /// Human-readable notice shown in the chat timeline.
    #[must_use]
    pub fn notice(&self) -> String {
        match self.kind {
            PresenceKind::Joined => format!("{} joined the chat", self.display_name),
            PresenceKind::Left => format!("{} left the chat", self.display_name),
        }
    }
}

impl From<PresenceEvent> for ServerEvent {
    fn from(event: PresenceEvent) -> Self {
        let notice = PresenceNotice {
            message: event.notice(),
            username: event.display_name,
            timestamp: event.occurred_at,
        };
        match event.kind {
            PresenceKind::Joined => ServerEvent::UserJoined(notice),
            PresenceKind::Left => ServerEvent::UserLeft(notice),
        }
    }
}

/// A typing state change. Carries no timestamp and never expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingEvent {
    /// Display name of the typist.
    pub display_name: String,
    /// Last reported state.
    pub is_typing: bool,
}

impl From<TypingEvent> for ServerEvent {
    fn from(event: TypingEvent) -> Self {
        ServerEvent::UserTyping(TypingNotice {
            username: event.display_name,
            is_typing: event.is_typing,
        })
    }
}
