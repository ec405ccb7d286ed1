//! Presence announcements for Huddle.
//!
//! Joins go to everyone but the joiner, who already knows it joined.
//! Leaves go to whoever remains; the leaver has been removed from the
//! registry by the time the announcement is made.

use crate::broadcast::{fan_out, Audience, Delivery};
use crate::connection::ConnectionId;
use crate::message::{PresenceEvent, PresenceKind};
use crate::registry::ConnectionRegistry;
use tracing::debug;

/// Broadcasts join and leave notices.
#[derive(Debug, Clone, Copy)]
pub struct PresenceBroadcaster<'a> {
    registry: &'a ConnectionRegistry,
}

impl<'a> PresenceBroadcaster<'a> {
    /// Create a broadcaster over the given registry.
    #[must_use]
    pub fn new(registry: &'a ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Announce a join to every connection except `origin`.
    pub fn announce_join(&self, origin: &ConnectionId, event: PresenceEvent) -> Delivery {
        debug_assert_eq!(event.kind, PresenceKind::Joined);
        debug!(connection = %origin, user = %event.display_name, "Presence: joined");
        fan_out(self.registry, Audience::AllExcept(origin), event)
    }

    /// Announce a leave to every remaining connection.
    pub fn announce_leave(&self, event: PresenceEvent) -> Delivery {
        debug_assert_eq!(event.kind, PresenceKind::Left);
        debug!(user = %event.display_name, "Presence: left");
        fan_out(self.registry, Audience::Everyone, event)
    }
}
