//! Fan-out of events to registered connections.
//!
//! Delivery is fire-and-forget: a recipient whose queue has closed is
//! skipped and counted, and never stops delivery to the others.

use crate::connection::ConnectionId;
use crate::message::ChatMessage;
use crate::registry::ConnectionRegistry;
use huddle_protocol::ServerEvent;
use std::sync::Arc;
use tracing::trace;

/// Which connections receive an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience<'a> {
    /// Every registered connection.
    Everyone,
    /// Every registered connection except the given one.
    AllExcept(&'a ConnectionId),
}

impl Audience<'_> {
    fn includes(&self, id: &ConnectionId) -> bool {
        match self {
            Audience::Everyone => true,
            Audience::AllExcept(origin) => *origin != id,
        }
    }
}

/// Outcome of a single fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Recipients whose queue accepted the event.
    pub delivered: usize,
    /// Recipients whose queue had already closed.
    pub failed: usize,
}

/// Deliver one event to the selected audience.
///
/// The event is shared between recipients, so every recipient sees the
/// exact same payload and timestamp.
pub fn fan_out(
    registry: &ConnectionRegistry,
    audience: Audience<'_>,
    event: impl Into<ServerEvent>,
) -> Delivery {
    let event = Arc::new(event.into());
    let mut delivery = Delivery::default();

    for (id, outbox) in registry.outboxes() {
        if !audience.includes(id) {
            continue;
        }
        if outbox.send(Arc::clone(&event)).is_ok() {
            delivery.delivered += 1;
        } else {
            trace!(connection = %id, event = event.name(), "Recipient gone, skipping");
            delivery.failed += 1;
        }
    }

    delivery
}

/// Broadcasts chat messages to everyone, the sender included.
///
/// The echo to the sender is what confirms delivery in its own timeline.
#[derive(Debug, Clone, Copy)]
pub struct MessageBroadcaster<'a> {
    registry: &'a ConnectionRegistry,
}

impl<'a> MessageBroadcaster<'a> {
    /// Create a broadcaster over the given registry.
    #[must_use]
    pub fn new(registry: &'a ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Send a chat message to every registered connection.
    pub fn broadcast(&self, message: ChatMessage) -> Delivery {
        fan_out(self.registry, Audience::Everyone, message)
    }
}
