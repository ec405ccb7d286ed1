//! Typing indicator relay.

use crate::broadcast::{fan_out, Audience, Delivery};
use crate::connection::ConnectionId;
use crate::message::TypingEvent;
use crate::registry::ConnectionRegistry;
use std::collections::HashMap;
use tracing::trace;

/// Relays typing state changes to everyone except the typist.
///
/// Only the last relayed signal per connection is remembered. Signals are
/// never debounced, aggregated or expired.
#[derive(Debug, Default)]
pub struct TypingTracker {
    last: HashMap<ConnectionId, bool>,
}

impl TypingTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Relay a typing signal from `origin`.
    ///
    /// Returns `None` without broadcasting if `origin` has no bound name.
    pub fn relay(
        &mut self,
        registry: &ConnectionRegistry,
        origin: &ConnectionId,
        is_typing: bool,
    ) -> Option<Delivery> {
        let display_name = registry.lookup_name(origin)?.to_string();
        self.last.insert(origin.clone(), is_typing);
        trace!(connection = %origin, is_typing, "Relaying typing state");

        let event = TypingEvent {
            display_name,
            is_typing,
        };
        Some(fan_out(registry, Audience::AllExcept(origin), event))
    }

    /// Forget a connection, returning whether it was last seen typing.
    pub fn forget(&mut self, id: &ConnectionId) -> bool {
        self.last.remove(id).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_protocol::ServerEvent;
    use tokio::sync::mpsc;

    #[test]
    fn test_relay_skips_origin_and_keeps_order() {
        let mut registry = ConnectionRegistry::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        registry.register("conn-1".into(), tx1).unwrap();
        registry.register("conn-2".into(), tx2).unwrap();
        registry.bind_name(&"conn-1".into(), "alice").unwrap();

        let mut tracker = TypingTracker::new();
        tracker.relay(&registry, &"conn-1".into(), true).unwrap();
        tracker.relay(&registry, &"conn-1".into(), false).unwrap();

        assert!(rx1.try_recv().is_err());
        let states: Vec<bool> = std::iter::from_fn(|| rx2.try_recv().ok())
            .map(|event| match event.as_ref() {
                ServerEvent::UserTyping(notice) => {
                    assert_eq!(notice.username, "alice");
                    notice.is_typing
                }
                other => panic!("Expected user_typing, got {:?}", other),
            })
            .collect();
        assert_eq!(states, [true, false]);
    }

    #[test]
    fn test_unnamed_origin_is_ignored() {
        let mut registry = ConnectionRegistry::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        registry.register("conn-1".into(), tx1).unwrap();
        registry.register("conn-2".into(), tx2).unwrap();

        let mut tracker = TypingTracker::new();
        assert!(tracker.relay(&registry, &"conn-1".into(), true).is_none());
        assert!(rx2.try_recv().is_err());
        assert!(!tracker.forget(&"conn-1".into()));
    }

    #[test]
    fn test_forget() {
        let mut registry = ConnectionRegistry::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        registry.register("conn-1".into(), tx1).unwrap();
        registry.bind_name(&"conn-1".into(), "alice").unwrap();

        let mut tracker = TypingTracker::new();
        tracker.relay(&registry, &"conn-1".into(), true);
        assert!(tracker.forget(&"conn-1".into()));
        assert!(!tracker.forget(&"conn-1".into()));
    }
}
