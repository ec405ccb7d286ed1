//! Session router for Huddle.
//!
//! The router receives inbound events from connections, drives each
//! connection through `Open -> Named -> Closed`, and hands results to the
//! broadcasters. All registry mutation and fan-out happens under a single
//! lock, so every recipient observes events in the order the router
//! processed them.

use crate::broadcast::{fan_out, Audience, Delivery, MessageBroadcaster};
use crate::connection::{ConnectionId, SessionState};
use crate::message::{timestamp_now, ChatMessage, PresenceEvent, TypingEvent};
use crate::presence::PresenceBroadcaster;
use crate::registry::{ConnectionRegistry, Outbox, RegistryError};
use crate::typing::TypingTracker;
use huddle_protocol::ClientEvent;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Router errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    /// Registry contract violated.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Router configuration.
#[derive(Debug, Clone, Default)]
pub struct RouterConfig {
    /// Emit `isTyping=false` on behalf of a connection that disconnects
    /// while its last signal was `isTyping=true`.
    pub clear_typing_on_leave: bool,
}

/// Why an inbound event produced no broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Chat or typing event from a connection that has not joined.
    NotJoined,
    /// Join with an empty or whitespace-only username.
    EmptyUsername,
    /// Chat message with an empty or whitespace-only body.
    EmptyMessage,
}

impl DropReason {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::NotJoined => "not_joined",
            DropReason::EmptyUsername => "empty_username",
            DropReason::EmptyMessage => "empty_message",
        }
    }
}

/// Result of dispatching one inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// First join; announced to everyone else.
    Joined {
        /// Bound display name.
        name: String,
        /// Fan-out result of the announcement.
        delivery: Delivery,
    },
    /// Join from an already named connection; rebound without announcement.
    Renamed {
        /// Name bound before.
        previous: String,
        /// Name bound now.
        name: String,
    },
    /// Chat message or typing signal relayed.
    Relayed(Delivery),
    /// Silently dropped.
    Dropped(DropReason),
}

/// Result of a disconnect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Departure {
    /// Name the connection had bound, if it ever joined.
    pub name: Option<String>,
    /// Fan-out result of the leave announcement (empty if unnamed).
    pub delivery: Delivery,
    /// Whether a trailing `isTyping=false` was emitted.
    pub typing_cleared: bool,
}

/// Router statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterStats {
    /// Number of registered connections.
    pub connections: usize,
    /// Number of connections with a bound name.
    pub named: usize,
}

#[derive(Debug, Default)]
struct RouterState {
    registry: ConnectionRegistry,
    typing: TypingTracker,
}

/// The session router.
///
/// Owns the connection registry; broadcasters only ever borrow it.
#[derive(Debug, Default)]
pub struct SessionRouter {
    state: Mutex<RouterState>,
    config: RouterConfig,
}

impl SessionRouter {
    /// Create a new router with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    /// Create a new router with custom configuration.
    #[must_use]
    pub fn with_config(config: RouterConfig) -> Self {
        info!("Creating session router with config: {:?}", config);
        Self {
            state: Mutex::new(RouterState::default()),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RouterState> {
        // Registry operations never leave it half-updated, so a poisoned
        // lock is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a freshly connected transport session.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection ID is already registered.
    pub fn connect(&self, id: ConnectionId, outbox: Outbox) -> Result<(), RouterError> {
        self.lock().registry.register(id, outbox)?;
        Ok(())
    }

    /// Dispatch an inbound event from a connection.
    ///
    /// Events that cannot be attributed or carry no content are dropped
    /// without telling the sender.
    ///
    /// # Errors
    ///
    /// Returns `UnknownConnection` if `id` is not registered.
    pub fn dispatch(&self, id: &ConnectionId, event: ClientEvent) -> Result<Dispatch, RouterError> {
        let mut state = self.lock();
        if !state.registry.contains(id) {
            return Err(RegistryError::UnknownConnection(id.clone()).into());
        }

        let dispatch = match event {
            ClientEvent::Join { username } => state.join(id, &username)?,
            ClientEvent::SendMessage { message } => state.send_message(id, message),
            ClientEvent::Typing { is_typing } => state.typing(id, is_typing),
        };

        if let Dispatch::Dropped(reason) = dispatch {
            debug!(connection = %id, reason = reason.as_str(), "Dropped inbound event");
        }
        Ok(dispatch)
    }

    /// Remove a connection, announcing the departure if it had joined.
    pub fn disconnect(&self, id: &ConnectionId) -> Departure {
        let mut state = self.lock();
        if !state.registry.contains(id) {
            warn!(connection = %id, "Disconnect for unregistered connection");
            return Departure::default();
        }

        let was_typing = state.typing.forget(id);
        let Some(name) = state.registry.remove(id) else {
            debug!(connection = %id, "Unnamed connection closed");
            return Departure::default();
        };

        let typing_cleared = was_typing && self.config.clear_typing_on_leave;
        if typing_cleared {
            let event = TypingEvent {
                display_name: name.clone(),
                is_typing: false,
            };
            fan_out(&state.registry, Audience::Everyone, event);
        }

        let event = PresenceEvent::left(name.as_str(), timestamp_now());
        let delivery = PresenceBroadcaster::new(&state.registry).announce_leave(event);
        info!(connection = %id, user = %name, recipients = delivery.delivered, "User left the chat");

        Departure {
            name: Some(name),
            delivery,
            typing_cleared,
        }
    }

    /// Lifecycle state of a connection.
    #[must_use]
    pub fn state(&self, id: &ConnectionId) -> SessionState {
        self.lock().registry.state(id)
    }

    /// Display name bound to a connection.
    #[must_use]
    pub fn lookup_name(&self, id: &ConnectionId) -> Option<String> {
        self.lock().registry.lookup_name(id).map(str::to_string)
    }

    /// Snapshot of registered connections in registration order.
    #[must_use]
    pub fn connections(&self) -> Vec<ConnectionId> {
        self.lock().registry.all()
    }

    /// Get router statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        let state = self.lock();
        RouterStats {
            connections: state.registry.len(),
            named: state.registry.named_count(),
        }
    }
}

impl RouterState {
    fn join(&mut self, id: &ConnectionId, username: &str) -> Result<Dispatch, RegistryError> {
        let name = username.trim();
        if name.is_empty() {
            return Ok(Dispatch::Dropped(DropReason::EmptyUsername));
        }

        if let Some(previous) = self.registry.bind_name(id, name)? {
            debug!(connection = %id, previous = %previous, user = %name, "Rebound display name");
            return Ok(Dispatch::Renamed {
                previous,
                name: name.to_string(),
            });
        }

        let event = PresenceEvent::joined(name, timestamp_now());
        let delivery = PresenceBroadcaster::new(&self.registry).announce_join(id, event);
        info!(connection = %id, user = %name, recipients = delivery.delivered, "User joined the chat");

        Ok(Dispatch::Joined {
            name: name.to_string(),
            delivery,
        })
    }

    fn send_message(&self, id: &ConnectionId, body: String) -> Dispatch {
        let Some(sender) = self.registry.lookup_name(id) else {
            return Dispatch::Dropped(DropReason::NotJoined);
        };
        if body.trim().is_empty() {
            return Dispatch::Dropped(DropReason::EmptyMessage);
        }

        let message = ChatMessage::new(sender, body, timestamp_now());
        let delivery = MessageBroadcaster::new(&self.registry).broadcast(message);
        debug!(connection = %id, recipients = delivery.delivered, "Message broadcast");
        Dispatch::Relayed(delivery)
    }

    fn typing(&mut self, id: &ConnectionId, is_typing: bool) -> Dispatch {
        match self.typing.relay(&self.registry, id, is_typing) {
            Some(delivery) => Dispatch::Relayed(delivery),
            None => Dispatch::Dropped(DropReason::NotJoined),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_protocol::ServerEvent;
    use std::sync::Arc;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    type Inbox = UnboundedReceiver<Arc<ServerEvent>>;

    fn connect(router: &SessionRouter, id: &str) -> (ConnectionId, Inbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ConnectionId::new(id);
        router.connect(id.clone(), tx).unwrap();
        (id, rx)
    }

    fn drain(rx: &mut Inbox) -> Vec<Arc<ServerEvent>> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn test_name_absent_until_join() {
        let router = SessionRouter::new();
        let (c1, _rx1) = connect(&router, "conn-1");
        let (c2, _rx2) = connect(&router, "conn-2");

        assert_eq!(router.lookup_name(&c1), None);
        router.dispatch(&c1, ClientEvent::send_message("early")).unwrap();
        router.dispatch(&c1, ClientEvent::typing(true)).unwrap();
        assert_eq!(router.lookup_name(&c1), None);
        assert_eq!(router.state(&c1), SessionState::Open);

        router.dispatch(&c1, ClientEvent::join("alice")).unwrap();
        router.dispatch(&c2, ClientEvent::join("bob")).unwrap();
        router.dispatch(&c2, ClientEvent::send_message("hi")).unwrap();
        assert_eq!(router.lookup_name(&c1), Some("alice".to_string()));
        assert_eq!(router.state(&c1), SessionState::Named);
    }

    #[test]
    fn test_join_announced_to_others_only() {
        let router = SessionRouter::new();
        let (c1, mut rx1) = connect(&router, "conn-1");
        let (_c2, mut rx2) = connect(&router, "conn-2");
        let (_c3, mut rx3) = connect(&router, "conn-3");

        let dispatch = router.dispatch(&c1, ClientEvent::join("alice")).unwrap();
        assert!(matches!(
            dispatch,
            Dispatch::Joined { ref name, delivery } if name == "alice" && delivery.delivered == 2
        ));

        assert!(drain(&mut rx1).is_empty());
        for rx in [&mut rx2, &mut rx3] {
            let events = drain(rx);
            assert_eq!(events.len(), 1);
            match events[0].as_ref() {
                ServerEvent::UserJoined(notice) => {
                    assert_eq!(notice.username, "alice");
                    assert_eq!(notice.message, "alice joined the chat");
                }
                other => panic!("Expected user_joined, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_message_echoed_to_everyone() {
        let router = SessionRouter::new();
        let (c1, mut rx1) = connect(&router, "conn-1");
        let (_c2, mut rx2) = connect(&router, "conn-2");
        router.dispatch(&c1, ClientEvent::join("alice")).unwrap();
        drain(&mut rx2);

        let dispatch = router.dispatch(&c1, ClientEvent::send_message("hi")).unwrap();
        assert!(matches!(dispatch, Dispatch::Relayed(d) if d.delivered == 2));

        let a = drain(&mut rx1);
        let b = drain(&mut rx2);
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        match (a[0].as_ref(), b[0].as_ref()) {
            (ServerEvent::ReceiveMessage(x), ServerEvent::ReceiveMessage(y)) => {
                assert_eq!(x.username, "alice");
                assert_eq!(x.message, "hi");
                assert_eq!(x.timestamp, y.timestamp);
            }
            other => panic!("Expected receive_message, got {:?}", other),
        }
    }

    #[test]
    fn test_unnamed_sender_is_dropped() {
        let router = SessionRouter::new();
        let (c1, mut rx1) = connect(&router, "conn-1");
        let (_c2, mut rx2) = connect(&router, "conn-2");

        assert_eq!(
            router.dispatch(&c1, ClientEvent::send_message("hi")).unwrap(),
            Dispatch::Dropped(DropReason::NotJoined)
        );
        assert_eq!(
            router.dispatch(&c1, ClientEvent::typing(true)).unwrap(),
            Dispatch::Dropped(DropReason::NotJoined)
        );
        assert!(drain(&mut rx1).is_empty());
        assert!(drain(&mut rx2).is_empty());
    }

    #[test]
    fn test_blank_input_is_dropped() {
        let router = SessionRouter::new();
        let (c1, mut rx1) = connect(&router, "conn-1");
        let (_c2, mut rx2) = connect(&router, "conn-2");

        assert_eq!(
            router.dispatch(&c1, ClientEvent::join("   ")).unwrap(),
            Dispatch::Dropped(DropReason::EmptyUsername)
        );
        assert_eq!(router.state(&c1), SessionState::Open);

        router.dispatch(&c1, ClientEvent::join("  alice ")).unwrap();
        assert_eq!(router.lookup_name(&c1), Some("alice".to_string()));
        assert_eq!(
            router.dispatch(&c1, ClientEvent::send_message(" \n")).unwrap(),
            Dispatch::Dropped(DropReason::EmptyMessage)
        );
        assert!(drain(&mut rx1).is_empty());
        assert_eq!(drain(&mut rx2).len(), 1);
    }

    #[test]
    fn test_rejoin_is_silent() {
        let router = SessionRouter::new();
        let (c1, _rx1) = connect(&router, "conn-1");
        let (_c2, mut rx2) = connect(&router, "conn-2");

        router.dispatch(&c1, ClientEvent::join("alice")).unwrap();
        assert_eq!(
            router.dispatch(&c1, ClientEvent::join("alicia")).unwrap(),
            Dispatch::Renamed {
                previous: "alice".into(),
                name: "alicia".into()
            }
        );
        assert_eq!(drain(&mut rx2).len(), 1);
        assert_eq!(router.lookup_name(&c1), Some("alicia".to_string()));

        router.dispatch(&c1, ClientEvent::send_message("hi")).unwrap();
        match drain(&mut rx2)[0].as_ref() {
            ServerEvent::ReceiveMessage(msg) => assert_eq!(msg.username, "alicia"),
            other => panic!("Expected receive_message, got {:?}", other),
        }
    }

    #[test]
    fn test_disconnect_named_announces_once() {
        let router = SessionRouter::new();
        let (c1, _rx1) = connect(&router, "conn-1");
        let (_c2, mut rx2) = connect(&router, "conn-2");
        let (_c3, mut rx3) = connect(&router, "conn-3");
        router.dispatch(&c1, ClientEvent::join("alice")).unwrap();
        drain(&mut rx2);
        drain(&mut rx3);

        let departure = router.disconnect(&c1);
        assert_eq!(departure.name.as_deref(), Some("alice"));
        assert_eq!(departure.delivery.delivered, 2);
        assert_eq!(router.state(&c1), SessionState::Closed);

        // A second disconnect for the same connection is a no-op.
        assert_eq!(router.disconnect(&c1), Departure::default());

        for rx in [&mut rx2, &mut rx3] {
            let events = drain(rx);
            assert_eq!(events.len(), 1);
            match events[0].as_ref() {
                ServerEvent::UserLeft(notice) => {
                    assert_eq!(notice.username, "alice");
                    assert_eq!(notice.message, "alice left the chat");
                }
                other => panic!("Expected user_left, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_disconnect_unnamed_is_silent() {
        let router = SessionRouter::new();
        let (c1, _rx1) = connect(&router, "conn-1");
        let (_c2, mut rx2) = connect(&router, "conn-2");

        assert_eq!(router.disconnect(&c1), Departure::default());
        assert!(drain(&mut rx2).is_empty());
        assert_eq!(router.stats().connections, 1);
    }

    #[test]
    fn test_typing_relayed_in_order() {
        let router = SessionRouter::new();
        let (c1, mut rx1) = connect(&router, "conn-1");
        let (_c2, mut rx2) = connect(&router, "conn-2");
        router.dispatch(&c1, ClientEvent::join("alice")).unwrap();
        drain(&mut rx2);

        router.dispatch(&c1, ClientEvent::typing(true)).unwrap();
        router.dispatch(&c1, ClientEvent::typing(false)).unwrap();

        assert!(drain(&mut rx1).is_empty());
        let states: Vec<bool> = drain(&mut rx2)
            .iter()
            .map(|event| match event.as_ref() {
                ServerEvent::UserTyping(notice) => notice.is_typing,
                other => panic!("Expected user_typing, got {:?}", other),
            })
            .collect();
        assert_eq!(states, [true, false]);
    }

    #[test]
    fn test_stale_typing_kept_by_default() {
        let router = SessionRouter::new();
        let (c1, _rx1) = connect(&router, "conn-1");
        let (_c2, mut rx2) = connect(&router, "conn-2");
        router.dispatch(&c1, ClientEvent::join("alice")).unwrap();
        router.dispatch(&c1, ClientEvent::typing(true)).unwrap();
        drain(&mut rx2);

        let departure = router.disconnect(&c1);
        assert!(!departure.typing_cleared);
        let names: Vec<&str> = drain(&mut rx2).iter().map(|e| e.name()).collect();
        assert_eq!(names, ["user_left"]);
    }

    #[test]
    fn test_clear_typing_on_leave() {
        let router = SessionRouter::with_config(RouterConfig {
            clear_typing_on_leave: true,
        });
        let (c1, _rx1) = connect(&router, "conn-1");
        let (_c2, mut rx2) = connect(&router, "conn-2");
        router.dispatch(&c1, ClientEvent::join("alice")).unwrap();
        router.dispatch(&c1, ClientEvent::typing(true)).unwrap();
        drain(&mut rx2);

        let departure = router.disconnect(&c1);
        assert!(departure.typing_cleared);
        let events = drain(&mut rx2);
        assert_eq!(events.len(), 2);
        match events[0].as_ref() {
            ServerEvent::UserTyping(notice) => {
                assert_eq!(notice.username, "alice");
                assert!(!notice.is_typing);
            }
            other => panic!("Expected user_typing, got {:?}", other),
        }
        assert_eq!(events[1].name(), "user_left");
    }

    #[test]
    fn test_unknown_connection() {
        let router = SessionRouter::new();
        let ghost = ConnectionId::new("ghost");

        assert_eq!(
            router.dispatch(&ghost, ClientEvent::join("alice")),
            Err(RouterError::Registry(RegistryError::UnknownConnection(
                ghost.clone()
            )))
        );
        assert_eq!(router.state(&ghost), SessionState::Closed);
    }

    #[test]
    fn test_duplicate_connect() {
        let router = SessionRouter::new();
        let (c1, _rx1) = connect(&router, "conn-1");
        let (tx, _rx) = mpsc::unbounded_channel();

        assert_eq!(
            router.connect(c1.clone(), tx),
            Err(RouterError::Registry(RegistryError::DuplicateConnection(c1)))
        );
    }

    #[test]
    fn test_alice_and_bob() {
        let router = SessionRouter::new();
        let (c1, mut rx1) = connect(&router, "conn-1");
        let (c2, mut rx2) = connect(&router, "conn-2");

        router.dispatch(&c1, ClientEvent::join("Alice")).unwrap();
        router.dispatch(&c2, ClientEvent::join("Bob")).unwrap();
        router.dispatch(&c1, ClientEvent::send_message("hello")).unwrap();

        let to_alice: Vec<Arc<ServerEvent>> = drain(&mut rx1);
        let to_bob: Vec<Arc<ServerEvent>> = drain(&mut rx2);

        let names: Vec<&str> = to_alice.iter().map(|e| e.name()).collect();
        assert_eq!(names, ["user_joined", "receive_message"]);
        let names: Vec<&str> = to_bob.iter().map(|e| e.name()).collect();
        assert_eq!(names, ["user_joined", "receive_message"]);

        match to_bob[0].as_ref() {
            ServerEvent::UserJoined(notice) => assert_eq!(notice.username, "Alice"),
            other => panic!("Expected user_joined, got {:?}", other),
        }
        for event in [&to_alice[1], &to_bob[1]] {
            match event.as_ref() {
                ServerEvent::ReceiveMessage(msg) => {
                    assert_eq!(msg.username, "Alice");
                    assert_eq!(msg.message, "hello");
                }
                other => panic!("Expected receive_message, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_stats() {
        let router = SessionRouter::new();
        let (c1, _rx1) = connect(&router, "conn-1");
        let (_c2, _rx2) = connect(&router, "conn-2");
        router.dispatch(&c1, ClientEvent::join("alice")).unwrap();

        assert_eq!(
            router.stats(),
            RouterStats {
                connections: 2,
                named: 1
            }
        );
        assert_eq!(router.connections(), vec![c1, ConnectionId::new("conn-2")]);
    }
}
