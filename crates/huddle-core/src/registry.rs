//! Connection registry for Huddle.
//!
//! The registry is the single source of truth for who is present: it maps
//! each live connection to its bound display name and to the queue its
//! outbound events are pushed into.

use crate::connection::{ConnectionId, SessionState};
use huddle_protocol::ServerEvent;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Outbound event queue of a single connection.
pub type Outbox = mpsc::UnboundedSender<Arc<ServerEvent>>;

/// Registry errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The connection is not registered.
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// A connection with this ID is already registered.
    #[error("Duplicate connection: {0}")]
    DuplicateConnection(ConnectionId),
}

#[derive(Debug)]
struct Entry {
    name: Option<String>,
    outbox: Outbox,
    seq: u64,
}

/// Live connections and their display names.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: HashMap<ConnectionId, Entry>,
    /// Registration order (sequence number -> connection).
    order: BTreeMap<u64, ConnectionId>,
    next_seq: u64,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection with no bound name.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateConnection` if the ID is already registered.
    pub fn register(&mut self, id: ConnectionId, outbox: Outbox) -> Result<(), RegistryError> {
        if self.entries.contains_key(&id) {
            return Err(RegistryError::DuplicateConnection(id));
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, id.clone());
        debug!(connection = %id, "Registered connection");
        self.entries.insert(
            id,
            Entry {
                name: None,
                outbox,
                seq,
            },
        );
        Ok(())
    }

    /// Bind a display name to a connection.
    ///
    /// Rebinding is allowed; the last write wins. Returns the previously
    /// bound name, if any.
    ///
    /// # Errors
    ///
    /// Returns `UnknownConnection` if the connection is not registered.
    pub fn bind_name(
        &mut self,
        id: &ConnectionId,
        name: impl Into<String>,
    ) -> Result<Option<String>, RegistryError> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownConnection(id.clone()))?;
        Ok(entry.name.replace(name.into()))
    }

    /// Get the display name bound to a connection.
    #[must_use]
    pub fn lookup_name(&self, id: &ConnectionId) -> Option<&str> {
        self.entries.get(id).and_then(|e| e.name.as_deref())
    }

    /// Remove a connection.
    ///
    /// Returns the bound name, or `None` if the connection never joined
    /// (or was not registered at all).
    pub fn remove(&mut self, id: &ConnectionId) -> Option<String> {
        let entry = self.entries.remove(id)?;
        self.order.remove(&entry.seq);
        debug!(connection = %id, named = entry.name.is_some(), "Removed connection");
        entry.name
    }

    /// Snapshot of registered connections in registration order.
    #[must_use]
    pub fn all(&self) -> Vec<ConnectionId> {
        self.order.values().cloned().collect()
    }

    /// Registered connections and their outboxes, in registration order.
    pub fn outboxes(&self) -> impl Iterator<Item = (&ConnectionId, &Outbox)> + '_ {
        self.order
            .values()
            .filter_map(|id| self.entries.get(id).map(|e| (id, &e.outbox)))
    }

    /// Check if a connection is registered.
    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.entries.contains_key(id)
    }

    /// Lifecycle state of a connection.
    #[must_use]
    pub fn state(&self, id: &ConnectionId) -> SessionState {
        match self.entries.get(id) {
            Some(Entry { name: Some(_), .. }) => SessionState::Named,
            Some(_) => SessionState::Open,
            None => SessionState::Closed,
        }
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no connections are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of connections with a bound name.
    #[must_use]
    pub fn named_count(&self) -> usize {
        self.entries.values().filter(|e| e.name.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbox() -> Outbox {
        mpsc::unbounded_channel().0
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ConnectionRegistry::new();
        let id = ConnectionId::new("conn-1");

        registry.register(id.clone(), outbox()).unwrap();
        assert!(registry.contains(&id));
        assert_eq!(registry.lookup_name(&id), None);
        assert_eq!(registry.state(&id), SessionState::Open);

        assert_eq!(registry.bind_name(&id, "alice").unwrap(), None);
        assert_eq!(registry.lookup_name(&id), Some("alice"));
        assert_eq!(registry.state(&id), SessionState::Named);
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = ConnectionRegistry::new();
        registry.register("conn-1".into(), outbox()).unwrap();

        assert_eq!(
            registry.register("conn-1".into(), outbox()),
            Err(RegistryError::DuplicateConnection("conn-1".into()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_bind_unknown_connection() {
        let mut registry = ConnectionRegistry::new();
        assert_eq!(
            registry.bind_name(&"ghost".into(), "alice"),
            Err(RegistryError::UnknownConnection("ghost".into()))
        );
    }

    #[test]
    fn test_rebind_last_write_wins() {
        let mut registry = ConnectionRegistry::new();
        let id = ConnectionId::new("conn-1");
        registry.register(id.clone(), outbox()).unwrap();

        registry.bind_name(&id, "alice").unwrap();
        assert_eq!(
            registry.bind_name(&id, "alicia").unwrap(),
            Some("alice".to_string())
        );
        assert_eq!(registry.lookup_name(&id), Some("alicia"));
    }

    #[test]
    fn test_remove_returns_name() {
        let mut registry = ConnectionRegistry::new();
        registry.register("named".into(), outbox()).unwrap();
        registry.register("anonymous".into(), outbox()).unwrap();
        registry.bind_name(&"named".into(), "bob").unwrap();

        assert_eq!(registry.remove(&"named".into()), Some("bob".to_string()));
        assert_eq!(registry.remove(&"anonymous".into()), None);
        assert_eq!(registry.remove(&"named".into()), None);
        assert!(registry.is_empty());
        assert_eq!(registry.state(&"named".into()), SessionState::Closed);
    }

    #[test]
    fn test_all_in_registration_order() {
        let mut registry = ConnectionRegistry::new();
        for id in ["c", "a", "b"] {
            registry.register(id.into(), outbox()).unwrap();
        }
        registry.remove(&"a".into());
        registry.register("a".into(), outbox()).unwrap();

        let ids: Vec<String> = registry.all().iter().map(|id| id.to_string()).collect();
        assert_eq!(ids, ["c", "b", "a"]);

        let outbox_ids: Vec<&str> = registry.outboxes().map(|(id, _)| id.as_str()).collect();
        assert_eq!(outbox_ids, ["c", "b", "a"]);
    }

    #[test]
    fn test_named_count() {
        let mut registry = ConnectionRegistry::new();
        registry.register("conn-1".into(), outbox()).unwrap();
        registry.register("conn-2".into(), outbox()).unwrap();
        registry.bind_name(&"conn-2".into(), "carol").unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.named_count(), 1);
    }
}
