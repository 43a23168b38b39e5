//! In-memory presence registry

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use crate::types::ParticipantId;

/// Opaque handle to one live connection, supplied by the transport layer
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionHandle(pub String);

impl ConnectionHandle {
    pub fn new() -> Self {
        Self(format!("conn-{}", uuid::Uuid::new_v4()))
    }
}

impl Default for ConnectionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConnectionHandle {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identity -> zero or one live connection.
///
/// Per-identity sharded locking only; callers never need a session lock.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    connections: DashMap<ParticipantId, ConnectionHandle>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` for `participant`, returning the superseded handle.
    /// The superseded connection is not closed here.
    pub fn register(
        &self,
        participant: &ParticipantId,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        let previous = self.connections.insert(participant.clone(), handle.clone());
        match &previous {
            Some(old) => info!("{} reconnected on {} (superseding {})", participant, handle, old),
            None => info!("{} online on {}", participant, handle),
        }
        previous
    }

    /// Remove whatever handle is registered. No-op if absent.
    pub fn unregister(&self, participant: &ParticipantId) -> Option<ConnectionHandle> {
        let removed = self.connections.remove(participant).map(|(_, handle)| handle);
        if removed.is_some() {
            info!("{} offline", participant);
        }
        removed
    }

    /// Remove the mapping only if `handle` is still the current one, so a
    /// late close of a superseded connection does not evict its replacement.
    pub fn unregister_if_current(
        &self,
        participant: &ParticipantId,
        handle: &ConnectionHandle,
    ) -> bool {
        let removed = self
            .connections
            .remove_if(participant, |_, current| current == handle)
            .is_some();
        if removed {
            info!("{} offline ({} closed)", participant, handle);
        } else {
            debug!("Ignoring close of stale connection {} for {}", handle, participant);
        }
        removed
    }

    pub fn lookup(&self, participant: &ParticipantId) -> Option<ConnectionHandle> {
        self.connections.get(participant).map(|entry| entry.value().clone())
    }

    pub fn is_online(&self, participant: &ParticipantId) -> bool {
        self.connections.contains_key(participant)
    }

    pub fn online_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_register_and_lookup() {
        let registry = PresenceRegistry::new();
        let alice = ParticipantId::from("alice");
        assert!(!registry.is_online(&alice));

        let handle = ConnectionHandle::from("conn-1");
        assert_eq!(registry.register(&alice, handle.clone()), None);
        assert!(registry.is_online(&alice));
        assert_eq!(registry.lookup(&alice), Some(handle));
    }

    #[test]
    fn test_later_connection_supersedes() {
        let registry = PresenceRegistry::new();
        let alice = ParticipantId::from("alice");
        let first = ConnectionHandle::from("conn-1");
        let second = ConnectionHandle::from("conn-2");

        registry.register(&alice, first.clone());
        assert_eq!(registry.register(&alice, second.clone()), Some(first.clone()));

        // Closing the superseded connection must not take alice offline
        assert!(!registry.unregister_if_current(&alice, &first));
        assert_eq!(registry.lookup(&alice), Some(second.clone()));

        assert!(registry.unregister_if_current(&alice, &second));
        assert!(!registry.is_online(&alice));
    }

    #[test]
    fn test_unregister_absent_is_noop() {
        let registry = PresenceRegistry::new();
        assert_eq!(registry.unregister(&"ghost".into()), None);
        assert_eq!(registry.online_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_registrations_are_independent() {
        let registry = Arc::new(PresenceRegistry::new());
        let mut tasks = Vec::new();
        for i in 0..64 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let who = ParticipantId::from(format!("user-{}", i));
                registry.register(&who, ConnectionHandle::new());
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(registry.online_count(), 64);
    }
}
