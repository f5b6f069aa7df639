use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use ground_core::{SessionId, SubscriberId};
use tracing::debug;

use crate::subscriber::Subscriber;

/// Live subscribers grouped by session.
///
/// A session key is present only while it has at least one subscriber.
/// Readers never iterate the live sets: [`SubscriberRegistry::snapshot`]
/// hands out a copy taken under the shard lock.
#[derive(Default)]
pub struct SubscriberRegistry {
    sessions: DashMap<SessionId, HashMap<SubscriberId, Arc<Subscriber>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber to its session. Registering the same subscriber
    /// again is a no-op and returns `false`.
    pub fn register(&self, subscriber: Arc<Subscriber>) -> bool {
        let session_id = subscriber.session_id().clone();
        let subscriber_id = subscriber.id().clone();
        let mut set = self.sessions.entry(session_id.clone()).or_default();
        if set.contains_key(&subscriber_id) {
            return false;
        }
        subscriber.mark_registered();
        let _ = set.insert(subscriber_id.clone(), subscriber);
        debug!(session_id = %session_id, subscriber_id = %subscriber_id, subscribers = set.len(), "subscriber registered");
        true
    }

    /// Remove a subscriber. Safe to call any number of times; returns the
    /// removed entry only on the call that actually removed it.
    pub fn unregister(
        &self,
        session_id: &SessionId,
        subscriber_id: &SubscriberId,
    ) -> Option<Arc<Subscriber>> {
        let removed = match self.sessions.get_mut(session_id) {
            Some(mut set) => set.remove(subscriber_id),
            None => None,
        };
        // The shard guard above is released before pruning; remove_if
        // re-checks emptiness under the lock so a concurrent register wins.
        let _ = self.sessions.remove_if(session_id, |_, set| set.is_empty());
        if removed.is_some() {
            debug!(session_id = %session_id, subscriber_id = %subscriber_id, "subscriber unregistered");
        }
        removed
    }

    /// Point-in-time copy of a session's subscribers.
    pub fn snapshot(&self, session_id: &SessionId) -> Vec<Arc<Subscriber>> {
        self.sessions
            .get(session_id)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, session_id: &SessionId, subscriber_id: &SubscriberId) -> bool {
        self.sessions
            .get(session_id)
            .is_some_and(|set| set.contains_key(subscriber_id))
    }

    /// Number of sessions with at least one subscriber.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Total subscribers across all sessions.
    pub fn subscriber_count(&self) -> usize {
        self.sessions.iter().map(|entry| entry.value().len()).sum()
    }
}
