//! Session bookkeeping owned by one connection manager.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::core::session::CallSession;

/// Channel id → live session. At most one session per channel.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<CallSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session unless one already exists for its channel.
    /// Returns false, leaving the existing entry untouched, on a duplicate.
    pub fn insert_if_absent(&self, session: Arc<CallSession>) -> bool {
        match self.sessions.entry(session.id().to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(session);
                true
            }
        }
    }

    pub fn get(&self, channel_id: &str) -> Option<Arc<CallSession>> {
        self.sessions.get(channel_id).map(|s| s.value().clone())
    }

    pub fn contains(&self, channel_id: &str) -> bool {
        self.sessions.contains_key(channel_id)
    }

    pub fn remove(&self, channel_id: &str) -> Option<Arc<CallSession>> {
        self.sessions.remove(channel_id).map(|(_, s)| s)
    }

    /// Remove the entry only if it is still `session`.
    pub fn remove_if_same(&self, session: &Arc<CallSession>) -> bool {
        self.sessions
            .remove_if(session.id(), |_, current| Arc::ptr_eq(current, session))
            .is_some()
    }

    /// Take every session out of the registry.
    pub fn drain(&self) -> Vec<Arc<CallSession>> {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Secondary leg channel id → primary channel id.
///
/// A routing back-reference only; the primary session owns the leg.
#[derive(Default)]
pub struct WeakLegMap {
    legs: DashMap<String, String>,
}

impl WeakLegMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link(&self, leg_id: &str, primary_id: &str) {
        self.legs.insert(leg_id.to_string(), primary_id.to_string());
    }

    pub fn primary_of(&self, leg_id: &str) -> Option<String> {
        self.legs.get(leg_id).map(|p| p.value().clone())
    }

    pub fn remove_leg(&self, leg_id: &str) -> Option<String> {
        self.legs.remove(leg_id).map(|(_, primary)| primary)
    }

    /// Drop every back-reference to `primary_id`.
    pub fn remove_for_primary(&self, primary_id: &str) {
        self.legs.retain(|_, primary| primary.as_str() != primary_id);
    }

    pub fn clear(&self) {
        self.legs.clear();
    }

    pub fn len(&self) -> usize {
        self.legs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.legs.is_empty()
    }
}
