//! Correlation table for forwarded requests.
//!
//! An entry lives from just before a request is written until one of: the
//! reply arrives, the write fails, or the owning session disconnects.
//! There is no timeout; a request the node never answers stays here until
//! its session goes away.

use std::fmt;

use dashmap::DashMap;

use crate::session::SessionId;

/// `session_id:seq` of a forwarded request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingKey {
    pub session_id: SessionId,
    pub seq: i32,
}

impl PendingKey {
    pub fn new(session_id: SessionId, seq: i32) -> Self {
        Self { session_id, seq }
    }
}

impl fmt::Display for PendingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.session_id, self.seq)
    }
}

#[derive(Debug, Default)]
pub struct PendingRequests {
    entries: DashMap<PendingKey, SessionId>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an outstanding request. A request reusing the key of an
    /// unanswered one replaces it.
    pub fn insert(&self, key: PendingKey) {
        self.entries.insert(key, key.session_id);
    }

    /// Removes and returns the waiting session for `key`.
    pub fn take(&self, key: &PendingKey) -> Option<SessionId> {
        self.entries.remove(key).map(|(_, session_id)| session_id)
    }

    /// Drops every entry belonging to `session_id`.
    ///
    /// # Returns
    ///
    /// The number of entries removed.
    pub fn cleanup_session(&self, session_id: SessionId) -> usize {
        let mut removed = 0;
        self.entries.retain(|key, _| {
            let keep = key.session_id != session_id;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    pub fn contains(&self, key: &PendingKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn count_for(&self, session_id: SessionId) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.key().session_id == session_id)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_pops_once() {
        let pending = PendingRequests::new();
        let key = PendingKey::new(3, 17);
        pending.insert(key);
        assert!(pending.contains(&key));
        assert_eq!(pending.take(&key), Some(3));
        assert_eq!(pending.take(&key), None);
        assert!(pending.is_empty());
    }

    #[test]
    fn cleanup_removes_only_that_session() {
        let pending = PendingRequests::new();
        for seq in 0..5 {
            pending.insert(PendingKey::new(1, seq));
            pending.insert(PendingKey::new(11, seq));
        }
        assert_eq!(pending.cleanup_session(1), 5);
        assert_eq!(pending.count_for(1), 0);
        assert_eq!(pending.count_for(11), 5);
        assert_eq!(pending.cleanup_session(1), 0);
    }

    #[test]
    fn key_display() {
        assert_eq!(PendingKey::new(12, -4).to_string(), "12:-4");
    }
}
