//! Table of connected sessions.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use gate_protocol::GatewayPacket;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::RateLimitConfig;
use super::client::{Session, SessionId};

/// Owns every live [`Session`], keyed by session id.
///
/// One registry is built per gateway by [`crate::GatewayServer`] and shared
/// by reference; there is no process-wide instance.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
    next_id: AtomicI32,
    rate_limit: RateLimitConfig,
    outbound_queue: usize,
}

impl SessionRegistry {
    pub fn new(rate_limit: RateLimitConfig, outbound_queue: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicI32::new(1),
            rate_limit,
            outbound_queue: outbound_queue.max(1),
        }
    }

    /// Creates and registers a session for a new client connection.
    ///
    /// # Returns
    ///
    /// The session and the receiving half of its outbound queue, which the
    /// connection task drains into the socket.
    pub fn create(
        &self,
        peer_addr: Option<SocketAddr>,
    ) -> (Arc<Session>, mpsc::Receiver<GatewayPacket>) {
        let (tx, rx) = mpsc::channel(self.outbound_queue);
        let id = self.allocate_id();
        let session = Arc::new(Session::new(id, peer_addr, tx, self.rate_limit));
        self.sessions.insert(id, session.clone());
        debug!(session_id = id, "Session registered");
        (session, rx)
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.remove(&id).map(|(_, session)| session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Closes every session; their connection tasks deregister them.
    pub fn close_all(&self) {
        for entry in self.sessions.iter() {
            entry.value().close();
        }
    }

    /// Positive ids only, skipping any still in use after wrap-around.
    fn allocate_id(&self) -> SessionId {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id <= 0 {
                let _ = self.next_id.compare_exchange(
                    id.wrapping_add(1),
                    1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                );
                continue;
            }
            if !self.sessions.contains_key(&id) {
                return id;
            }
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(RateLimitConfig::default(), 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use std::collections::HashSet;

    #[test]
    fn create_get_remove() {
        let registry = SessionRegistry::default();
        let (session, _rx) = registry.create(None);
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(registry.len(), 1);

        let found = registry.get(session.id()).expect("registered");
        assert!(Arc::ptr_eq(&found, &session));

        assert!(registry.remove(session.id()).is_some());
        assert!(registry.get(session.id()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn ids_are_unique_and_positive() {
        let registry = SessionRegistry::default();
        let mut seen = HashSet::new();
        let mut receivers = Vec::new();
        for _ in 0..100 {
            let (session, rx) = registry.create(None);
            assert!(session.id() > 0);
            assert!(seen.insert(session.id()));
            receivers.push(rx);
        }
    }

    #[test]
    fn wrap_around_skips_non_positive_ids() {
        let registry = SessionRegistry::default();
        registry.next_id.store(i32::MAX, Ordering::Relaxed);
        let (first, _a) = registry.create(None);
        let (second, _b) = registry.create(None);
        assert_eq!(first.id(), i32::MAX);
        assert!(second.id() > 0);
    }

    #[test]
    fn close_all_closes_sessions() {
        let registry = SessionRegistry::default();
        let (a, _ra) = registry.create(None);
        let (b, _rb) = registry.create(None);
        registry.close_all();
        assert_eq!(a.state(), SessionState::Closed);
        assert!(b.close_token().is_cancelled());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates() {
        let registry = Arc::new(SessionRegistry::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    (0..50)
                        .map(|_| registry.create(None).0.id())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(ids.insert(id));
            }
        }
        assert_eq!(registry.len(), 400);
    }
}
