//! Routing of backend replies to client sessions.

use std::sync::Arc;

use gate_protocol::InternalPacket;
use tracing::{debug, warn};

use crate::session::{Session, SessionRegistry};
use super::pending::{PendingKey, PendingRequests};

/// Hook run on every correlated backend reply before it reaches the client.
///
/// Business code uses it to complete logins (see
/// [`Session::authenticate`]) or to close sessions the node rejected. The
/// gateway itself never authenticates anyone.
pub trait ResponseInterceptor: Send + Sync {
    fn on_response(&self, session: &Session, packet: &InternalPacket);
}

impl<F> ResponseInterceptor for F
where
    F: Fn(&Session, &InternalPacket) + Send + Sync,
{
    fn on_response(&self, session: &Session, packet: &InternalPacket) {
        self(session, packet)
    }
}

/// Outcome of dispatching one reply, mostly useful to tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Delivered,
    /// No pending entry for the reply's `session_id:seq`.
    NoPending,
    /// The session disconnected, or its outbound queue refused the frame.
    SessionGone,
}

/// Shared by the multiplexer and every backend connection task.
#[derive(Clone)]
pub(crate) struct ResponseDispatcher {
    pending: Arc<PendingRequests>,
    sessions: Arc<SessionRegistry>,
    interceptor: Option<Arc<dyn ResponseInterceptor>>,
}

impl ResponseDispatcher {
    pub(crate) fn new(
        pending: Arc<PendingRequests>,
        sessions: Arc<SessionRegistry>,
        interceptor: Option<Arc<dyn ResponseInterceptor>>,
    ) -> Self {
        Self {
            pending,
            sessions,
            interceptor,
        }
    }

    pub(crate) fn pending(&self) -> &Arc<PendingRequests> {
        &self.pending
    }

    /// Pops the pending entry for `packet` and hands the unwrapped frame to
    /// its session. Misses are logged and dropped; they never affect the
    /// backend connection.
    pub(crate) fn dispatch(&self, node: &str, packet: InternalPacket) -> Dispatch {
        let key = PendingKey::new(packet.session_id, packet.seq);
        let Some(session_id) = self.pending.take(&key) else {
            warn!(node, key = %key, msg_id = packet.msg_id, "No pending request for backend response");
            return Dispatch::NoPending;
        };

        let Some(session) = self.sessions.get(session_id) else {
            warn!(node, session_id, msg_id = packet.msg_id, "Session gone, dropping backend response");
            return Dispatch::SessionGone;
        };

        if let Some(interceptor) = &self.interceptor {
            interceptor.on_response(&session, &packet);
        }

        if !session.is_active() {
            warn!(node, session_id, msg_id = packet.msg_id, "Session inactive, dropping backend response");
            return Dispatch::SessionGone;
        }

        let msg_id = packet.msg_id;
        if session.send(packet.unwrap_for_client()) {
            debug!(node, session_id, msg_id, "Delivered backend response");
            Dispatch::Delivered
        } else {
            Dispatch::SessionGone
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use bytes::Bytes;

    fn dispatcher(
        interceptor: Option<Arc<dyn ResponseInterceptor>>,
    ) -> (ResponseDispatcher, Arc<SessionRegistry>) {
        let sessions = Arc::new(SessionRegistry::default());
        let dispatcher =
            ResponseDispatcher::new(Arc::new(PendingRequests::new()), sessions.clone(), interceptor);
        (dispatcher, sessions)
    }

    #[test]
    fn delivers_unwrapped_frame() {
        let (dispatcher, sessions) = dispatcher(None);
        let (session, mut rx) = sessions.create(None);
        dispatcher.pending().insert(PendingKey::new(session.id(), -7));

        let reply = InternalPacket::new(session.id(), 11000, -7, Bytes::from_static(b"ok"));
        assert_eq!(dispatcher.dispatch("n1", reply), Dispatch::Delivered);

        let delivered = rx.try_recv().unwrap();
        assert_eq!(delivered.msg_id, 11000);
        assert_eq!(delivered.seq, -7);
        assert_eq!(delivered.magic, 0);
        assert_eq!(delivered.body, Bytes::from_static(b"ok"));
        assert!(dispatcher.pending().is_empty());
    }

    #[test]
    fn reply_without_pending_is_dropped() {
        let (dispatcher, sessions) = dispatcher(None);
        let (session, mut rx) = sessions.create(None);
        let reply = InternalPacket::new(session.id(), 10001, 1, Bytes::new());
        assert_eq!(dispatcher.dispatch("n1", reply), Dispatch::NoPending);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn reply_for_vanished_session_is_dropped() {
        let (dispatcher, sessions) = dispatcher(None);
        let (session, _rx) = sessions.create(None);
        dispatcher.pending().insert(PendingKey::new(session.id(), 1));
        sessions.remove(session.id());

        let reply = InternalPacket::new(session.id(), 10001, 1, Bytes::new());
        assert_eq!(dispatcher.dispatch("n1", reply), Dispatch::SessionGone);
        assert!(dispatcher.pending().is_empty());
    }

    #[test]
    fn interceptor_can_authenticate() {
        let interceptor: Arc<dyn ResponseInterceptor> =
            Arc::new(|session: &Session, packet: &InternalPacket| {
                if packet.msg_id == 11000 && packet.body.as_ref() == b"ok" {
                    session.authenticate(9001);
                }
            });
        let (dispatcher, sessions) = dispatcher(Some(interceptor));
        let (session, _rx) = sessions.create(None);
        session.set_state(SessionState::Authenticating);
        dispatcher.pending().insert(PendingKey::new(session.id(), 1));

        let reply = InternalPacket::new(session.id(), 11000, 1, Bytes::from_static(b"ok"));
        dispatcher.dispatch("n1", reply);
        assert!(session.is_authenticated());
        assert_eq!(session.player_id(), Some(9001));
    }

    #[test]
    fn interceptor_closing_session_suppresses_delivery() {
        let interceptor: Arc<dyn ResponseInterceptor> =
            Arc::new(|session: &Session, _packet: &InternalPacket| session.close());
        let (dispatcher, sessions) = dispatcher(Some(interceptor));
        let (session, mut rx) = sessions.create(None);
        dispatcher.pending().insert(PendingKey::new(session.id(), 2));

        let reply = InternalPacket::new(session.id(), 11000, 2, Bytes::new());
        assert_eq!(dispatcher.dispatch("n1", reply), Dispatch::SessionGone);
        assert!(rx.try_recv().is_err());
    }
}
