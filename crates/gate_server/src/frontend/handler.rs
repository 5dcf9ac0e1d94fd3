//! Classification of client frames.
//!
//! Heartbeats stop here, the login frame picks a node, authenticated
//! business frames follow the session's bound node and everything else is
//! dropped with a log line.

use std::sync::Arc;

use gate_protocol::{
    current_millis, GatewayPacket, HeartbeatFactory, MessageIdTable, Packet, ProtocolType,
    HEARTBEAT_REQUEST_ID, HEARTBEAT_RESPONSE_ID,
};
use tracing::{debug, error, info, warn};

use crate::backend::BackendManager;
use crate::routing::{NodeRouter, StrategyKind};
use crate::session::{Session, SessionRegistry, SessionState};

/// What happened to one client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Accepted for transmission to `node`.
    Forwarded { node: String },
    /// Heartbeat request answered on the client link.
    HeartbeatAnswered,
    /// Heartbeat response from a client, ignored.
    HeartbeatIgnored,
    /// Business frame before login, dropped.
    Unauthenticated,
    /// The session's token bucket was empty, dropped.
    RateLimited,
    /// No node available for the session, dropped.
    NoNode,
    /// Connect or write to the node failed, dropped.
    ForwardFailed,
}

/// Shared entry point for every client connection.
pub struct FrontendHandler {
    sessions: Arc<SessionRegistry>,
    router: Arc<NodeRouter>,
    backend: Arc<BackendManager>,
    messages: MessageIdTable,
    login_msg_id: i32,
    login_strategy: StrategyKind,
}

impl FrontendHandler {
    /// # Arguments
    ///
    /// * `login_msg_id` - Msg id that starts the login flow
    /// * `login_strategy` - Strategy used to pick a node at login
    pub fn new(
        sessions: Arc<SessionRegistry>,
        router: Arc<NodeRouter>,
        backend: Arc<BackendManager>,
        messages: MessageIdTable,
        login_msg_id: i32,
        login_strategy: StrategyKind,
    ) -> Self {
        Self {
            sessions,
            router,
            backend,
            messages,
            login_msg_id,
            login_strategy,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn router(&self) -> &Arc<NodeRouter> {
        &self.router
    }

    pub fn backend(&self) -> &Arc<BackendManager> {
        &self.backend
    }

    /// Handles one frame received on `session`'s connection.
    pub async fn on_frame(&self, session: &Session, packet: GatewayPacket) -> FrameOutcome {
        session.touch();

        match packet.msg_id {
            HEARTBEAT_REQUEST_ID => {
                let request = Packet::Gateway(packet);
                let response = HeartbeatFactory::new(ProtocolType::Gateway)
                    .response_to(&request, current_millis());
                if let Packet::Gateway(response) = response {
                    session.send(response);
                }
                debug!(session_id = session.id(), "Heartbeat response sent");
                FrameOutcome::HeartbeatAnswered
            }
            HEARTBEAT_RESPONSE_ID => FrameOutcome::HeartbeatIgnored,
            id if id == self.login_msg_id => self.handle_login(session, packet).await,
            _ if !session.is_authenticated() => {
                warn!(
                    session_id = session.id(),
                    msg_id = packet.msg_id,
                    "Session not authenticated, dropping message"
                );
                FrameOutcome::Unauthenticated
            }
            _ => self.route_to_backend(session, packet).await,
        }
    }

    /// Runs once when a client connection ends.
    pub fn on_disconnect(&self, session: &Session) {
        session.close();
        let cleaned = self.backend.cleanup_session(session.id());
        self.sessions.remove(session.id());
        info!(
            session_id = session.id(),
            pending_cleaned = cleaned,
            "👋 Client disconnected"
        );
    }

    async fn handle_login(&self, session: &Session, packet: GatewayPacket) -> FrameOutcome {
        if !self.admit(session, &packet) {
            return FrameOutcome::RateLimited;
        }
        session.set_state(SessionState::Authenticating);

        let Some(node) = self.router.select_node(session, self.login_strategy).await else {
            error!(session_id = session.id(), "No available node for login");
            return FrameOutcome::NoNode;
        };

        match self.backend.forward(&node, session, &packet).await {
            Ok(()) => {
                info!(session_id = session.id(), node = %node, "🔐 Login forwarded");
                FrameOutcome::Forwarded { node }
            }
            Err(e) => {
                error!(session_id = session.id(), node = %node, "Forward login failed: {}", e);
                FrameOutcome::ForwardFailed
            }
        }
    }

    async fn route_to_backend(&self, session: &Session, packet: GatewayPacket) -> FrameOutcome {
        if !self.admit(session, &packet) {
            return FrameOutcome::RateLimited;
        }

        let Some(node_id) = session.node_id() else {
            error!(session_id = session.id(), "Authenticated session has no node");
            return FrameOutcome::NoNode;
        };
        let Some(node) = self.router.node_address(node_id).await else {
            error!(session_id = session.id(), node = node_id, "Node not found for session");
            return FrameOutcome::NoNode;
        };

        match self.backend.forward(&node, session, &packet).await {
            Ok(()) => FrameOutcome::Forwarded { node },
            Err(e) => {
                error!(
                    session_id = session.id(),
                    msg_id = packet.msg_id,
                    msg_name = self.messages.name_of(packet.msg_id).unwrap_or("-"),
                    "Forward failed: {}",
                    e
                );
                FrameOutcome::ForwardFailed
            }
        }
    }

    fn admit(&self, session: &Session, packet: &GatewayPacket) -> bool {
        if session.try_acquire() {
            return true;
        }
        warn!(
            session_id = session.id(),
            msg_id = packet.msg_id,
            "Rate limit exceeded, dropping message"
        );
        false
    }
}

impl std::fmt::Debug for FrontendHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrontendHandler")
            .field("login_msg_id", &self.login_msg_id)
            .field("login_strategy", &self.login_strategy)
            .finish()
    }
}
