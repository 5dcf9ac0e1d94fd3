//! A single client session.
//!
//! The owning connection task is the only writer of routing state
//! (`node_id`, login state). Backend response delivery reads the session
//! from other tasks, so every field is behind an atomic, a `OnceLock` or a
//! short-lived mutex.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::Instant;

use gate_protocol::{current_millis, GatewayPacket};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::RateLimitConfig;
use super::rate_limit::TokenBucket;

/// Process-local session identifier, assigned at connect.
pub type SessionId = i32;

/// Lifecycle of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionState {
    Connected = 0,
    Authenticating = 1,
    Authenticated = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Connected,
            1 => SessionState::Authenticating,
            2 => SessionState::Authenticated,
            _ => SessionState::Closed,
        }
    }
}

/// Connected client as seen by the gateway.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    peer_addr: Option<SocketAddr>,
    player_id: Mutex<Option<i64>>,
    /// Sticky node binding, set by the first successful route decision.
    node_id: OnceLock<String>,
    state: AtomicU8,
    created_at: Instant,
    last_active_ms: AtomicI64,
    limiter: Mutex<TokenBucket>,
    outbound: mpsc::Sender<GatewayPacket>,
    closed: CancellationToken,
}

impl Session {
    /// Creates a session in the `Connected` state.
    ///
    /// # Arguments
    ///
    /// * `id` - Identifier unique within this gateway process
    /// * `peer_addr` - Remote address of the client, if known
    /// * `outbound` - Queue drained by the connection task into the socket
    /// * `rate_limit` - Token bucket parameters for forwarded frames
    pub fn new(
        id: SessionId,
        peer_addr: Option<SocketAddr>,
        outbound: mpsc::Sender<GatewayPacket>,
        rate_limit: RateLimitConfig,
    ) -> Self {
        Self {
            id,
            peer_addr,
            player_id: Mutex::new(None),
            node_id: OnceLock::new(),
            state: AtomicU8::new(SessionState::Connected as u8),
            created_at: Instant::now(),
            last_active_ms: AtomicI64::new(current_millis()),
            limiter: Mutex::new(TokenBucket::new(rate_limit)),
            outbound,
            closed: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn player_id(&self) -> Option<i64> {
        *lock(&self.player_id)
    }

    pub fn node_id(&self) -> Option<&str> {
        self.node_id.get().map(String::as_str)
    }

    /// Binds the session to `node_id`. Returns `false` if it was already
    /// bound, in which case the existing binding is kept.
    pub fn bind_node(&self, node_id: impl Into<String>) -> bool {
        self.node_id.set(node_id.into()).is_ok()
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves to `state` unless the session is already closed.
    pub fn set_state(&self, state: SessionState) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != SessionState::Closed as u8).then_some(state as u8)
            });
    }

    /// Records a successful login: binds the player and marks the session
    /// authenticated. Has no effect on a closed session.
    pub fn authenticate(&self, player_id: i64) {
        if self.state() == SessionState::Closed {
            return;
        }
        *lock(&self.player_id) = Some(player_id);
        self.set_state(SessionState::Authenticated);
    }

    /// True iff a player is bound and the state is `Authenticated`.
    pub fn is_authenticated(&self) -> bool {
        self.player_id().is_some() && self.state() == SessionState::Authenticated
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Last activity as Unix milliseconds.
    pub fn last_active_at(&self) -> i64 {
        self.last_active_ms.load(Ordering::Relaxed)
    }

    pub fn touch(&self) {
        self.last_active_ms.store(current_millis(), Ordering::Relaxed);
    }

    /// Takes one token from the session's rate limiter.
    pub fn try_acquire(&self) -> bool {
        lock(&self.limiter).try_consume()
    }

    /// Whether the client connection is still open.
    pub fn is_active(&self) -> bool {
        self.state() != SessionState::Closed
            && !self.closed.is_cancelled()
            && !self.outbound.is_closed()
    }

    /// Queues `packet` for the client. Returns `false` if the session is
    /// inactive or its outbound queue is full.
    pub fn send(&self, packet: GatewayPacket) -> bool {
        if !self.is_active() {
            return false;
        }
        match self.outbound.try_send(packet) {
            Ok(()) => true,
            Err(TrySendError::Full(packet)) => {
                warn!(
                    session_id = self.id,
                    msg_id = packet.msg_id,
                    "Outbound queue full, dropping frame"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Marks the session closed and asks its connection task to hang up.
    pub fn close(&self) {
        self.state
            .store(SessionState::Closed as u8, Ordering::Release);
        self.closed.cancel();
    }

    /// Token cancelled when [`Session::close`] is called.
    pub fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

impl std::fmt::Display for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Session{{id={}, player={:?}, node={:?}, state={:?}}}",
            self.id,
            self.player_id(),
            self.node_id(),
            self.state()
        )
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
