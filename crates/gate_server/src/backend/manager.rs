//! Backend connection multiplexer.
//!
//! One [`BackendChannel`] per node address, created lazily on first use and
//! shared by every session routed to that node. A channel that closes is
//! removed from the pool, and the next forward to that address reconnects.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use gate_protocol::{GatewayPacket, InternalPacket};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::GatewayConfig;
use crate::error::BackendError;
use crate::session::{Session, SessionId, SessionRegistry};
use super::channel::{BackendChannel, ChannelOptions};
use super::dispatch::{Dispatch, ResponseDispatcher, ResponseInterceptor};
use super::pending::{PendingKey, PendingRequests};

type ChannelSlot = Arc<OnceCell<Arc<BackendChannel>>>;
type ChannelTable = Arc<DashMap<String, ChannelSlot>>;

/// Forwards client frames to game nodes and routes the replies back.
pub struct BackendManager {
    channels: ChannelTable,
    dispatcher: ResponseDispatcher,
    options: ChannelOptions,
    next_channel_id: AtomicU64,
    shutdown: CancellationToken,
}

impl BackendManager {
    /// Creates a multiplexer that delivers replies to sessions in `sessions`.
    ///
    /// # Arguments
    ///
    /// * `config` - Gateway configuration (connect timeout, heartbeat, frame limit)
    /// * `sessions` - Registry used to find the session a reply belongs to
    /// * `interceptor` - Optional hook run on each correlated reply
    pub fn new(
        config: &GatewayConfig,
        sessions: Arc<SessionRegistry>,
        interceptor: Option<Arc<dyn ResponseInterceptor>>,
    ) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            dispatcher: ResponseDispatcher::new(
                Arc::new(PendingRequests::new()),
                sessions,
                interceptor,
            ),
            options: ChannelOptions {
                connect_timeout: config.backend.connect_timeout,
                write_queue: config.backend.write_queue,
                max_frame_length: config.max_frame_length,
                heartbeat: config.heartbeat,
            },
            next_channel_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        }
    }

    /// Forwards `packet` from `session` to the node at `node_addr`.
    ///
    /// The pending entry is recorded before the write so a fast reply always
    /// finds it. A failed write removes the entry again. Nothing is retried.
    ///
    /// # Returns
    ///
    /// `Ok(())` once the frame is flushed to the node; the reply arrives
    /// later through the session's outbound queue.
    pub async fn forward(
        &self,
        node_addr: &str,
        session: &Session,
        packet: &GatewayPacket,
    ) -> Result<(), BackendError> {
        let channel = self.channel(node_addr).await?;

        let key = PendingKey::new(session.id(), i32::from(packet.seq));
        self.dispatcher.pending().insert(key);

        if let Err(e) = channel.send(InternalPacket::wrap(session.id(), packet)).await {
            self.dispatcher.pending().take(&key);
            return Err(e);
        }

        session.touch();
        debug!(
            node = node_addr,
            session_id = session.id(),
            msg_id = packet.msg_id,
            seq = packet.seq,
            "Forwarded to backend"
        );
        Ok(())
    }

    /// Routes a reply read from `node_addr` to its session.
    pub fn handle_response(&self, node_addr: &str, packet: InternalPacket) -> Dispatch {
        self.dispatcher.dispatch(node_addr, packet)
    }

    /// Drops every pending entry of a disconnected session.
    pub fn cleanup_session(&self, session_id: SessionId) -> usize {
        let removed = self.dispatcher.pending().cleanup_session(session_id);
        if removed > 0 {
            debug!(session_id, removed, "Cleaned up pending requests");
        }
        removed
    }

    /// Closes the connection to `node_addr` and waits for it to finish.
    ///
    /// # Returns
    ///
    /// `true` if a connection existed.
    pub async fn close_channel(&self, node_addr: &str) -> bool {
        let Some((_, slot)) = self.channels.remove(node_addr) else {
            return false;
        };
        match slot.get() {
            Some(channel) => {
                channel.close_and_wait().await;
                info!(node = node_addr, "Closed backend channel");
                true
            }
            None => false,
        }
    }

    /// Closes every backend connection and waits for all of them.
    ///
    /// Forwards issued after this fail with [`BackendError::Unavailable`].
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let addrs: Vec<String> = self
            .channels
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        let count = addrs.len();
        for addr in addrs {
            self.close_channel(&addr).await;
        }
        info!("🔌 Backend manager shut down ({} channel(s) closed)", count);
    }

    pub fn pending(&self) -> &PendingRequests {
        self.dispatcher.pending()
    }

    /// Number of open backend connections.
    pub fn channel_count(&self) -> usize {
        self.channels
            .iter()
            .filter(|entry| entry.value().get().is_some_and(|c| c.is_open()))
            .count()
    }

    pub fn is_connected(&self, node_addr: &str) -> bool {
        self.channels
            .get(node_addr)
            .and_then(|slot| slot.get().map(|c| c.is_open()))
            .unwrap_or(false)
    }

    /// Existing open channel for `node_addr`, or a new connection.
    async fn channel(&self, node_addr: &str) -> Result<Arc<BackendChannel>, BackendError> {
        // a dead channel found in the pool is replaced once
        for _ in 0..2 {
            if self.shutdown.is_cancelled() {
                return Err(BackendError::Unavailable(node_addr.to_string()));
            }

            let slot = self
                .channels
                .entry(node_addr.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone();

            let result = slot
                .get_or_try_init(|| self.connect(node_addr))
                .await
                .cloned();

            match result {
                Ok(channel) if channel.is_open() => return Ok(channel),
                Ok(_) => {
                    self.channels
                        .remove_if(node_addr, |_, current| Arc::ptr_eq(current, &slot));
                }
                Err(e) => {
                    self.channels
                        .remove_if(node_addr, |_, current| Arc::ptr_eq(current, &slot));
                    debug!(node = node_addr, "Backend connect failed: {}", e);
                    return Err(e);
                }
            }
        }
        Err(BackendError::Closed(node_addr.to_string()))
    }

    async fn connect(&self, node_addr: &str) -> Result<Arc<BackendChannel>, BackendError> {
        let id = self.next_channel_id.fetch_add(1, Ordering::Relaxed);
        let channels = self.channels.clone();
        let addr = node_addr.to_string();
        let on_close = move || {
            channels.remove_if(&addr, |_, slot| slot.get().is_some_and(|c| c.id() == id));
        };

        let channel = BackendChannel::connect(
            node_addr,
            id,
            self.options,
            self.dispatcher.clone(),
            on_close,
        )
        .await?;
        Ok(Arc::new(channel))
    }
}

impl std::fmt::Debug for BackendManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendManager")
            .field("channels", &self.channels.len())
            .field("pending", &self.dispatcher.pending().len())
            .finish()
    }
}
