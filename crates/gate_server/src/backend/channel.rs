//! One multiplexed connection to a game node.
//!
//! The socket is owned by a single task. Forwarders hand it frames through
//! a queue and wait for a write acknowledgement; replies read from the
//! socket go through the [`ResponseDispatcher`]. Heartbeats on this link
//! use the internal layout and never leave the task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use gate_protocol::{InternalPacket, Packet, PacketCodec, ProtocolError, ProtocolType};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::HeartbeatConfig;
use crate::error::BackendError;
use crate::link::{IdleAction, Inbound, LinkMonitor};
use super::dispatch::ResponseDispatcher;

type WriteAck = oneshot::Sender<Result<(), BackendError>>;

/// Settings every backend link is built with.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChannelOptions {
    pub connect_timeout: Duration,
    pub write_queue: usize,
    pub max_frame_length: usize,
    pub heartbeat: HeartbeatConfig,
}

/// Handle to a live backend connection.
#[derive(Debug)]
pub struct BackendChannel {
    addr: String,
    id: u64,
    tx: mpsc::Sender<(InternalPacket, WriteAck)>,
    cancel: CancellationToken,
    open: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BackendChannel {
    /// Connects to `addr` within the configured timeout and starts the
    /// connection task.
    ///
    /// # Arguments
    ///
    /// * `id` - Identity of this connection within its pool
    /// * `on_close` - Run by the task once the connection is gone
    pub(crate) async fn connect(
        addr: &str,
        id: u64,
        options: ChannelOptions,
        dispatcher: ResponseDispatcher,
        on_close: impl FnOnce() + Send + 'static,
    ) -> Result<Self, BackendError> {
        validate_address(addr)?;

        let stream = match tokio::time::timeout(options.connect_timeout, TcpStream::connect(addr)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(BackendError::Connect {
                    addr: addr.to_string(),
                    source,
                })
            }
            Err(_) => {
                return Err(BackendError::ConnectTimeout {
                    addr: addr.to_string(),
                    timeout_ms: options.connect_timeout.as_millis() as u64,
                })
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(node = addr, "Failed to set TCP_NODELAY: {}", e);
        }

        info!(node = addr, "🔗 Backend channel active");

        let framed = Framed::new(
            stream,
            PacketCodec::with_max_frame_length(ProtocolType::GatewayInternal, options.max_frame_length),
        );
        let (tx, rx) = mpsc::channel(options.write_queue.max(1));
        let cancel = CancellationToken::new();
        let open = Arc::new(AtomicBool::new(true));

        let task = tokio::spawn(run_channel(
            addr.to_string(),
            framed,
            rx,
            LinkMonitor::new(ProtocolType::GatewayInternal, &options.heartbeat),
            dispatcher,
            cancel.clone(),
            open.clone(),
            on_close,
        ));

        Ok(Self {
            addr: addr.to_string(),
            id,
            tx,
            cancel,
            open,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.cancel.is_cancelled()
    }

    /// Writes `packet` and waits until it has been flushed to the socket.
    ///
    /// Success means the frame was accepted for transmission, not that the
    /// node has answered.
    pub async fn send(&self, packet: InternalPacket) -> Result<(), BackendError> {
        if !self.is_open() {
            return Err(BackendError::Closed(self.addr.clone()));
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send((packet, ack_tx))
            .await
            .map_err(|_| BackendError::Closed(self.addr.clone()))?;
        ack_rx
            .await
            .map_err(|_| BackendError::Closed(self.addr.clone()))?
    }

    /// Asks the connection task to stop.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Closes the connection and waits for its task to finish.
    pub async fn close_and_wait(&self) {
        self.close();
        let task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(node = %self.addr, "Backend channel task failed: {}", e);
            }
        }
    }
}

fn validate_address(addr: &str) -> Result<(), BackendError> {
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(()),
        _ => Err(BackendError::InvalidAddress(addr.to_string())),
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_channel(
    addr: String,
    mut framed: Framed<TcpStream, PacketCodec>,
    mut rx: mpsc::Receiver<(InternalPacket, WriteAck)>,
    mut monitor: LinkMonitor,
    dispatcher: ResponseDispatcher,
    cancel: CancellationToken,
    open: Arc<AtomicBool>,
    on_close: impl FnOnce(),
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(node = %addr, "Backend channel closing on request");
                break;
            }
            frame = framed.next() => match frame {
                Some(Ok(packet)) => match monitor.on_inbound(packet) {
                    Inbound::Reply(reply) => {
                        if let Err(e) = framed.send(reply).await {
                            warn!(node = %addr, "Failed to answer backend heartbeat: {}", e);
                            break;
                        }
                        monitor.on_outbound();
                    }
                    Inbound::Absorbed { latency_ms } => {
                        if let Some(latency) = latency_ms {
                            debug!(node = %addr, latency_ms = latency, "Heartbeat response from backend");
                        }
                    }
                    Inbound::Deliver(Packet::Internal(packet)) => {
                        dispatcher.dispatch(&addr, packet);
                    }
                    Inbound::Deliver(other) => {
                        warn!(node = %addr, protocol = %other.protocol(), "Unexpected frame layout on backend link");
                    }
                },
                Some(Err(e)) => {
                    warn!(node = %addr, "Backend protocol error: {}", e);
                    break;
                }
                None => break,
            },
            outgoing = rx.recv() => {
                let Some((packet, ack)) = outgoing else { break };
                let result = framed.send(packet).await;
                // an oversized frame is refused before any byte is written
                let broken = matches!(result, Err(ProtocolError::Io(_)));
                if result.is_ok() {
                    monitor.on_outbound();
                }
                let _ = ack.send(result.map_err(|e| BackendError::Write {
                    addr: addr.clone(),
                    reason: e.to_string(),
                }));
                if broken {
                    break;
                }
            }
            event = monitor.next_idle() => match monitor.on_idle(event) {
                IdleAction::SendHeartbeat(heartbeat) => {
                    match framed.send(heartbeat).await {
                        Ok(()) => {
                            monitor.on_outbound();
                            debug!(node = %addr, "Heartbeat sent to backend");
                        }
                        Err(e) => {
                            warn!(node = %addr, "Failed to send heartbeat to backend: {}", e);
                            break;
                        }
                    }
                }
                IdleAction::Missed(missed) => {
                    debug!(node = %addr, missed, "Backend reader idle");
                }
                IdleAction::Close(missed) => {
                    warn!(node = %addr, missed, "Backend missed heartbeats, closing connection");
                    break;
                }
            },
        }
    }

    open.store(false, Ordering::Release);
    rx.close();
    while let Ok((_, ack)) = rx.try_recv() {
        let _ = ack.send(Err(BackendError::Closed(addr.clone())));
    }
    on_close();
    info!(node = %addr, "Backend channel inactive");
}
