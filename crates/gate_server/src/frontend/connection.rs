//! Per-connection task for a game client.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use gate_protocol::{Packet, PacketCodec, ProtocolType};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::HeartbeatConfig;
use crate::error::GatewayError;
use crate::link::{IdleAction, Inbound, LinkMonitor};
use super::handler::FrontendHandler;

/// Settings applied to every client link.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub max_frame_length: usize,
    pub heartbeat: HeartbeatConfig,
}

/// Why a client connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    PeerClosed,
    IdleTimeout,
    SessionClosed,
    Shutdown,
}

/// Serves one client connection until it closes.
///
/// Creates the session, pumps frames between the socket and the
/// [`FrontendHandler`], drives the client-side heartbeat, and cleans up
/// pending requests and the registry entry on the way out.
///
/// # Arguments
///
/// * `stream` - Accepted client socket
/// * `addr` - Client's socket address
/// * `handler` - Shared frame handler
/// * `settings` - Framing and heartbeat settings
/// * `shutdown` - Cancelled when the gateway stops
///
/// # Returns
///
/// The close reason, or a `GatewayError` if the client broke the framing
/// or the socket failed.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    handler: Arc<FrontendHandler>,
    settings: ConnectionSettings,
    shutdown: CancellationToken,
) -> Result<CloseReason, GatewayError> {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
    }

    let (session, mut outbound) = handler.sessions().create(Some(addr));
    info!(session_id = session.id(), %addr, "🔌 Client connected");

    let mut framed = Framed::new(
        stream,
        PacketCodec::with_max_frame_length(ProtocolType::Gateway, settings.max_frame_length),
    );
    let mut monitor = LinkMonitor::new(ProtocolType::Gateway, &settings.heartbeat);
    let session_closed = session.close_token();

    let result = loop {
        tokio::select! {
            _ = shutdown.cancelled() => break Ok(CloseReason::Shutdown),
            _ = session_closed.cancelled() => break Ok(CloseReason::SessionClosed),
            frame = framed.next() => match frame {
                Some(Ok(packet)) => {
                    session.touch();
                    match monitor.on_inbound(packet) {
                        Inbound::Reply(reply) => {
                            if let Err(e) = framed.send(reply).await {
                                break Err(GatewayError::Network(e.to_string()));
                            }
                            monitor.on_outbound();
                            debug!(session_id = session.id(), "Heartbeat response sent");
                        }
                        Inbound::Absorbed { .. } => {}
                        Inbound::Deliver(Packet::Gateway(packet)) => {
                            handler.on_frame(&session, packet).await;
                        }
                        Inbound::Deliver(other) => {
                            warn!(session_id = session.id(), protocol = %other.protocol(), "Unexpected frame layout on client link");
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!(session_id = session.id(), "Client protocol error: {}", e);
                    break Err(GatewayError::Network(e.to_string()));
                }
                None => break Ok(CloseReason::PeerClosed),
            },
            queued = outbound.recv() => {
                let Some(packet) = queued else { break Ok(CloseReason::SessionClosed) };
                if let Err(e) = framed.send(packet).await {
                    break Err(GatewayError::Network(e.to_string()));
                }
                monitor.on_outbound();
            }
            event = monitor.next_idle() => match monitor.on_idle(event) {
                IdleAction::SendHeartbeat(heartbeat) => {
                    if let Err(e) = framed.send(heartbeat).await {
                        break Err(GatewayError::Network(e.to_string()));
                    }
                    monitor.on_outbound();
                }
                IdleAction::Missed(missed) => {
                    debug!(session_id = session.id(), missed, "Client reader idle");
                }
                IdleAction::Close(missed) => {
                    info!(session_id = session.id(), missed, "⏰ Client idle timeout, closing session");
                    break Ok(CloseReason::IdleTimeout);
                }
            },
        }
    };

    handler.on_disconnect(&session);
    result
}
