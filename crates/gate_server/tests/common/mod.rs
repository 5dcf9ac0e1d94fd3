//! Shared helpers for gateway integration tests: mock game nodes, a raw
//! client speaking the client layout, and server bootstrapping.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use gate_protocol::{
    current_millis, GatewayPacket, HeartbeatFactory, InternalPacket, Packet, PacketCodec,
    ProtocolType,
};
use gate_server::{
    GatewayConfig, GatewayServer, InMemoryDirectory, ResponseInterceptor, ServiceDirectory,
    ServiceInstance, Session,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::Framed;

pub const LOGIN: i32 = 11000;
pub const WAIT: Duration = Duration::from_secs(5);

/// How a mock node answers business frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeMode {
    /// Reply with the same session/msg/seq and `ack:` + body.
    Echo,
    /// Never reply.
    Silent,
}

/// A game node listening on loopback that records what it receives.
pub struct MockNode {
    pub id: String,
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<InternalPacket>>>,
    connections: Arc<Mutex<usize>>,
    task: JoinHandle<()>,
}

impl MockNode {
    pub async fn start(id: &str, mode: NodeMode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(Mutex::new(0usize));

        let task = {
            let received = received.clone();
            let connections = connections.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        break;
                    };
                    *connections.lock().unwrap() += 1;
                    let received = received.clone();
                    tokio::spawn(serve_node_connection(stream, mode, received));
                }
            })
        };

        Self {
            id: id.to_string(),
            addr,
            received,
            connections,
            task,
        }
    }

    pub fn instance(&self) -> ServiceInstance {
        ServiceInstance::new(self.id.clone(), "127.0.0.1", self.addr.port())
    }

    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    /// Business frames received so far (heartbeats excluded).
    pub fn received(&self) -> Vec<InternalPacket> {
        self.received.lock().unwrap().clone()
    }

    pub fn connection_count(&self) -> usize {
        *self.connections.lock().unwrap()
    }

    /// Polls until at least `count` frames arrived or `WAIT` elapses.
    pub async fn wait_for(&self, count: usize) -> Vec<InternalPacket> {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let frames = self.received();
            if frames.len() >= count || tokio::time::Instant::now() >= deadline {
                return frames;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for MockNode {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_node_connection(
    stream: TcpStream,
    mode: NodeMode,
    received: Arc<Mutex<Vec<InternalPacket>>>,
) {
    let mut framed = Framed::new(stream, PacketCodec::new(ProtocolType::GatewayInternal));
    let heartbeat = HeartbeatFactory::new(ProtocolType::GatewayInternal);

    while let Some(Ok(packet)) = framed.next().await {
        if HeartbeatFactory::is_request(&packet) {
            let reply = heartbeat.response_to(&packet, current_millis());
            if framed.send(reply).await.is_err() {
                break;
            }
            continue;
        }
        if HeartbeatFactory::is_response(&packet) {
            continue;
        }
        let Packet::Internal(packet) = packet else {
            continue;
        };
        received.lock().unwrap().push(packet.clone());

        if mode == NodeMode::Echo {
            let mut body = BytesMut::from(&b"ack:"[..]);
            body.extend_from_slice(&packet.body);
            let reply = InternalPacket::new(packet.session_id, packet.msg_id, packet.seq, body.freeze());
            if framed.send(reply).await.is_err() {
                break;
            }
        }
    }
}

/// A game client speaking the client frame layout.
pub struct TestClient {
    framed: Framed<TcpStream, PacketCodec>,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            framed: Framed::new(stream, PacketCodec::new(ProtocolType::Gateway)),
        }
    }

    pub async fn send(&mut self, msg_id: i32, seq: i16, body: &[u8]) {
        self.framed
            .send(GatewayPacket::new(msg_id, seq, Bytes::copy_from_slice(body)))
            .await
            .unwrap();
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        use tokio::io::AsyncWriteExt;
        self.framed.get_mut().write_all(bytes).await.unwrap();
    }

    /// Next frame from the gateway, including heartbeats.
    pub async fn recv_any(&mut self, wait: Duration) -> Option<GatewayPacket> {
        match timeout(wait, self.framed.next()).await {
            Ok(Some(Ok(Packet::Gateway(packet)))) => Some(packet),
            _ => None,
        }
    }

    /// Next business frame, skipping gateway heartbeats.
    pub async fn recv(&mut self, wait: Duration) -> Option<GatewayPacket> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            let packet = self.recv_any(left).await?;
            if packet.msg_id != gate_protocol::HEARTBEAT_REQUEST_ID {
                return Some(packet);
            }
        }
    }

    /// True once the gateway has closed the connection.
    pub async fn closed_within(&mut self, wait: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            match timeout(left, self.framed.next()).await {
                Ok(None) | Ok(Some(Err(_))) => return true,
                Ok(Some(Ok(_))) => continue,
                Err(_) => return false,
            }
        }
    }
}

/// Marks a session authenticated when its login reply comes back.
pub fn login_interceptor() -> Arc<dyn ResponseInterceptor> {
    Arc::new(|session: &Session, packet: &InternalPacket| {
        if packet.msg_id == LOGIN && packet.body.starts_with(b"ack:") {
            session.authenticate(1_000 + i64::from(session.id()));
        }
    })
}

pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        ..GatewayConfig::default()
    }
}

pub fn directory_with(nodes: &[&MockNode]) -> Arc<InMemoryDirectory> {
    let directory = Arc::new(InMemoryDirectory::new());
    for node in nodes {
        directory.register("game-node", node.instance());
    }
    directory
}

/// A running gateway and the task driving it.
pub struct RunningGateway {
    pub server: Arc<GatewayServer>,
    pub addr: SocketAddr,
    pub task: JoinHandle<Result<(), gate_server::GatewayError>>,
}

impl RunningGateway {
    pub async fn start(
        config: GatewayConfig,
        directory: Option<Arc<InMemoryDirectory>>,
        interceptor: Option<Arc<dyn ResponseInterceptor>>,
    ) -> Self {
        let directory = directory.map(|d| d as Arc<dyn ServiceDirectory>);
        let server = Arc::new(GatewayServer::with_interceptor(config, directory, interceptor));
        let addr = server.bind().unwrap()[0];
        let task = {
            let server = server.clone();
            tokio::spawn(async move { server.start().await })
        };
        Self { server, addr, task }
    }

    pub async fn stop(self) {
        self.server.shutdown();
        timeout(WAIT, self.task)
            .await
            .expect("gateway stops in time")
            .unwrap()
            .unwrap();
    }

    /// Polls until `predicate` holds or `WAIT` elapses.
    pub async fn eventually(&self, predicate: impl Fn(&GatewayServer) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            if predicate(&self.server) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
