//! Gateway composition root.
//!
//! [`GatewayServer`] wires the session registry, router, strategies and
//! backend multiplexer together explicitly, binds the client listener(s),
//! and runs the accept loops until shutdown.

use std::future::Future;
use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendManager, ResponseInterceptor};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::frontend::{handle_connection, ConnectionSettings, FrontendHandler};
use crate::routing::{NodeRouter, RouteStrategies, ServiceDirectory};
use crate::session::SessionRegistry;

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// The session gateway.
///
/// One instance owns all shared state; nothing is global. Build it with
/// [`GatewayServer::new`], optionally attach a [`ResponseInterceptor`],
/// then call [`GatewayServer::start`].
pub struct GatewayServer {
    config: GatewayConfig,
    sessions: Arc<SessionRegistry>,
    router: Arc<NodeRouter>,
    backend: Arc<BackendManager>,
    handler: Arc<FrontendHandler>,
    shutdown: CancellationToken,
    bound: watch::Sender<Vec<SocketAddr>>,
    connections: TaskTracker,
    listeners: Mutex<Vec<StdTcpListener>>,
}

impl GatewayServer {
    /// Creates a gateway with the specified configuration.
    ///
    /// # Arguments
    ///
    /// * `config` - Gateway configuration
    /// * `directory` - Service directory to discover game nodes, if any
    pub fn new(config: GatewayConfig, directory: Option<Arc<dyn ServiceDirectory>>) -> Self {
        Self::with_interceptor(config, directory, None)
    }

    /// Same as [`GatewayServer::new`] with a hook run on every backend reply.
    pub fn with_interceptor(
        config: GatewayConfig,
        directory: Option<Arc<dyn ServiceDirectory>>,
        interceptor: Option<Arc<dyn ResponseInterceptor>>,
    ) -> Self {
        let sessions = Arc::new(SessionRegistry::new(config.rate_limit, config.outbound_queue));
        let router = Arc::new(NodeRouter::from_config(
            &config.routing,
            directory,
            RouteStrategies::new(),
        ));
        let backend = Arc::new(BackendManager::new(&config, sessions.clone(), interceptor));
        let handler = Arc::new(FrontendHandler::new(
            sessions.clone(),
            router.clone(),
            backend.clone(),
            config.messages.clone(),
            config.login_msg_id(),
            config.routing.default_strategy,
        ));
        let (bound, _) = watch::channel(Vec::new());

        Self {
            config,
            sessions,
            router,
            backend,
            handler,
            shutdown: CancellationToken::new(),
            bound,
            connections: TaskTracker::new(),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
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

    /// Binds the client listener(s) without accepting yet.
    ///
    /// Called by [`GatewayServer::start`] when needed; calling it first lets
    /// the caller learn the bound address before the server runs.
    ///
    /// # Returns
    ///
    /// The bound addresses, one per acceptor.
    pub fn bind(&self) -> Result<Vec<SocketAddr>, GatewayError> {
        let mut listeners = self
            .listeners
            .lock()
            .map_err(|_| GatewayError::Internal("listener lock poisoned".to_string()))?;
        let bound = self.local_addrs();
        if !bound.is_empty() {
            return Ok(bound);
        }

        let core_count = num_cpus::get();
        let acceptors = self.config.acceptor_count();
        info!(
            "🧠 Detected {} CPU cores, using {} acceptor(s)",
            core_count, acceptors
        );

        // the first bind may use port 0; the rest reuse the port it got
        let mut addr = self.config.listen_addr;
        let mut addrs = Vec::with_capacity(acceptors);
        for i in 0..acceptors {
            let listener = self.bind_one(addr)?;
            let local = listener
                .local_addr()
                .map_err(|e| GatewayError::Network(format!("Local address unavailable: {e}")))?;
            addr = local;
            info!("✅ Listener {} bound on {}", i, local);
            addrs.push(local);
            listeners.push(listener);
        }

        self.bound.send_replace(addrs.clone());
        Ok(addrs)
    }

    /// Bound listener addresses, empty until [`GatewayServer::bind`] ran.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.bound.borrow().clone()
    }

    /// First bound address.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.bound.borrow().first().copied()
    }

    /// Waits until the listener(s) are bound and returns the first address.
    pub async fn wait_bound(&self) -> Option<SocketAddr> {
        let mut rx = self.bound.subscribe();
        let addrs = rx.wait_for(|addrs| !addrs.is_empty()).await.ok()?;
        addrs.first().copied()
    }

    /// Starts the gateway and serves clients until [`GatewayServer::shutdown`].
    ///
    /// # Startup Sequence
    ///
    /// 1. Bind the listener(s), with SO_REUSEPORT if configured
    /// 2. Run one accept loop per listener
    /// 3. Spawn a connection task per accepted client
    /// 4. On shutdown, close every session and backend connection and wait
    ///    for their tasks
    ///
    /// # Returns
    ///
    /// `Ok(())` if the gateway started and stopped cleanly, or a
    /// `GatewayError` if binding failed.
    pub async fn start(&self) -> Result<(), GatewayError> {
        info!("🚀 Starting gateway on {}", self.config.listen_addr);
        self.log_routing();

        self.bind()?;
        let std_listeners: Vec<StdTcpListener> = {
            let mut guard = self
                .listeners
                .lock()
                .map_err(|_| GatewayError::Internal("listener lock poisoned".to_string()))?;
            guard.drain(..).collect()
        };
        if std_listeners.is_empty() {
            return Err(GatewayError::Internal("gateway already started".to_string()));
        }

        let mut listeners = Vec::with_capacity(std_listeners.len());
        for std_listener in std_listeners {
            let listener = TcpListener::from_std(std_listener).map_err(|e| {
                GatewayError::Network(format!("Tokio listener creation failed: {e}"))
            })?;
            listeners.push(listener);
        }

        let settings = ConnectionSettings {
            max_frame_length: self.config.max_frame_length,
            heartbeat: self.config.heartbeat,
        };

        let mut accept_futures = listeners
            .into_iter()
            .map(|listener| {
                let handler = self.handler.clone();
                let shutdown = self.shutdown.clone();
                let connections = self.connections.clone();

                async move {
                    let serve = |stream: TcpStream, addr: SocketAddr| {
                        let handler = handler.clone();
                        let shutdown = shutdown.clone();

                        connections.spawn(async move {
                            match handle_connection(stream, addr, handler, settings, shutdown).await {
                                Ok(reason) => debug!(%addr, ?reason, "Connection finished"),
                                Err(e) => error!("Connection error from {}: {}", addr, e),
                            }
                        });
                    };
                    let listener = &listener;
                    accept_loop(move || listener.accept(), serve, shutdown.clone()).await;
                }
            })
            .collect::<FuturesUnordered<_>>();

        // accept loops only return once shutdown is requested
        while accept_futures.next().await.is_some() {}
        info!("Shutdown signal received");

        info!("🧹 Performing gateway cleanup...");
        self.shutdown.cancel();
        self.sessions.close_all();
        self.connections.close();
        self.connections.wait().await;
        self.backend.shutdown().await;
        info!("✅ Gateway stopped");
        Ok(())
    }

    /// Requests shutdown; [`GatewayServer::start`] returns once cleanup is done.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn bind_one(&self, addr: SocketAddr) -> Result<StdTcpListener, GatewayError> {
        let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| GatewayError::Network(format!("Socket creation failed: {e}")))?;
        socket.set_reuse_address(true).ok();

        if self.config.use_reuse_port {
            #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
            match socket.set_reuse_port(true) {
                Ok(()) => info!("SO_REUSEPORT enabled for load balancing across acceptors"),
                Err(e) => warn!("Failed to set SO_REUSEPORT: {}", e),
            }
            #[cfg(not(all(unix, not(any(target_os = "solaris", target_os = "illumos")))))]
            warn!("SO_REUSEPORT is not supported on this platform. Using SO_REUSEADDR only.");
        }

        socket
            .bind(&addr.into())
            .map_err(|e| GatewayError::Network(format!("Bind failed: {e}")))?;
        socket
            .listen(65535)
            .map_err(|e| GatewayError::Network(format!("Listen failed: {e}")))?;

        let listener: StdTcpListener = socket.into();
        listener
            .set_nonblocking(true)
            .map_err(|e| GatewayError::Network(format!("Set non-blocking failed: {e}")))?;
        Ok(listener)
    }

    fn log_routing(&self) {
        info!(
            "🧭 Routing: service '{}', default strategy {}, {} static node(s)",
            self.router.service_name(),
            self.config.routing.default_strategy,
            self.router.static_nodes().len()
        );
        for (node_id, address) in self.router.static_nodes() {
            debug!(node = %node_id, %address, "Static node");
        }
    }
}

/// Accepts connections until `shutdown` is cancelled.
///
/// Accept errors such as descriptor exhaustion or an aborted handshake are
/// logged and retried after [`ACCEPT_BACKOFF`]; they never end the loop.
async fn accept_loop<S, F, Fut>(
    mut accept: F,
    mut serve: impl FnMut(S, SocketAddr),
    shutdown: CancellationToken,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<(S, SocketAddr)>>,
{
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => return,
            accepted = accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => serve(stream, addr),
            Err(e) => {
                error!(
                    "Failed to accept connection, retrying in {}ms: {}",
                    ACCEPT_BACKOFF.as_millis(),
                    e
                );
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                }
            }
        }
    }
}

impl std::fmt::Debug for GatewayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayServer")
            .field("listen_addr", &self.config.listen_addr)
            .field("sessions", &self.sessions.len())
            .field("backend", &self.backend)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    /// Accept stub replaying `results`, then waiting forever.
    fn scripted(
        results: Vec<io::Result<(u32, SocketAddr)>>,
    ) -> impl FnMut() -> std::pin::Pin<Box<dyn Future<Output = io::Result<(u32, SocketAddr)>> + Send>>
    {
        let mut results = VecDeque::from(results);
        move || {
            let next = results.pop_front();
            Box::pin(async move {
                match next {
                    Some(result) => result,
                    None => std::future::pending().await,
                }
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn accept_errors_do_not_stop_the_loop() {
        let shutdown = CancellationToken::new();
        let accept = scripted(vec![
            Err(io::Error::from_raw_os_error(24)),
            Err(io::Error::new(io::ErrorKind::ConnectionAborted, "aborted")),
            Ok((7, peer())),
            Err(io::Error::other("too many open files")),
            Ok((8, peer())),
        ]);

        let started = tokio::time::Instant::now();
        let mut served = Vec::new();
        let canceller = shutdown.clone();
        tokio::join!(
            accept_loop(accept, |conn, _| served.push(conn), shutdown.clone()),
            async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                canceller.cancel();
            }
        );

        assert_eq!(served, vec![7, 8]);
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn accept_backoff_is_cut_short_by_shutdown() {
        let shutdown = CancellationToken::new();
        let accept = scripted(vec![Err(io::Error::from_raw_os_error(24))]);

        let started = tokio::time::Instant::now();
        let canceller = shutdown.clone();
        tokio::join!(
            accept_loop(accept, |_: u32, _| {}, shutdown.clone()),
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                canceller.cancel();
            }
        );

        assert!(started.elapsed() < ACCEPT_BACKOFF);
    }

    #[tokio::test]
    async fn wait_bound_reports_address_once_bound() {
        let config = GatewayConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            ..GatewayConfig::default()
        };
        let server = Arc::new(GatewayServer::new(config, None));
        assert!(server.local_addr().is_none());

        let waiter = {
            let server = server.clone();
            tokio::spawn(async move { server.wait_bound().await })
        };
        let bound = server.bind().unwrap();
        assert_eq!(bound.len(), 1);
        assert_ne!(bound[0].port(), 0);

        let waited = waiter.await.unwrap();
        assert_eq!(waited, Some(bound[0]));
        assert_eq!(server.local_addr(), Some(bound[0]));
        // binding again returns the same listener
        assert_eq!(server.bind().unwrap(), bound);
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let config = GatewayConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            ..GatewayConfig::default()
        };
        let server = Arc::new(GatewayServer::new(config, None));
        let running = {
            let server = server.clone();
            tokio::spawn(async move { server.start().await })
        };
        server.wait_bound().await.unwrap();

        // listeners are taken by the first start
        assert!(matches!(server.start().await, Err(GatewayError::Internal(_))));

        server.shutdown();
        running.await.unwrap().unwrap();
    }
}
