//! The peer node: listening socket, accept loop and connection registry.
//!
//! ## Concurrency
//! The `inbound`/`outbound` registry is shared by the accept task, every
//! caller of `connect_to`/`disconnect`/`send_to`/`broadcast`, and shutdown.
//! It is guarded by one async mutex. Critical sections only move
//! [`Connection`] handles in or out; socket I/O, handler callbacks and task
//! joins always happen after the guard is released.
//!
//! ## Shutdown order
//! `stop` sets the node's termination flag, calls `on_stop_request`, then the
//! accept task: signals every inbound connection, signals every outbound
//! connection, joins all inbound, joins all outbound, and closes the
//! listening socket. A failure while stopping one connection does not stop
//! the others from being stopped.
//!
//! ## Reaping
//! Connections whose termination flag is set are only removed by a cleanup
//! pass, which runs at the start of `send_to`/`broadcast` (or on demand via
//! `clean_connections`) and during shutdown. A dead inbound connection that
//! nobody sends through stays listed until then.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::NodeConfig;
use crate::core::codec::FrameCodec;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::handler::NodeHandler;
use crate::protocol::handshake::{inbound_handshake, outbound_handshake, HandshakeParams};
use crate::protocol::message::Message;
use crate::service::connection::{Connection, ConnectionContext, Direction};
use crate::utils::id::generate_node_id;
use crate::utils::metrics::{Metrics, MetricsSnapshot};

const LISTEN_BACKLOG: u32 = 1024;

/// Result of a successful `connect_to`
#[derive(Debug, Clone)]
pub enum ConnectOutcome {
    /// A new outbound connection was established
    Connected(Connection),
    /// An outbound connection to that host and port already existed; nothing was dialed
    AlreadyConnected(Connection),
}

impl ConnectOutcome {
    pub fn connection(&self) -> &Connection {
        match self {
            ConnectOutcome::Connected(conn) | ConnectOutcome::AlreadyConnected(conn) => conn,
        }
    }

    pub fn into_connection(self) -> Connection {
        match self {
            ConnectOutcome::Connected(conn) | ConnectOutcome::AlreadyConnected(conn) => conn,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, ConnectOutcome::Connected(_))
    }
}

#[derive(Default)]
struct Registry {
    inbound: Vec<Connection>,
    outbound: Vec<Connection>,
}

struct NodeInner {
    id: String,
    host: String,
    local_addr: SocketAddr,
    config: NodeConfig,
    handler: Arc<dyn NodeHandler>,
    terminate: CancellationToken,
    registry: Mutex<Registry>,
    listener: StdMutex<Option<TcpListener>>,
    accept_task: StdMutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    listening: AtomicBool,
    metrics: Arc<Metrics>,
}

/// A peer node. Cheap to clone; clones share the same listener and registry.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Bind `host:port` with default settings.
    ///
    /// The listening socket is bound immediately; call [`Node::start`] to
    /// begin accepting.
    pub async fn bind(
        host: impl Into<String>,
        port: u16,
        handler: Arc<dyn NodeHandler>,
    ) -> Result<Self> {
        Self::with_config(NodeConfig::new(host, port), handler).await
    }

    /// Bind using a full configuration.
    #[instrument(skip(config, handler), fields(addr = %config.node.bind_address()))]
    pub async fn with_config(config: NodeConfig, handler: Arc<dyn NodeHandler>) -> Result<Self> {
        config.validate_strict()?;

        let listener = bind_listener(&config).await?;
        let local_addr = listener.local_addr()?;
        let id = config.node.id.clone().unwrap_or_else(generate_node_id);

        info!(node_id = %id, addr = %local_addr, "Node started");

        Ok(Self {
            inner: Arc::new(NodeInner {
                id,
                host: config.node.host.clone(),
                local_addr,
                config,
                handler,
                terminate: CancellationToken::new(),
                registry: Mutex::new(Registry::default()),
                listener: StdMutex::new(Some(listener)),
                accept_task: StdMutex::new(None),
                started: AtomicBool::new(false),
                listening: AtomicBool::new(true),
                metrics: Arc::new(Metrics::new()),
            }),
        })
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Configured bind host
    pub fn host(&self) -> &str {
        &self.inner.host
    }

    /// Bound port (the OS-assigned one when configured with port 0)
    pub fn port(&self) -> u16 {
        self.inner.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Whether the termination flag is set
    pub fn is_stopping(&self) -> bool {
        self.inner.terminate.is_cancelled()
    }

    /// Whether the listening socket is still open
    pub fn is_listening(&self) -> bool {
        self.inner.listening.load(Ordering::Acquire)
    }

    /// Spawn the accept loop.
    ///
    /// Must be called from within a Tokio runtime. A second call returns
    /// [`ProtocolError::AlreadyStarted`]; calling it after `stop` returns
    /// [`ProtocolError::NodeStopped`].
    pub fn start(&self) -> Result<()> {
        if self.inner.terminate.is_cancelled() {
            return Err(ProtocolError::NodeStopped);
        }
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(ProtocolError::AlreadyStarted);
        }

        let listener = lock_std(&self.inner.listener)
            .take()
            .ok_or(ProtocolError::NodeStopped)?;

        let node = self.clone();
        let handle = tokio::spawn(async move { node.accept_loop(listener).await });
        *lock_std(&self.inner.accept_task) = Some(handle);

        debug!(node_id = %self.inner.id, "Accept loop started");
        Ok(())
    }

    /// Shut the node down and wait until every connection task has exited and
    /// the listening socket is closed. Later calls return immediately.
    #[instrument(skip(self), fields(node_id = %self.inner.id))]
    pub async fn stop(&self) {
        if self.inner.terminate.is_cancelled() {
            return;
        }
        self.inner.terminate.cancel();
        self.inner.handler.on_stop_request();

        let accept_task = lock_std(&self.inner.accept_task).take();
        match accept_task {
            Some(handle) => {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Accept task failed");
                }
            }
            None => {
                // Never started: nobody else owns the shutdown sequence.
                self.shutdown_connections().await;
                let listener = lock_std(&self.inner.listener).take();
                drop(listener);
                self.inner.listening.store(false, Ordering::Release);
                info!("Node stopped");
            }
        }
    }

    /// Dial `host:port`, exchange ids and register the outbound connection.
    ///
    /// Refuses to dial this node's own host and port. If an outbound
    /// connection to the same host and port already exists it is returned as
    /// [`ConnectOutcome::AlreadyConnected`] without dialing. On any failure
    /// nothing is registered.
    #[instrument(skip(self), fields(node_id = %self.inner.id))]
    pub async fn connect_to(&self, host: &str, port: u16) -> Result<ConnectOutcome> {
        if self.is_self(host, port) {
            warn!("{}", constants::ERR_SELF_CONNECT);
            return Err(ProtocolError::SelfConnection(format!("{host}:{port}")));
        }

        if let Some(existing) = self.find_outbound(host, port).await {
            debug!(peer_id = %existing.id(), "Already connected to node");
            return Ok(ConnectOutcome::AlreadyConnected(existing));
        }

        if self.inner.terminate.is_cancelled() {
            return Err(ProtocolError::NodeStopped);
        }

        self.inner.metrics.handshake_attempt();
        let dialed = async {
            let mut stream = TcpStream::connect((host, port)).await?;
            trace!(peer = %format!("{host}:{port}"), "Handshaking");
            let peer_id =
                outbound_handshake(&mut stream, &self.inner.id, self.handshake_params()).await?;
            Ok::<_, ProtocolError>((stream, peer_id))
        }
        .await;

        let (stream, peer_id) = match dialed {
            Ok(dialed) => dialed,
            Err(e) => {
                self.inner.metrics.handshake_failed();
                if e.is_socket_fault() {
                    self.inner.metrics.connection_error();
                }
                warn!(peer = %format!("{host}:{port}"), error = %e, "Could not connect");
                return Err(e);
            }
        };
        self.inner.metrics.handshake_success();

        let conn = Connection::spawn(
            stream,
            peer_id,
            host.to_string(),
            port,
            Direction::Outbound,
            self.connection_context(),
        );

        let rejected = {
            let mut registry = self.inner.registry.lock().await;
            if self.inner.terminate.is_cancelled() {
                Some(Err(ProtocolError::NodeStopped))
            } else if let Some(existing) = registry
                .outbound
                .iter()
                .find(|c| c.host() == host && c.port() == port)
                .cloned()
            {
                Some(Ok(ConnectOutcome::AlreadyConnected(existing)))
            } else {
                registry.outbound.push(conn.clone());
                None
            }
        };

        if let Some(result) = rejected {
            // Lost a race against shutdown or a concurrent dial to the same peer.
            conn.stop();
            conn.join().await;
            return result;
        }

        self.inner.metrics.connection_established();
        self.inner.handler.on_outbound_connect(&conn);
        Ok(ConnectOutcome::Connected(conn))
    }

    /// Close an outbound connection and remove it from the registry.
    ///
    /// Returns [`ProtocolError::NotOutbound`] for inbound or unknown handles.
    #[instrument(skip(self, conn), fields(node_id = %self.inner.id, peer_id = %conn.id()))]
    pub async fn disconnect(&self, conn: &Connection) -> Result<()> {
        // Untrack first so a concurrent cleanup pass can't report this
        // connection as dropped by the peer.
        let removed = {
            let mut registry = self.inner.registry.lock().await;
            match registry.outbound.iter().position(|c| c == conn) {
                Some(index) => registry.outbound.remove(index),
                None => {
                    warn!("{}", constants::ERR_NOT_OUTBOUND);
                    return Err(ProtocolError::NotOutbound);
                }
            }
        };

        self.inner.handler.on_disconnect_request(&removed);
        removed.stop();
        removed.join().await;
        self.inner.metrics.connection_closed();

        debug!("Disconnected from node");
        Ok(())
    }

    /// Send `message` to every tracked connection not in `exclude`.
    ///
    /// Runs a cleanup pass first. Returns how many sends succeeded; failures
    /// are logged and never returned.
    #[instrument(skip(self, message, exclude), fields(node_id = %self.inner.id))]
    pub async fn broadcast(&self, message: impl Into<Message>, exclude: &[Connection]) -> usize {
        self.clean_connections().await;

        let message = message.into();
        let targets: Vec<Connection> = {
            let registry = self.inner.registry.lock().await;
            registry
                .inbound
                .iter()
                .chain(registry.outbound.iter())
                .filter(|c| !exclude.contains(c))
                .cloned()
                .collect()
        };

        let mut delivered = 0;
        for conn in &targets {
            match conn.send(message.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => debug!(peer_id = %conn.id(), error = %e, "Broadcast send failed"),
            }
        }

        debug!(
            kind = message.kind(),
            delivered,
            targets = targets.len(),
            "Sent message to all connected nodes"
        );
        delivered
    }

    /// Send `message` to one tracked connection.
    ///
    /// Runs a cleanup pass first; returns [`ProtocolError::UnknownConnection`]
    /// if `conn` is not (or no longer) tracked.
    #[instrument(skip(self, conn, message), fields(node_id = %self.inner.id, peer_id = %conn.id()))]
    pub async fn send_to(&self, conn: &Connection, message: impl Into<Message>) -> Result<()> {
        self.clean_connections().await;

        if !self.is_tracked(conn).await {
            warn!("{}", constants::ERR_NOT_FOUND);
            return Err(ProtocolError::UnknownConnection);
        }

        conn.send(message).await?;
        debug!("Sent message");
        Ok(())
    }

    /// Remove every terminated connection, invoking the matching disconnect
    /// callback and joining its task.
    pub async fn clean_connections(&self) {
        let (dead_inbound, dead_outbound) = {
            let mut registry = self.inner.registry.lock().await;
            (
                drain_terminated(&mut registry.inbound),
                drain_terminated(&mut registry.outbound),
            )
        };

        for conn in dead_inbound {
            self.inner.handler.on_inbound_disconnect(&conn);
            conn.join().await;
            self.inner.metrics.connection_closed();
        }

        for conn in dead_outbound {
            self.inner.handler.on_outbound_disconnect(&conn);
            conn.join().await;
            self.inner.metrics.connection_closed();
        }
    }

    /// Snapshot of the inbound connections
    pub async fn inbound(&self) -> Vec<Connection> {
        self.inner.registry.lock().await.inbound.clone()
    }

    /// Snapshot of the outbound connections
    pub async fn outbound(&self) -> Vec<Connection> {
        self.inner.registry.lock().await.outbound.clone()
    }

    /// Number of tracked connections (inbound + outbound)
    pub async fn connection_count(&self) -> usize {
        let registry = self.inner.registry.lock().await;
        registry.inbound.len() + registry.outbound.len()
    }

    /// Log every tracked connection and the node's counters
    pub async fn log_connections(&self) {
        let (inbound, outbound) = {
            let registry = self.inner.registry.lock().await;
            (registry.inbound.clone(), registry.outbound.clone())
        };

        info!(node = %self, inbound = inbound.len(), outbound = outbound.len(), "Connections");
        for conn in &inbound {
            info!(direction = "inbound", peer_id = %conn.id(), state = ?conn.state(), "{conn}");
        }
        for conn in &outbound {
            info!(direction = "outbound", peer_id = %conn.id(), state = ?conn.state(), "{conn}");
        }
        self.inner.metrics.log_metrics(&self.inner.id);
    }

    async fn accept_loop(self, listener: TcpListener) {
        let terminate = self.inner.terminate.clone();
        let poll_interval = self.inner.config.node.poll_interval;

        while !terminate.is_cancelled() {
            tokio::select! {
                _ = terminate.cancelled() => break,
                accepted = timeout(poll_interval, listener.accept()) => match accepted {
                    Err(_) => trace!("Accept poll interval elapsed"),
                    Ok(Ok((stream, addr))) => self.admit_inbound(stream, addr).await,
                    Ok(Err(e)) => warn!(error = %e, "Error accepting connection"),
                }
            }
        }

        debug!(node_id = %self.inner.id, "Node stopping...");
        self.shutdown_connections().await;

        drop(listener);
        self.inner.listening.store(false, Ordering::Release);
        info!(node_id = %self.inner.id, "Node stopped");
    }

    async fn admit_inbound(&self, mut stream: TcpStream, addr: SocketAddr) {
        self.inner.metrics.handshake_attempt();
        trace!(peer = %addr, "Handshaking");

        let handshake = tokio::select! {
            _ = self.inner.terminate.cancelled() => return,
            result = inbound_handshake(&mut stream, &self.inner.id, self.handshake_params()) => result,
        };

        let peer_id = match handshake {
            Ok(peer_id) => peer_id,
            Err(e) => {
                self.inner.metrics.handshake_failed();
                warn!(peer = %addr, error = %e, "Inbound handshake failed, dropping connection");
                return;
            }
        };
        self.inner.metrics.handshake_success();

        let conn = Connection::spawn(
            stream,
            peer_id,
            addr.ip().to_string(),
            addr.port(),
            Direction::Inbound,
            self.connection_context(),
        );

        self.inner.registry.lock().await.inbound.push(conn.clone());
        self.inner.metrics.connection_established();
        self.inner.handler.on_inbound_connect(&conn);
    }

    async fn shutdown_connections(&self) {
        let (inbound, outbound) = {
            let mut registry = self.inner.registry.lock().await;
            (
                std::mem::take(&mut registry.inbound),
                std::mem::take(&mut registry.outbound),
            )
        };

        for conn in inbound.iter().chain(&outbound) {
            conn.stop();
            debug!(peer_id = %conn.id(), direction = ?conn.direction(), "Signalled connection to stop");
        }
        for conn in inbound.iter().chain(&outbound) {
            conn.join().await;
            self.inner.metrics.connection_closed();
            debug!(peer_id = %conn.id(), direction = ?conn.direction(), "Joined connection");
        }
    }

    async fn find_outbound(&self, host: &str, port: u16) -> Option<Connection> {
        self.inner
            .registry
            .lock()
            .await
            .outbound
            .iter()
            .find(|c| c.host() == host && c.port() == port)
            .cloned()
    }

    async fn is_tracked(&self, conn: &Connection) -> bool {
        let registry = self.inner.registry.lock().await;
        registry.inbound.contains(conn) || registry.outbound.contains(conn)
    }

    fn is_self(&self, host: &str, port: u16) -> bool {
        if port != self.port() {
            return false;
        }
        if host == self.inner.host {
            return true;
        }
        match host.parse::<IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, port) == self.inner.local_addr,
            Err(_) => false,
        }
    }

    fn handshake_params(&self) -> HandshakeParams {
        HandshakeParams {
            max_len: self.inner.config.node.max_handshake_len,
            timeout: self.inner.config.node.handshake_timeout,
        }
    }

    fn connection_context(&self) -> ConnectionContext {
        let transport = &self.inner.config.transport;
        ConnectionContext {
            node_addr: format!("{}:{}", self.inner.host, self.port()),
            handler: self.inner.handler.clone(),
            metrics: self.inner.metrics.clone(),
            codec: FrameCodec::with_mode(transport.wire_mode)
                .with_max_frame_size(transport.max_frame_size),
            poll_interval: self.inner.config.node.poll_interval,
            write_timeout: self.inner.config.node.write_timeout,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Node {} | {} {}>", self.inner.id, self.inner.host, self.port())
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.inner.id)
            .field("local_addr", &self.inner.local_addr)
            .field("stopping", &self.is_stopping())
            .finish()
    }
}

async fn bind_listener(config: &NodeConfig) -> Result<TcpListener> {
    let bind_address = config.node.bind_address();
    let addr = lookup_host(bind_address.as_str()).await?.next().ok_or_else(|| {
        ProtocolError::ConfigError(format!("Bind address did not resolve: {bind_address}"))
    })?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    Ok(socket.listen(LISTEN_BACKLOG)?)
}

fn drain_terminated(connections: &mut Vec<Connection>) -> Vec<Connection> {
    let (dead, live): (Vec<_>, Vec<_>) = std::mem::take(connections)
        .into_iter()
        .partition(|c| c.is_terminated());
    *connections = live;
    dead
}

fn lock_std<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
