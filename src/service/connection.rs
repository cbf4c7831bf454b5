//! One established peer connection.
//!
//! A [`Connection`] is created only after a successful handshake. Its read
//! half is driven by a dedicated task that decodes frames and hands each
//! message to the node's [`NodeHandler`]; its write half sits behind a mutex
//! so every frame is written in one piece.
//!
//! Lifecycle: `Init -> Handshaking -> Active -> Terminating -> Closed`. The
//! socket is in `Init`/`Handshaking` only while the node dials or accepts it,
//! before any `Connection` exists, so [`Connection::state`] always reports
//! `Active` or later.
//!
//! Sends have no deadline unless `write_timeout` is configured, so a peer that
//! stops reading can block a send (and the close that follows it) indefinitely.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::core::codec::FrameCodec;
use crate::error::{ProtocolError, Result};
use crate::protocol::handler::NodeHandler;
use crate::protocol::message::Message;
use crate::utils::metrics::Metrics;
use crate::utils::timeout::with_optional_timeout;

/// Which side opened the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Accepted by our listening socket
    Inbound,
    /// Dialed by us via `connect_to`
    Outbound,
}

/// Connection lifecycle state.
///
/// `Init` and `Handshaking` describe a socket the node is still dialing or
/// accepting. A [`Connection`] is only built after the handshake, so
/// [`Connection::state`] never returns them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Init = 0,
    Handshaking = 1,
    Active = 2,
    Terminating = 3,
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnectionState::Init,
            1 => ConnectionState::Handshaking,
            2 => ConnectionState::Active,
            3 => ConnectionState::Terminating,
            _ => ConnectionState::Closed,
        }
    }
}

/// Everything a connection borrows from its node
#[derive(Clone)]
pub(crate) struct ConnectionContext {
    pub node_addr: String,
    pub handler: Arc<dyn NodeHandler>,
    pub metrics: Arc<Metrics>,
    pub codec: FrameCodec,
    pub poll_interval: Duration,
    pub write_timeout: Option<Duration>,
}

struct ConnectionInner {
    id: String,
    host: String,
    port: u16,
    direction: Direction,
    node_addr: String,
    terminate: CancellationToken,
    state: AtomicU8,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    codec: FrameCodec,
    write_timeout: Option<Duration>,
    metrics: Arc<Metrics>,
}

/// Handle to an established peer connection.
///
/// Cheap to clone; clones refer to the same connection and compare equal.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Take ownership of a handshaken socket and start its read task.
    pub(crate) fn spawn(
        stream: TcpStream,
        id: String,
        host: String,
        port: u16,
        direction: Direction,
        ctx: ConnectionContext,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();

        let conn = Connection {
            inner: Arc::new(ConnectionInner {
                id,
                host,
                port,
                direction,
                node_addr: ctx.node_addr,
                terminate: CancellationToken::new(),
                state: AtomicU8::new(ConnectionState::Active as u8),
                writer: tokio::sync::Mutex::new(Some(write_half)),
                worker: tokio::sync::Mutex::new(None),
                codec: ctx.codec.clone(),
                write_timeout: ctx.write_timeout,
                metrics: ctx.metrics,
            }),
        };

        debug!(
            peer_id = %conn.id(),
            peer = %conn.peer_addr(),
            direction = ?direction,
            "Connection started"
        );

        let reader = FramedRead::new(read_half, ctx.codec);
        let handle = tokio::spawn(read_loop(
            conn.clone(),
            reader,
            ctx.handler,
            ctx.poll_interval,
        ));

        // Nobody else holds this handle yet, so the lock is free.
        if let Ok(mut worker) = conn.inner.worker.try_lock() {
            *worker = Some(handle);
        }

        conn
    }

    /// Peer id received during the handshake
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Peer host: the dialed host for outbound, the remote IP for inbound
    pub fn host(&self) -> &str {
        &self.inner.host
    }

    /// Peer port: the dialed port for outbound, the remote port for inbound
    pub fn port(&self) -> u16 {
        self.inner.port
    }

    pub fn peer_addr(&self) -> String {
        format!("{}:{}", self.inner.host, self.inner.port)
    }

    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    pub fn state(&self) -> ConnectionState {
        let state = ConnectionState::from_u8(self.inner.state.load(Ordering::Acquire));
        if state == ConnectionState::Active && self.inner.terminate.is_cancelled() {
            ConnectionState::Terminating
        } else {
            state
        }
    }

    /// Whether the termination flag is set
    pub fn is_terminated(&self) -> bool {
        self.inner.terminate.is_cancelled()
    }

    /// Ask the read task to exit. Returns immediately.
    pub fn stop(&self) {
        self.inner.terminate.cancel();
    }

    /// Whether the read task has been joined and has exited
    pub fn is_joined(&self) -> bool {
        match self.inner.worker.try_lock() {
            Ok(worker) => worker.is_none(),
            // A join is in progress.
            Err(_) => false,
        }
    }

    /// Frame `message` and write it to the peer.
    ///
    /// Encoding faults are reported and leave the connection open. Socket
    /// faults (I/O error or `write_timeout` elapsed) set the termination flag.
    #[instrument(skip(self, message), fields(peer_id = %self.inner.id), level = "debug")]
    pub async fn send(&self, message: impl Into<Message>) -> Result<()> {
        let message = message.into();
        let kind = message.kind();

        let mut codec = self.inner.codec.clone();
        let frame = match codec.encode_frame(message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, kind, "Invalid payload, nothing sent");
                self.inner.metrics.protocol_error();
                return Err(e);
            }
        };

        if self.is_terminated() {
            return Err(ProtocolError::ConnectionClosed);
        }

        let mut guard = self.inner.writer.lock().await;
        let writer = guard.as_mut().ok_or(ProtocolError::ConnectionClosed)?;

        let written = with_optional_timeout(
            async { writer.write_all(&frame).await.map_err(ProtocolError::from) },
            self.inner.write_timeout,
        )
        .await;

        match written {
            Ok(()) => {
                self.inner.metrics.message_sent(codec.last_frame_len() as u64);
                trace!(bytes = frame.len(), kind, "Frame written");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Send failed, terminating connection");
                self.inner.metrics.connection_error();
                self.inner.terminate.cancel();
                Err(e)
            }
        }
    }

    /// Wait for the read task to finish.
    ///
    /// The handle is awaited once. Concurrent callers wait on the lock until
    /// that first join completes, so every caller returns only after the task
    /// has exited.
    pub(crate) async fn join(&self) {
        let mut worker = self.inner.worker.lock().await;
        if let Some(handle) = worker.take() {
            if let Err(e) = handle.await {
                warn!(peer_id = %self.id(), error = %e, "Connection task failed");
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.inner.state.store(state as u8, Ordering::Release);
    }

    async fn close_writer(&self) {
        let writer = self.inner.writer.lock().await.take();
        if let Some(mut writer) = writer {
            let shutdown = async { writer.shutdown().await.map_err(ProtocolError::from) };
            if let Err(e) = with_optional_timeout(shutdown, self.inner.write_timeout).await {
                trace!(peer_id = %self.id(), error = %e, "Socket shutdown failed");
            }
        }
    }
}

async fn read_loop(
    conn: Connection,
    mut reader: FramedRead<tokio::net::tcp::OwnedReadHalf, FrameCodec>,
    handler: Arc<dyn NodeHandler>,
    poll_interval: Duration,
) {
    let terminate = conn.inner.terminate.clone();
    let metrics = conn.inner.metrics.clone();

    while !terminate.is_cancelled() {
        tokio::select! {
            _ = terminate.cancelled() => break,
            next = timeout(poll_interval, reader.next()) => match next {
                Err(_) => trace!(peer_id = %conn.id(), "Read poll interval elapsed"),
                Ok(Some(Ok(message))) => {
                    metrics.message_received(reader.decoder().last_frame_len() as u64);
                    handler.on_message(&conn, message);
                }
                Ok(Some(Err(e))) => {
                    warn!(peer_id = %conn.id(), error = %e, "Read failed, terminating connection");
                    if e.is_socket_fault() {
                        metrics.connection_error();
                    } else {
                        metrics.protocol_error();
                    }
                    terminate.cancel();
                }
                Ok(None) => {
                    debug!(peer_id = %conn.id(), "Peer closed the connection");
                    terminate.cancel();
                }
            }
        }
    }

    conn.set_state(ConnectionState::Terminating);
    drop(reader);
    conn.close_writer().await;
    conn.set_state(ConnectionState::Closed);
    debug!(peer_id = %conn.id(), "Connection closed");
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Connection {}

impl Hash for Connection {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.inner) as usize).hash(state);
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Connection: {} <-> {}>",
            self.inner.node_addr,
            self.peer_addr()
        )
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("peer", &self.peer_addr())
            .field("direction", &self.inner.direction)
            .field("state", &self.state())
            .finish()
    }
}
