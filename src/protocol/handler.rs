use crate::protocol::message::Message;
use crate::service::connection::Connection;
use tracing::info;

/// Application hooks invoked by a node.
///
/// Every method runs synchronously on the task that observed the event (the
/// accept task, a connection's read task, or the caller's task for
/// connect/disconnect/stop). Keep them short; anything slow should be handed
/// off to another task.
///
/// The default implementations only emit diagnostics.
pub trait NodeHandler: Send + Sync + 'static {
    /// A peer connected to us and completed the handshake
    fn on_inbound_connect(&self, conn: &Connection) {
        info!(peer_id = %conn.id(), peer = %conn.peer_addr(), "Inbound node connected");
    }

    /// We connected to a peer and completed the handshake
    fn on_outbound_connect(&self, conn: &Connection) {
        info!(peer_id = %conn.id(), peer = %conn.peer_addr(), "Outbound node connected");
    }

    /// A terminated inbound connection was removed by a cleanup pass
    fn on_inbound_disconnect(&self, conn: &Connection) {
        info!(peer_id = %conn.id(), "Inbound node disconnected");
    }

    /// A terminated outbound connection was removed by a cleanup pass
    fn on_outbound_disconnect(&self, conn: &Connection) {
        info!(peer_id = %conn.id(), "Outbound node disconnected");
    }

    /// A complete frame arrived from `conn`
    fn on_message(&self, conn: &Connection, message: Message) {
        info!(peer_id = %conn.id(), kind = message.kind(), %message, "Message received");
    }

    /// `disconnect` was called for `conn`, before it is stopped
    fn on_disconnect_request(&self, conn: &Connection) {
        info!(peer_id = %conn.id(), "Node wants to disconnect");
    }

    /// `stop` was called on the node
    fn on_stop_request(&self) {
        info!("Node wants to stop");
    }
}

/// Handler that keeps every default: diagnostics only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl NodeHandler for LoggingHandler {}
