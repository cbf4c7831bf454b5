//! # Error Types
//!
//! Error handling for the peer node.
//!
//! This module defines all error variants that can occur while running a node,
//! from low-level socket errors to payload encoding problems.
//!
//! ## Error Categories
//! - **Socket faults**: I/O failures and timeouts on a single connection; fatal to that connection only
//! - **Encoding faults**: unsupported payloads or serialization failures; the connection stays open
//! - **Handshake faults**: the id exchange failed; the attempt is dropped and never registered
//! - **Registry errors**: the caller referenced a connection the node does not track
//!
//! Decoding never produces an error: every frame resolves to text, JSON or raw bytes.
//!
//! ## Example Usage
//! ```rust
//! use peerlink::error::{ProtocolError, Result};
//! use tracing::{error, info};
//!
//! fn parse_port(raw: &str) -> Result<u16> {
//!     raw.parse::<u16>()
//!         .map_err(|e| ProtocolError::ConfigError(format!("invalid port: {e}")))
//! }
//!
//! fn main() {
//!     match parse_port("9001") {
//!         Ok(port) => info!(port, "Port parsed"),
//!         Err(e) => error!(error = %e, "Bad port"),
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Handshake errors
    pub const ERR_HANDSHAKE_EMPTY: &str = "Peer closed the connection before sending its id";
    pub const ERR_HANDSHAKE_UTF8: &str = "Peer id is not valid UTF-8";
    pub const ERR_HANDSHAKE_TIMEOUT: &str = "Peer did not send its id in time";

    /// Registry errors
    pub const ERR_NOT_FOUND: &str = "Node not found";
    pub const ERR_NOT_OUTBOUND: &str = "Cannot disconnect from a node not connected";
    pub const ERR_SELF_CONNECT: &str = "Cannot connect this node with itself";

    /// Encoding errors
    pub const ERR_UNSUPPORTED_PAYLOAD: &str = "Structured payloads must be JSON objects";
}

/// ProtocolError is the primary error type for all node operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection is not tracked by this node")]
    UnknownConnection,

    #[error("Connection is not an outbound connection of this node")]
    NotOutbound,

    #[error("Refusing to connect to self at {0}")]
    SelfConnection(String),

    #[error("Node already started")]
    AlreadyStarted,

    #[error("Node is stopped")]
    NodeStopped,

    #[error("Unsupported payload: {0}")]
    UnsupportedPayload(String),

    #[error("Payload contains the frame delimiter byte")]
    DelimiterInPayload,

    #[error("Empty payload cannot be framed with a delimiter")]
    EmptyPayload,

    #[error("Frame too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ProtocolError {
    /// Whether this error is fatal to the connection that produced it.
    ///
    /// Socket faults terminate the connection; encoding faults leave it open.
    pub fn is_socket_fault(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(_)
                | ProtocolError::Timeout
                | ProtocolError::ConnectionClosed
                | ProtocolError::OversizedPacket(_)
        )
    }

    /// Whether this error was raised while turning a payload into bytes.
    pub fn is_encoding_fault(&self) -> bool {
        matches!(
            self,
            ProtocolError::Json(_)
                | ProtocolError::UnsupportedPayload(_)
                | ProtocolError::DelimiterInPayload
                | ProtocolError::EmptyPayload
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_classification() {
        let io = ProtocolError::Io(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(io.is_socket_fault());
        assert!(!io.is_encoding_fault());

        assert!(ProtocolError::Timeout.is_socket_fault());
        assert!(ProtocolError::DelimiterInPayload.is_encoding_fault());
        assert!(!ProtocolError::DelimiterInPayload.is_socket_fault());
        assert!(!ProtocolError::UnknownConnection.is_socket_fault());
        assert!(!ProtocolError::UnknownConnection.is_encoding_fault());
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            ProtocolError::OversizedPacket(42).to_string(),
            "Frame too large: 42 bytes"
        );
        assert_eq!(
            ProtocolError::SelfConnection("127.0.0.1:9001".into()).to_string(),
            "Refusing to connect to self at 127.0.0.1:9001"
        );
    }
}
