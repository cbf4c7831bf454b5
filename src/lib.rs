//! # peerlink
//!
//! Minimal peer-to-peer node substrate over TCP.
//!
//! A [`Node`] listens on a host and port, accepts inbound peers, dials
//! outbound peers, exchanges short ids with each of them, and then trades
//! framed messages in both directions. Every event is reported to a
//! [`NodeHandler`]; override only the hooks you need.
//!
//! ## Layers
//! - [`core`]: frame codec (delimited or length-prefixed)
//! - [`protocol`]: messages, id handshake, handler hooks
//! - [`service`]: node and connections
//! - [`utils`]: ids, logging, metrics, timeouts
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use peerlink::{LoggingHandler, Node};
//!
//! #[tokio::main]
//! async fn main() -> peerlink::Result<()> {
//!     let node = Node::bind("127.0.0.1", 9001, Arc::new(LoggingHandler)).await?;
//!     node.start()?;
//!
//!     let peer = node.connect_to("127.0.0.1", 9002).await?.into_connection();
//!     node.send_to(&peer, "hello").await?;
//!     node.broadcast(serde_json::json!({"type": "ping"}), &[]).await;
//!
//!     node.stop().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod utils;

pub use config::NodeConfig;
pub use core::codec::{FrameCodec, WireMode};
pub use error::{ProtocolError, Result};
pub use protocol::handler::{LoggingHandler, NodeHandler};
pub use protocol::message::Message;
pub use service::connection::{Connection, ConnectionState, Direction};
pub use service::node::{ConnectOutcome, Node};
