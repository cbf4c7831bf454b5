//! # Service Layer
//!
//! The running node and the connections it owns.
//!
//! ## Components
//! - **Node**: listening socket, accept loop, connection registry, fan-out
//! - **Connection**: one handshaken peer socket with its own read task

pub mod connection;
pub mod node;

pub use connection::{Connection, ConnectionState, Direction};
pub use node::{ConnectOutcome, Node};
