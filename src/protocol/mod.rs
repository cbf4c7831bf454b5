//! # Protocol Layer
//!
//! Everything a node exchanges with a peer above the byte stream.
//!
//! ## Components
//! - **Message**: the three payload kinds (text, JSON, raw bytes)
//! - **Handshake**: the id exchange that precedes framed traffic
//! - **Handler**: application callbacks invoked by the node

pub mod handler;
pub mod handshake;
pub mod message;
