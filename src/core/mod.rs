//! # Core Protocol Components
//!
//! Low-level framing over a byte stream.
//!
//! ## Components
//! - **Codec**: Tokio codec turning a TCP byte stream into messages and back
//!
//! ## Wire Format
//! ```text
//! Delimited:        [Body(N)] [0x04]
//! Length-prefixed:  [Length(4, BE)] [Body(N)]
//! ```
//!
//! ## Limits
//! - Maximum frame body: 16MB by default (prevents unbounded buffer growth)
//! - Delimited bodies may not be empty or contain `0x04`

pub mod codec;
