//! # Utility Modules
//!
//! Supporting utilities used throughout the node implementation.
//!
//! ## Components
//! - **Id**: short random node identifiers
//! - **Logging**: `tracing-subscriber` setup
//! - **Metrics**: per-node atomic counters
//! - **Timeout**: poll intervals and timeout wrappers

pub mod id;
pub mod logging;
pub mod metrics;
pub mod timeout;

pub use id::generate_node_id;
pub use metrics::{Metrics, MetricsSnapshot};
