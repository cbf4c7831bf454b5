//! Timeout helpers shared by the accept loop, the read loops and the send path.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Upper bound on how long a loop waits before re-checking its termination flag.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Largest id a handshake read accepts in one receive.
pub const DEFAULT_HANDSHAKE_READ_CAP: usize = 4096;

/// Await `fut`, mapping an elapsed deadline to [`ProtocolError::Timeout`].
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}

/// Like [`with_timeout_error`], but `None` waits forever.
pub async fn with_optional_timeout<F, T>(fut: F, duration: Option<Duration>) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match duration {
        Some(duration) => with_timeout_error(fut, duration).await,
        None => fut.await,
    }
}
