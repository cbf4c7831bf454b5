//! Peer id exchange performed right after a socket is accepted or connected.
//!
//! The exchange is unauthenticated and unframed: each side writes its id as
//! raw UTF-8 and reads the other side's id with a single bounded read. There
//! is no version negotiation and no collision detection on the ids.
//!
//! Ordering differs by direction:
//! - **Outbound** (dialer): send own id, then receive peer id
//! - **Inbound** (acceptor): receive peer id, then send own id
//!
//! With no `timeout` configured a peer that connects and never sends its id
//! stalls the handshaking side indefinitely.

use crate::error::{constants, ProtocolError, Result};
use crate::utils::timeout::{with_optional_timeout, DEFAULT_HANDSHAKE_READ_CAP};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument};

/// Limits applied to one id exchange
#[derive(Debug, Clone, Copy)]
pub struct HandshakeParams {
    /// Size of the single read that receives the peer id
    pub max_len: usize,
    /// Deadline for the whole exchange; `None` waits forever
    pub timeout: Option<Duration>,
}

impl Default for HandshakeParams {
    fn default() -> Self {
        Self {
            max_len: DEFAULT_HANDSHAKE_READ_CAP,
            timeout: None,
        }
    }
}

/// Dialer side: send `own_id`, then receive the peer's id.
#[instrument(skip(stream, params), level = "debug")]
pub async fn outbound_handshake<S>(
    stream: &mut S,
    own_id: &str,
    params: HandshakeParams,
) -> Result<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let exchange = async {
        send_id(stream, own_id).await?;
        read_id(stream, params.max_len).await
    };
    finish(with_optional_timeout(exchange, params.timeout).await)
}

/// Acceptor side: receive the peer's id, then send `own_id`.
#[instrument(skip(stream, params), level = "debug")]
pub async fn inbound_handshake<S>(
    stream: &mut S,
    own_id: &str,
    params: HandshakeParams,
) -> Result<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let exchange = async {
        let peer_id = read_id(stream, params.max_len).await?;
        send_id(stream, own_id).await?;
        Ok::<_, ProtocolError>(peer_id)
    };
    finish(with_optional_timeout(exchange, params.timeout).await)
}

fn finish(result: Result<String>) -> Result<String> {
    match result {
        Ok(peer_id) => {
            debug!(peer_id = %peer_id, "Handshake complete");
            Ok(peer_id)
        }
        Err(ProtocolError::Timeout) => Err(ProtocolError::HandshakeError(
            constants::ERR_HANDSHAKE_TIMEOUT.into(),
        )),
        Err(e) => Err(e),
    }
}

async fn send_id<S>(stream: &mut S, id: &str) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(id.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_id<S>(stream: &mut S, max_len: usize) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; max_len.max(1)];
    let n = stream.read(&mut buf).await?;
    if n == 0 {
        return Err(ProtocolError::HandshakeError(
            constants::ERR_HANDSHAKE_EMPTY.into(),
        ));
    }
    buf.truncate(n);
    String::from_utf8(buf)
        .map_err(|_| ProtocolError::HandshakeError(constants::ERR_HANDSHAKE_UTF8.into()))
}
