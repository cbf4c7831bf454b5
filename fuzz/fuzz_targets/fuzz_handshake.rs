#![no_main]

use libfuzzer_sys::fuzz_target;
use peerlink::protocol::handshake::{inbound_handshake, HandshakeParams};
use tokio::io::AsyncWriteExt;

fuzz_target!(|data: &[u8]| {
    let runtime = match tokio::runtime::Builder::new_current_thread().build() {
        Ok(runtime) => runtime,
        Err(_) => return,
    };

    runtime.block_on(async {
        let (mut peer, mut local) = tokio::io::duplex(data.len() + 64);
        if peer.write_all(data).await.is_err() || peer.shutdown().await.is_err() {
            return;
        }

        let params = HandshakeParams {
            max_len: 64,
            timeout: None,
        };
        if let Ok(peer_id) = inbound_handshake(&mut local, "FUZZY", params).await {
            assert!(!peer_id.is_empty());
            assert!(peer_id.len() <= 64);
        }
    });
});
