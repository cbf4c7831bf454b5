#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use peerlink::core::codec::{FrameCodec, WireMode};
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Small limit so oversized paths are reachable.
    for mode in [WireMode::Delimited, WireMode::LengthPrefixed] {
        let mut codec = FrameCodec::with_mode(mode).with_max_frame_size(4096);
        let mut buf = BytesMut::new();

        // Feed in uneven chunks, as a socket would.
        for chunk in data.chunks(7) {
            buf.extend_from_slice(chunk);
            loop {
                match codec.decode(&mut buf) {
                    Ok(Some(_)) => continue,
                    Ok(None) | Err(_) => break,
                }
            }
        }
        let _ = codec.decode_eof(&mut buf);
    }
});
