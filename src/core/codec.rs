//! Frame codec for the peer wire protocol.
//!
//! ## Frame Format
//!
//! Delimited (default, wire compatible with existing peers):
//! ```text
//! +------------------+------+
//! | Body (N bytes)   | 0x04 |
//! +------------------+------+
//! ```
//!
//! Length-prefixed (opt-in; both peers must be configured for it):
//! ```text
//! +----------------+------------------+
//! | Length (4B BE) | Body (N bytes)   |
//! +----------------+------------------+
//! ```
//!
//! Bodies are interpreted by [`Message::from_wire_bytes`].
//!
//! In delimited mode a frame ends at the first delimiter found at an index
//! strictly greater than zero. A buffer that starts with the delimiter never
//! yields a frame, and since new bytes are only ever appended, that
//! connection's decoder stalls from then on. Senders built on this codec
//! refuse to emit empty bodies for that reason.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::config::{FRAME_DELIMITER, MAX_FRAME_SIZE};
use crate::error::{ProtocolError, Result};
use crate::protocol::message::Message;

const LENGTH_PREFIX: usize = 4;

/// Frame `msg` for the default delimited wire.
pub fn encode_frame(msg: &Message) -> Result<Bytes> {
    FrameCodec::new().encode_frame(msg.clone())
}

/// Interpret one frame body: JSON, then text, then raw bytes. Never fails.
pub fn decode_payload(body: &[u8]) -> Message {
    Message::from_wire_bytes(body)
}

/// Framing scheme used on a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireMode {
    /// Body followed by a single `0x04` byte; bodies must not contain it
    #[default]
    Delimited,
    /// 4-byte big-endian length followed by the body; any bytes allowed
    LengthPrefixed,
}

/// Codec turning a byte stream into [`Message`]s and back
#[derive(Debug, Clone)]
pub struct FrameCodec {
    mode: WireMode,
    max_frame_size: usize,
    last_frame_len: usize,
    // Delimited mode: bytes before this index hold no delimiter.
    next_index: usize,
}

impl FrameCodec {
    /// Create a delimited codec with the default size limit
    pub fn new() -> Self {
        Self {
            mode: WireMode::Delimited,
            max_frame_size: MAX_FRAME_SIZE,
            last_frame_len: 0,
            next_index: 0,
        }
    }

    /// Create a codec for the given wire mode
    pub fn with_mode(mode: WireMode) -> Self {
        Self {
            mode,
            max_frame_size: MAX_FRAME_SIZE,
            last_frame_len: 0,
            next_index: 0,
        }
    }

    /// Set the maximum frame body size
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn mode(&self) -> WireMode {
        self.mode
    }

    /// Body length of the most recently encoded or decoded frame
    pub fn last_frame_len(&self) -> usize {
        self.last_frame_len
    }

    /// Encode one message into a standalone frame
    pub fn encode_frame(&mut self, msg: Message) -> Result<Bytes> {
        let mut dst = BytesMut::new();
        self.encode(msg, &mut dst)?;
        Ok(dst.freeze())
    }

    /// Extract every complete frame from `buf`, leaving the incomplete tail in place
    pub fn decode_all(&mut self, buf: &mut BytesMut) -> Result<Vec<Message>> {
        let mut out = Vec::new();
        while let Some(msg) = self.decode(buf)? {
            out.push(msg);
        }
        Ok(out)
    }

    fn decode_delimited(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        // A leading delimiter is never a boundary and stays at the front forever.
        let found = if src.first() == Some(&FRAME_DELIMITER) {
            None
        } else {
            let start = self.next_index.min(src.len());
            src[start..]
                .iter()
                .position(|b| *b == FRAME_DELIMITER)
                .map(|offset| start + offset)
        };

        match found {
            Some(pos) => {
                self.next_index = 0;
                if pos > self.max_frame_size {
                    return Err(ProtocolError::OversizedPacket(pos));
                }
                let body = src.split_to(pos);
                src.advance(1);
                self.last_frame_len = body.len();
                Ok(Some(decode_payload(&body)))
            }
            None => {
                self.next_index = src.len();
                if src.len() > self.max_frame_size + 1 {
                    return Err(ProtocolError::OversizedPacket(src.len()));
                }
                Ok(None)
            }
        }
    }

    fn decode_length_prefixed(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        if src.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let mut length_bytes = [0u8; LENGTH_PREFIX];
        length_bytes.copy_from_slice(&src[..LENGTH_PREFIX]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length > self.max_frame_size {
            return Err(ProtocolError::OversizedPacket(length));
        }

        let total_size = LENGTH_PREFIX + length;
        if src.len() < total_size {
            src.reserve(total_size - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX);
        let body = src.split_to(length);
        self.last_frame_len = length;
        Ok(Some(decode_payload(&body)))
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.mode {
            WireMode::Delimited => self.decode_delimited(src),
            WireMode::LengthPrefixed => self.decode_length_prefixed(src),
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(buf)? {
            Some(msg) => Ok(Some(msg)),
            None => {
                if !buf.is_empty() {
                    trace!(bytes = buf.len(), "Discarding incomplete frame at end of stream");
                    buf.clear();
                }
                self.next_index = 0;
                Ok(None)
            }
        }
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        let body = item.to_wire_bytes()?;

        if body.len() > self.max_frame_size {
            return Err(ProtocolError::OversizedPacket(body.len()));
        }

        // Validated below; recorded now so callers can count body bytes.
        let body_len = body.len();

        match self.mode {
            WireMode::Delimited => {
                if body.is_empty() {
                    return Err(ProtocolError::EmptyPayload);
                }
                if body.contains(&FRAME_DELIMITER) {
                    return Err(ProtocolError::DelimiterInPayload);
                }
                dst.reserve(body.len() + 1);
                dst.put_slice(&body);
                dst.put_u8(FRAME_DELIMITER);
            }
            WireMode::LengthPrefixed => {
                dst.reserve(LENGTH_PREFIX + body.len());
                dst.put_u32(body.len() as u32);
                dst.put_slice(&body);
            }
        }

        self.last_frame_len = body_len;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_appends_delimiter() {
        let mut codec = FrameCodec::new();
        let frame = codec.encode_frame(Message::text("hello")).unwrap();
        assert_eq!(&frame[..], b"hello\x04");
    }

    #[test]
    fn test_free_functions() {
        assert_eq!(&encode_frame(&Message::text("hi")).unwrap()[..], b"hi\x04");
        assert_eq!(decode_payload(b"[1]"), Message::Json(json!([1])));
    }

    #[test]
    fn test_multi_frame_burst() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"one\x04{\"x\":1}\x04two\x04"[..]);
        let msgs = codec.decode_all(&mut buf).unwrap();
        assert_eq!(
            msgs,
            vec![
                Message::text("one"),
                Message::Json(json!({"x": 1})),
                Message::text("two"),
            ]
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_leftover_tail_kept() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"done\x04partial"[..]);
        let msgs = codec.decode_all(&mut buf).unwrap();
        assert_eq!(msgs, vec![Message::text("done")]);
        assert_eq!(codec.last_frame_len(), 4);
        assert_eq!(&buf[..], b"partial");
    }

    #[test]
    fn test_partial_frame_scan_resumes_where_it_stopped() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        let chunk = vec![b'a'; 8 * 1024];

        for _ in 0..4 {
            buf.extend_from_slice(&chunk);
            assert!(codec.decode(&mut buf).unwrap().is_none());
            assert_eq!(codec.next_index, buf.len());
        }

        buf.extend_from_slice(b"b\x04c");
        assert!(codec.decode(&mut buf).unwrap().is_some());
        assert_eq!(codec.last_frame_len(), 4 * 8 * 1024 + 1);
        assert_eq!(codec.next_index, 0);
        assert_eq!(&buf[..], b"c");
    }

    #[test]
    fn test_large_frame_in_small_chunks_decodes_quickly() {
        let total = 8 * 1024 * 1024;
        let mut codec = FrameCodec::new().with_max_frame_size(total);
        let mut buf = BytesMut::new();
        let chunk = vec![b'z'; 8 * 1024];

        let started = std::time::Instant::now();
        let mut frames = Vec::new();
        for _ in 0..total / chunk.len() {
            buf.extend_from_slice(&chunk);
            frames.extend(codec.decode_all(&mut buf).unwrap());
        }
        buf.put_u8(FRAME_DELIMITER);
        frames.extend(codec.decode_all(&mut buf).unwrap());

        assert_eq!(frames.len(), 1);
        assert_eq!(codec.last_frame_len(), total);
        assert!(
            started.elapsed() < std::time::Duration::from_secs(5),
            "took {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn test_encode_records_body_len() {
        let mut codec = FrameCodec::new();
        let frame = codec.encode_frame(Message::text("hello")).unwrap();
        assert_eq!(frame.len(), 6);
        assert_eq!(codec.last_frame_len(), 5);

        let mut codec = FrameCodec::with_mode(WireMode::LengthPrefixed);
        let frame = codec.encode_frame(Message::text("hello")).unwrap();
        assert_eq!(frame.len(), 9);
        assert_eq!(codec.last_frame_len(), 5);
    }

    #[test]
    fn test_leading_delimiter_stalls() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"\x04"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        // Later bytes are appended behind the delimiter and stay stuck.
        buf.extend_from_slice(b"abc\x04");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(&buf[..], b"\x04abc\x04");
    }

    #[test]
    fn test_back_to_back_delimiters_stall_after_first_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"a\x04\x04b\x04"[..]);
        let msgs = codec.decode_all(&mut buf).unwrap();
        assert_eq!(msgs, vec![Message::text("a")]);
        assert_eq!(&buf[..], b"\x04b\x04");
    }

    #[test]
    fn test_encode_rejects_delimiter_and_empty() {
        let mut codec = FrameCodec::new();
        assert!(matches!(
            codec.encode_frame(Message::bytes(vec![1u8, FRAME_DELIMITER, 2])),
            Err(ProtocolError::DelimiterInPayload)
        ));
        assert!(matches!(
            codec.encode_frame(Message::text("")),
            Err(ProtocolError::EmptyPayload)
        ));
    }

    #[test]
    fn test_length_prefixed_carries_delimiter() {
        let mut codec = FrameCodec::with_mode(WireMode::LengthPrefixed);
        let payload = vec![0xffu8, FRAME_DELIMITER, 0x00];
        let frame = codec.encode_frame(Message::bytes(payload.clone())).unwrap();
        assert_eq!(&frame[..4], &3u32.to_be_bytes());

        let mut buf = BytesMut::from(&frame[..]);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, Message::bytes(payload));
    }

    #[test]
    fn test_length_prefixed_empty_body() {
        let mut codec = FrameCodec::with_mode(WireMode::LengthPrefixed);
        let frame = codec.encode_frame(Message::text("")).unwrap();
        let mut buf = BytesMut::from(&frame[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Message::text("")));
    }

    #[test]
    fn test_oversized_frames_rejected() {
        let mut codec = FrameCodec::new().with_max_frame_size(8);
        let mut buf = BytesMut::from(&[b'a'; 16][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::OversizedPacket(16))
        ));

        let mut prefixed = FrameCodec::with_mode(WireMode::LengthPrefixed).with_max_frame_size(8);
        let mut buf = BytesMut::new();
        buf.put_u32(1024);
        assert!(matches!(
            prefixed.decode(&mut buf),
            Err(ProtocolError::OversizedPacket(1024))
        ));
    }

    #[test]
    fn test_decode_eof_drops_tail() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"incomplete"[..]);
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_wire_mode_serde_names() {
        let mode: WireMode = serde_json::from_str("\"length_prefixed\"").unwrap();
        assert_eq!(mode, WireMode::LengthPrefixed);
        assert_eq!(serde_json::to_string(&WireMode::Delimited).unwrap(), "\"delimited\"");
    }
}
