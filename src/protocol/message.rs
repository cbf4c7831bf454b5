use crate::error::{constants, ProtocolError, Result};
use bytes::Bytes;
use serde::Serialize;
use std::fmt;

/// A message exchanged between peers.
///
/// Used both as the payload handed to a send operation and as the value
/// delivered to [`NodeHandler::on_message`](crate::protocol::handler::NodeHandler::on_message).
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Plain UTF-8 text
    Text(String),
    /// Structured document; sent payloads must be JSON objects
    Json(serde_json::Value),
    /// Raw bytes that are not valid UTF-8 (or that the sender chose to send raw)
    Bytes(Bytes),
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        Message::Text(text.into())
    }

    pub fn bytes(data: impl Into<Bytes>) -> Self {
        Message::Bytes(data.into())
    }

    /// Build a structured message from any serializable mapping.
    ///
    /// Fails with an encoding fault when serialization fails or the value is
    /// not a JSON object.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let value = serde_json::to_value(value)?;
        if !value.is_object() {
            return Err(ProtocolError::UnsupportedPayload(
                constants::ERR_UNSUPPORTED_PAYLOAD.into(),
            ));
        }
        Ok(Message::Json(value))
    }

    /// Short name of the payload kind, for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Text(_) => "text",
            Message::Json(_) => "json",
            Message::Bytes(_) => "bytes",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Message::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Message::Bytes(data) => Some(data),
            _ => None,
        }
    }

    /// Serialize the frame body (no framing) according to the payload kind.
    pub fn to_wire_bytes(&self) -> Result<Bytes> {
        match self {
            Message::Text(text) => Ok(Bytes::copy_from_slice(text.as_bytes())),
            Message::Json(value) if value.is_object() => Ok(Bytes::from(serde_json::to_vec(value)?)),
            Message::Json(_) => Err(ProtocolError::UnsupportedPayload(
                constants::ERR_UNSUPPORTED_PAYLOAD.into(),
            )),
            Message::Bytes(data) => Ok(data.clone()),
        }
    }

    /// Interpret a frame body.
    ///
    /// Tried in order: UTF-8 text that parses as JSON, then plain UTF-8 text,
    /// then the raw bytes. Never fails.
    pub fn from_wire_bytes(frame: &[u8]) -> Self {
        match std::str::from_utf8(frame) {
            Ok(text) => match serde_json::from_str::<serde_json::Value>(text) {
                Ok(value) => Message::Json(value),
                Err(_) => Message::Text(text.to_owned()),
            },
            Err(_) => Message::Bytes(Bytes::copy_from_slice(frame)),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Text(text) => f.write_str(text),
            Message::Json(value) => write!(f, "{value}"),
            Message::Bytes(data) => write!(f, "<{} bytes>", data.len()),
        }
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::Text(text.to_owned())
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Text(text)
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Message::Bytes(Bytes::from(data))
    }
}

impl From<Bytes> for Message {
    fn from(data: Bytes) -> Self {
        Message::Bytes(data)
    }
}

impl From<serde_json::Value> for Message {
    fn from(value: serde_json::Value) -> Self {
        Message::Json(value)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_tier() {
        assert_eq!(Message::from_wire_bytes(b"hello"), Message::text("hello"));
    }

    #[test]
    fn test_json_tier() {
        assert_eq!(
            Message::from_wire_bytes(br#"{"x": 1}"#),
            Message::Json(json!({"x": 1}))
        );
    }

    #[test]
    fn test_malformed_json_stays_text() {
        assert_eq!(
            Message::from_wire_bytes(br#"{"x": "#),
            Message::text(r#"{"x": "#)
        );
    }

    #[test]
    fn test_bare_json_scalars_parse() {
        assert_eq!(Message::from_wire_bytes(b"42"), Message::Json(json!(42)));
        assert_eq!(Message::from_wire_bytes(b"true"), Message::Json(json!(true)));
    }

    #[test]
    fn test_invalid_utf8_is_raw() {
        let raw = [0xff, 0xfe, 0x01];
        assert_eq!(
            Message::from_wire_bytes(&raw),
            Message::Bytes(Bytes::copy_from_slice(&raw))
        );
    }

    #[test]
    fn test_json_builder_rejects_non_objects() {
        assert!(Message::json(&json!({"a": [1, 2]})).is_ok());
        assert!(matches!(
            Message::json(&vec![1, 2, 3]),
            Err(ProtocolError::UnsupportedPayload(_))
        ));
    }

    #[test]
    fn test_unsupported_json_wire_bytes() {
        let msg = Message::Json(json!([1, 2]));
        assert!(msg.to_wire_bytes().unwrap_err().is_encoding_fault());
    }

    #[test]
    fn test_display() {
        assert_eq!(Message::text("hi").to_string(), "hi");
        assert_eq!(Message::bytes(vec![1u8, 2, 3]).to_string(), "<3 bytes>");
        assert_eq!(Message::Json(json!({"x": 1})).to_string(), r#"{"x":1}"#);
    }
}
