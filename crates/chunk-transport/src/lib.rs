use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

mod loopback;

pub use loopback::{LoopbackEnd, LoopbackTransport};

/// Opaque run of terminal bytes. Relayed whole: never split, merged or reordered.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct ByteChunk(Bytes);

impl ByteChunk {
    pub fn new(bytes: Bytes) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// The chunk as text, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    /// JSON string literal of the chunk, decoded lossily.
    pub fn to_json(&self) -> String {
        json_string(&self.0)
    }

    /// JSON string form followed by the raw byte values, e.g.
    /// `"\u001b[A" [27, 91, 65]`.
    pub fn describe(&self) -> String {
        format!("{} {:?}", self.to_json(), self.as_bytes())
    }
}

/// JSON string literal of `bytes`; invalid UTF-8 becomes U+FFFD.
pub fn json_string(bytes: &[u8]) -> String {
    serde_json::to_string(&String::from_utf8_lossy(bytes)).unwrap_or_default()
}

impl Deref for ByteChunk {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for ByteChunk {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ByteChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteChunk(\"{}\")", self.0.escape_ascii())
    }
}

impl From<Bytes> for ByteChunk {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<Vec<u8>> for ByteChunk {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<String> for ByteChunk {
    fn from(text: String) -> Self {
        Self(Bytes::from(text))
    }
}

impl From<&[u8]> for ByteChunk {
    fn from(bytes: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(bytes))
    }
}

impl From<&str> for ByteChunk {
    fn from(text: &str) -> Self {
        Self(Bytes::copy_from_slice(text.as_bytes()))
    }
}

impl PartialEq<str> for ByteChunk {
    fn eq(&self, other: &str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl PartialEq<&str> for ByteChunk {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport unavailable: no open connection")]
    Unavailable,
    #[error("transport closed")]
    Closed,
    #[error("transport failed: {0}")]
    Failed(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// What a connection reports to the session that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(ByteChunk),
    Closed { reason: Option<String> },
    Error(String),
}

pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Outbound half of a duplex chunk connection.
///
/// `send` hands the chunk to the connection and returns without waiting for
/// delivery. Inbound traffic and lifecycle changes arrive separately as
/// [`TransportEvent`]s on the receiver created alongside the transport.
pub trait Transport: Send + Sync {
    fn send(&self, chunk: ByteChunk) -> TransportResult<()>;
    fn close(&self);
    fn is_open(&self) -> bool;
}

/// Payload of one outbound WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// WebSocket message type used for outbound chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FrameKind {
    #[default]
    Binary,
    /// Text frames when the chunk is valid UTF-8, binary otherwise.
    Text,
}

impl FrameKind {
    /// Returns the chunk as text when it should go out as a text frame.
    pub fn text_payload<'a>(&self, chunk: &'a ByteChunk) -> Option<&'a str> {
        match self {
            FrameKind::Binary => None,
            FrameKind::Text => chunk.as_str(),
        }
    }

    pub fn frame(&self, chunk: &ByteChunk) -> Frame {
        match self.text_payload(chunk) {
            Some(text) => Frame::Text(text.to_owned()),
            None => Frame::Binary(chunk.as_bytes().to_vec()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FrameKind::Binary => "binary",
            FrameKind::Text => "text",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown frame kind '{0}' (expected 'text' or 'binary')")]
pub struct ParseFrameKindError(String);

impl FromStr for FrameKind {
    type Err = ParseFrameKindError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "binary" | "bin" => Ok(FrameKind::Binary),
            "text" => Ok(FrameKind::Text),
            other => Err(ParseFrameKindError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_debug_escapes_control_bytes() {
        let chunk = ByteChunk::from("\x1b[1;3;31mhi\x1b[0m\r\n");
        assert_eq!(
            format!("{chunk:?}"),
            "ByteChunk(\"\\x1b[1;3;31mhi\\x1b[0m\\r\\n\")"
        );
    }

    #[test]
    fn text_frames_fall_back_for_invalid_utf8() {
        let text = ByteChunk::from("ls\r\n");
        let split_char = ByteChunk::from(&[0xe4u8, 0xb8][..]);
        assert_eq!(FrameKind::Text.text_payload(&text), Some("ls\r\n"));
        assert_eq!(FrameKind::Text.text_payload(&split_char), None);
        assert_eq!(FrameKind::Binary.text_payload(&text), None);
    }

    #[test]
    fn frames_carry_the_chunk_bytes() {
        let split_char = ByteChunk::from(&[0xe4u8, 0xb8][..]);
        assert_eq!(
            FrameKind::Text.frame(&ByteChunk::from("hi")),
            Frame::Text("hi".to_string())
        );
        assert_eq!(
            FrameKind::Text.frame(&split_char),
            Frame::Binary(vec![0xe4, 0xb8])
        );
        assert_eq!(
            FrameKind::Binary.frame(&ByteChunk::from("hi")),
            Frame::Binary(b"hi".to_vec())
        );
    }

    #[test]
    fn describe_shows_json_and_bytes() {
        assert_eq!(
            ByteChunk::from("\x1b[A").describe(),
            "\"\\u001b[A\" [27, 91, 65]"
        );
        assert_eq!(ByteChunk::from("ls\r\n").to_json(), "\"ls\\r\\n\"");
        assert_eq!(json_string(&[0xff]), "\"\u{fffd}\"");
    }

    #[test]
    fn frame_kind_parses_case_insensitively() {
        assert_eq!("TEXT".parse::<FrameKind>().unwrap(), FrameKind::Text);
        assert_eq!("binary".parse::<FrameKind>().unwrap(), FrameKind::Binary);
        assert!("json".parse::<FrameKind>().is_err());
    }
}
