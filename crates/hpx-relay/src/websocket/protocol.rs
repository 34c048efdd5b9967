//! The narrow interface to the raw socket.
//!
//! The relay never speaks the WebSocket protocol itself. A [`Connector`]
//! opens a [`WsSocket`], whose reader yields inbound frames and whose writer
//! accepts outbound ones. Lifecycle is implied:
//!
//! - `connect` returning `Ok` is the *open* event;
//! - the reader ending, or yielding an `Err`, is the *close* event;
//! - `connect` returning `Err` is an error before open, treated like a close.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::TransportResult;

/// Message representation for WebSocket communication.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WsMessage {
    /// Text message.
    Text(String),
    /// Binary message.
    Binary(Vec<u8>),
}

impl WsMessage {
    /// Create a text message.
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Create a binary message.
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::Binary(data.into())
    }

    /// Get as text if this is a text message.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Binary(_) => None,
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Binary(b) => b.len(),
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode into UTF-8 text, consuming the message.
    pub fn into_text(self) -> TransportResult<String> {
        match self {
            Self::Text(s) => Ok(s),
            Self::Binary(b) => Ok(String::from_utf8(b)?),
        }
    }
}

/// Write half of an open socket.
#[async_trait]
pub trait WsWriter: Send {
    /// Send one frame.
    async fn send_ws(&mut self, message: WsMessage) -> TransportResult<()>;

    /// Close the socket. Called once when the relay tears the session down.
    async fn close(&mut self) -> TransportResult<()> {
        Ok(())
    }
}

/// An open socket, split into its read and write halves.
pub struct WsSocket {
    /// Inbound frames. End of stream or an `Err` item means the socket closed.
    pub reader: BoxStream<'static, TransportResult<WsMessage>>,
    /// Outbound frames.
    pub writer: Box<dyn WsWriter>,
}

impl WsSocket {
    /// Assemble a socket from its halves.
    pub fn new(
        reader: BoxStream<'static, TransportResult<WsMessage>>,
        writer: impl WsWriter + 'static,
    ) -> Self {
        Self {
            reader,
            writer: Box::new(writer),
        }
    }
}

/// Opens sockets to a URL. Called once per connection attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a socket to `url`.
    async fn connect(&self, url: &str) -> TransportResult<WsSocket>;
}
