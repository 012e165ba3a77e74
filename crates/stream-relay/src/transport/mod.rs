//! Network primitives the controller supervises.
//!
//! A [`Connector`] opens one [`Connection`] per attempt. The controller is the
//! only caller: no other component opens or closes connections.
//!
//! | Variant | Connector | Inbound data |
//! |---------|-----------|--------------|
//! | One-way (server-sent events) | [`SseConnector`] | [`Inbound::Chunk`] |
//! | Bidirectional (WebSocket) | [`WsConnector`] | [`Inbound::Message`] |

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{error::StreamResult, session::StreamRequest};

#[cfg(feature = "sse")]
pub mod sse;
#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "sse")]
pub use sse::SseConnector;
#[cfg(feature = "websocket")]
pub use websocket::WsConnector;

/// Which transport variant a session uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Server-to-client event stream. No `send()`, no heartbeat.
    OneWay,
    /// Socket with messages in both directions, acknowledgement and heartbeat.
    Bidirectional,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OneWay => write!(f, "one-way"),
            Self::Bidirectional => write!(f, "bidirectional"),
        }
    }
}

/// Raw data received from a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    /// A slice of a line-delimited byte stream, not aligned to lines.
    Chunk(Bytes),
    /// One complete JSON message.
    Message(String),
    /// A message that could not be read as text; reported as a parse error.
    Malformed(String),
}

/// What a connection attempt needs to know.
#[derive(Clone, Copy, Debug)]
pub struct ConnectTarget<'a> {
    pub session_id: &'a str,
    pub request: &'a StreamRequest,
    /// Resume point reported by the stream before the previous connection
    /// dropped.
    pub last_event_id: Option<&'a str>,
    /// 0 for the first attempt of a generation.
    pub attempt: u32,
}

/// Opens connections for one transport variant.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    fn kind(&self) -> TransportKind;

    /// Establish a new connection.
    ///
    /// The returned connection is established at the transport level; for
    /// the bidirectional variant the controller still waits for the
    /// application-level acknowledgement.
    async fn connect(&self, target: &ConnectTarget<'_>) -> StreamResult<Box<dyn Connection>>;
}

/// One established network primitive.
#[async_trait]
pub trait Connection: Send {
    /// Next piece of inbound data; `None` once the peer has closed.
    ///
    /// Must be cancel-safe: the controller races it against timers.
    async fn recv(&mut self) -> Option<StreamResult<Inbound>>;

    /// Send one text message to the peer.
    async fn send(&mut self, message: String) -> StreamResult<()>;

    /// Close the connection. Errors are swallowed.
    async fn close(&mut self);
}
