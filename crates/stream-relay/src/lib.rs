//! # Stream Relay
//!
//! Resilient realtime transport for incrementally generated output, over a
//! one-way event stream (SSE) or a bidirectional socket (WebSocket).
//!
//! The crate decodes raw stream input into typed [`Frame`]s, batches token
//! frames to a bounded cadence, reconnects with exponential backoff, checks
//! liveness with heartbeats, and guarantees that frames of a superseded or
//! cancelled request are never delivered.
//!
//! ## Features
//!
//! - **Frame decoding**: chunk-boundary independent line decoding with
//!   per-line parse errors that never abort the stream
//! - **Token coalescing**: at most one token update per flush interval,
//!   byte-identical text
//! - **Reconnection**: explicit connection state machine, bounded backoff,
//!   replay suppression after a reconnect
//! - **Generations**: one active request per session, stale callbacks
//!   suppressed through [`CancellationScope`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stream_relay::{ChannelHandler, SessionConfig, StreamRequest, create_session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (handler, mut frames) = ChannelHandler::new();
//!     let config = SessionConfig::one_way("https://api.example.com/optimize/stream");
//!     let session = create_session("session-1", config, handler)?;
//!
//!     session.start(StreamRequest::new(serde_json::json!({ "prompt": "hello" })))?;
//!     while let Some(frame) = frames.recv().await {
//!         println!("{frame:?}");
//!         if frame.is_terminal() {
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod coalesce;
pub mod controller;
pub mod decode;
pub mod error;
pub mod frame;
pub mod reconnect;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use cancel::{CancellationScope, Generation};
pub use coalesce::TokenCoalescer;
pub use controller::{ConnectionInfo, ConnectionState, LatencySampler};
pub use decode::{FrameDecoder, FrameStream};
pub use error::{StreamError, StreamResult};
pub use frame::{Frame, FrameKind, InsightItem, Usage, error_code};
pub use reconnect::{BackoffConfig, PendingRetry, calculate_backoff};
pub use session::{
    ChannelHandler, FrameHandler, SessionConfig, StreamRequest, TransportSession, create_session,
};
pub use transport::{Connection, Connector, TransportKind};
#[cfg(feature = "sse")]
pub use transport::SseConnector;
#[cfg(feature = "websocket")]
pub use transport::WsConnector;
