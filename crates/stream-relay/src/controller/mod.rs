//! Connection lifecycle supervision.
//!
//! The reconnection controller owns the [`ConnectionState`] machine of one
//! session, opens and closes the underlying [`Connection`](crate::transport::Connection),
//! applies backoff between attempts and runs the heartbeat for bidirectional
//! transports.
//!
//! # Architecture
//!
//! ```text
//! TransportSession::start(request)
//!   └─ tokio::spawn(GenerationDriver::run)      one task per generation
//!        │
//!        ├── Connector::connect ──► Connection   (retried with backoff)
//!        ├── FrameDecoder ──► ReplayGuard ──► TokenCoalescer ──► Dispatcher ──► FrameHandler
//!        └── StateMonitor (watch) ──► ConnectionInfo
//! ```

pub(crate) mod driver;
mod liveness;
mod state;

pub use liveness::LatencySampler;
pub(crate) use liveness::unix_millis;
pub use state::{ConnectionInfo, ConnectionState};
pub(crate) use state::StateMonitor;
