//! The public session facade.
//!
//! A [`TransportSession`] is bound to one session id. Each
//! [`start`](TransportSession::start) begins a new request generation and
//! supersedes the previous one; frames reach the caller through a
//! [`FrameHandler`].

mod config;
mod facade;
mod handler;
mod replay;

pub use config::{SessionConfig, StreamRequest};
pub use facade::{TransportSession, create_session};
pub(crate) use handler::Dispatcher;
pub use handler::{ChannelHandler, FrameHandler, dispatch};
pub(crate) use replay::ReplayGuard;
