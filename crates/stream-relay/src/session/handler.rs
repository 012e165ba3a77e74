//! Caller-facing callback interface and ordered delivery.

use std::{cell::Cell, time::Duration};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::{
    cancel::CancellationScope,
    frame::{Frame, InsightItem, Usage},
};

/// Receives the frames of a session, one method per frame variant.
///
/// Every method has an empty default, so implementors only override what
/// they need. Alternatively override [`on_frame`](Self::on_frame) and match
/// on [`Frame`] directly.
///
/// Methods are called from the session's driver task, one at a time and in
/// arrival order. Handlers may call [`TransportSession::stop`] or
/// [`TransportSession::start`] from inside a callback.
///
/// [`TransportSession::stop`]: super::TransportSession::stop
/// [`TransportSession::start`]: super::TransportSession::start
#[allow(unused_variables)]
pub trait FrameHandler: Send + Sync + 'static {
    fn on_stream_start(&self, session_id: &str) {}

    /// Coalesced token text. `is_final` marks the end of the text stream.
    fn on_token(&self, text: &str, is_final: bool) {}

    fn on_insight(&self, items: &[InsightItem]) {}

    fn on_suggestions(&self, items: &[String]) {}

    fn on_result(&self, before: &str, after: &str) {}

    fn on_complete(&self, usage: &Usage) {}

    /// Backend errors, `PARSE_ERROR` reports and the final
    /// `CONNECTION_FAILED`.
    fn on_error(&self, code: &str, message: &str) {}

    fn on_connection_ack(&self) {}

    fn on_pong(&self, latency: Option<Duration>) {}

    fn on_typing_start(&self) {}

    fn on_typing_stop(&self) {}

    /// Entry point for every delivered frame.
    fn on_frame(&self, frame: &Frame) {
        dispatch(self, frame);
    }
}

/// Route `frame` to the matching per-variant method of `handler`.
pub fn dispatch<H: FrameHandler + ?Sized>(handler: &H, frame: &Frame) {
    match frame {
        Frame::StreamStart { session_id } => handler.on_stream_start(session_id),
        Frame::Token { text, is_final } => handler.on_token(text, *is_final),
        Frame::Insight { items } => handler.on_insight(items),
        Frame::Suggestions { items } => handler.on_suggestions(items),
        Frame::Result { before, after } => handler.on_result(before, after),
        Frame::Complete { usage } => handler.on_complete(usage),
        Frame::Error { code, message } => handler.on_error(code, message),
        Frame::ConnectionAck => handler.on_connection_ack(),
        Frame::Pong { latency_ms, .. } => {
            handler.on_pong(latency_ms.map(Duration::from_millis));
        }
        Frame::TypingStart => handler.on_typing_start(),
        Frame::TypingStop => handler.on_typing_stop(),
    }
}

/// A [`FrameHandler`] that forwards every frame into a channel.
///
/// Useful when the consumer prefers pulling frames over callbacks.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<Frame>,
}

impl ChannelHandler {
    /// Create the handler and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl FrameHandler for ChannelHandler {
    fn on_frame(&self, frame: &Frame) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.tx.send(frame.clone());
    }
}

thread_local! {
    /// Dispatcher whose callback is running on this thread, if any.
    static IN_DISPATCH: Cell<*const ()> = const { Cell::new(std::ptr::null()) };
}

struct DispatchMarker {
    previous: *const (),
}

impl DispatchMarker {
    fn enter(dispatcher: *const ()) -> Self {
        Self {
            previous: IN_DISPATCH.with(|current| current.replace(dispatcher)),
        }
    }
}

impl Drop for DispatchMarker {
    fn drop(&mut self) {
        IN_DISPATCH.with(|current| current.set(self.previous));
    }
}

/// Serializes delivery to the handler and makes cancellation final.
///
/// The gate is held for the whole callback. Cancelling through
/// [`cancel`](Self::cancel) takes the same gate, so once it returns no
/// callback of the cancelled scope is running or will run.
pub(crate) struct Dispatcher<H> {
    handler: H,
    gate: Mutex<()>,
}

impl<H: FrameHandler> Dispatcher<H> {
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler,
            gate: Mutex::new(()),
        }
    }

    pub(crate) fn handler(&self) -> &H {
        &self.handler
    }

    fn id(&self) -> *const () {
        (self as *const Self).cast()
    }

    /// Whether one of this dispatcher's callbacks is running on the current
    /// thread.
    fn in_own_callback(&self) -> bool {
        IN_DISPATCH.with(|current| std::ptr::eq(current.get(), self.id()))
    }

    /// Deliver `frame` unless `scope` is cancelled. Returns `false` if the
    /// frame was suppressed.
    pub(crate) fn deliver(&self, scope: &CancellationScope, frame: &Frame) -> bool {
        let _gate = self.gate.lock();
        if scope.is_cancelled() {
            return false;
        }
        let _marker = DispatchMarker::enter(self.id());
        self.handler.on_frame(frame);
        true
    }

    /// Cancel `scope` so that no callback for it runs after this returns.
    pub(crate) fn cancel(&self, scope: &CancellationScope) {
        if self.in_own_callback() {
            // Called from a handler: the running callback is the last one,
            // every later delivery re-checks the scope.
            scope.cancel();
            return;
        }
        let _gate = self.gate.lock();
        scope.cancel();
    }
}
