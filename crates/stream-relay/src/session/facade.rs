use std::sync::Arc;

use parking_lot::Mutex;
use tokio::{runtime::Handle, sync::mpsc, sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{Dispatcher, FrameHandler, SessionConfig, StreamRequest};
use crate::{
    cancel::{CancellationScope, Generation},
    controller::{
        ConnectionInfo, ConnectionState, StateMonitor,
        driver::{DriverParts, GenerationDriver, SessionCommand},
    },
    error::{StreamError, StreamResult},
    transport::{Connector, TransportKind},
};

/// Create a session for `session_id` with the connector matching
/// `config.kind`.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the transport variant
/// was compiled out.
pub fn create_session<H: FrameHandler>(
    session_id: impl Into<Arc<str>>,
    config: SessionConfig,
    handler: H,
) -> StreamResult<TransportSession<H>> {
    config.validate().map_err(StreamError::config)?;
    let config = Arc::new(config);
    let connector: Arc<dyn Connector> = match config.kind {
        #[cfg(feature = "sse")]
        TransportKind::OneWay => Arc::new(crate::transport::SseConnector::new(Arc::clone(&config))?),
        #[cfg(feature = "websocket")]
        TransportKind::Bidirectional => {
            Arc::new(crate::transport::WsConnector::new(Arc::clone(&config)))
        }
        #[allow(unreachable_patterns)]
        kind => {
            return Err(StreamError::config(format!(
                "{kind} transport is not enabled in this build"
            )));
        }
    };
    TransportSession::with_connector(session_id, config, connector, handler)
}

/// One logical conversation with the streaming backend.
///
/// At most one request generation is active at a time and at most one
/// connection is open. Frames of superseded or stopped generations are never
/// delivered.
///
/// Dropping the session cancels everything it started.
pub struct TransportSession<H: FrameHandler> {
    session_id: Arc<str>,
    config: Arc<SessionConfig>,
    connector: Arc<dyn Connector>,
    dispatcher: Arc<Dispatcher<H>>,
    monitor: Arc<StateMonitor>,
    root: CancellationToken,
    inner: Mutex<SessionInner>,
}

#[derive(Default)]
struct SessionInner {
    generation: Generation,
    scope: Option<CancellationScope>,
    commands: Option<mpsc::Sender<SessionCommand>>,
    driver: Option<JoinHandle<()>>,
}

impl<H: FrameHandler> TransportSession<H> {
    /// Create a session that opens connections through `connector`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_connector(
        session_id: impl Into<Arc<str>>,
        config: Arc<SessionConfig>,
        connector: Arc<dyn Connector>,
        handler: H,
    ) -> StreamResult<Self> {
        config.validate().map_err(StreamError::config)?;
        Ok(Self {
            session_id: session_id.into(),
            config,
            connector,
            dispatcher: Arc::new(Dispatcher::new(handler)),
            monitor: Arc::new(StateMonitor::new()),
            root: CancellationToken::new(),
            inner: Mutex::new(SessionInner::default()),
        })
    }

    /// Begin a new request generation.
    ///
    /// The previous generation is cancelled first: once this returns, none of
    /// its callbacks will run, and its connection is closed before the new
    /// one is opened. Delivery happens asynchronously through the handler.
    /// May be called from inside a handler callback.
    ///
    /// # Errors
    ///
    /// Returns an error if the session was disposed or no Tokio runtime is
    /// available to run the connection.
    pub fn start(&self, request: StreamRequest) -> StreamResult<Generation> {
        if self.root.is_cancelled() {
            return Err(StreamError::connection_closed(Some(
                "session disposed".to_string(),
            )));
        }
        let runtime = Handle::try_current()
            .map_err(|_| StreamError::internal("start() must be called within a Tokio runtime"))?;

        let mut inner = self.inner.lock();
        let generation = inner.generation.next();
        let scope = CancellationScope::new(&self.root, generation);
        let (cmd_tx, cmd_rx) = mpsc::channel(self.config.command_channel_capacity);

        let previous_scope = inner.scope.replace(scope.clone());
        if let Some(previous) = &previous_scope {
            previous.cancel();
        }
        self.monitor.begin(generation);

        let driver = GenerationDriver::new(DriverParts {
            session_id: Arc::clone(&self.session_id),
            config: Arc::clone(&self.config),
            connector: Arc::clone(&self.connector),
            dispatcher: Arc::clone(&self.dispatcher),
            monitor: Arc::clone(&self.monitor),
            scope,
            request,
            commands: cmd_rx,
            previous: inner.driver.take(),
        });
        inner.generation = generation;
        inner.commands = Some(cmd_tx);
        inner.driver = Some(runtime.spawn(driver.run()));
        drop(inner);

        // Wait out a callback of the old generation that may be running.
        if let Some(previous) = &previous_scope {
            self.dispatcher.cancel(previous);
        }
        info!(session_id = %self.session_id, %generation, "Request started");
        Ok(generation)
    }

    /// Stop the current generation.
    ///
    /// Moves the connection to `Closed`, discards buffered text and
    /// guarantees no further callback for the generation once it returns.
    /// Idempotent, and safe to call from inside a handler callback.
    pub fn stop(&self) {
        let (scope, generation) = {
            let mut inner = self.inner.lock();
            inner.commands = None;
            (inner.scope.clone(), inner.generation)
        };
        let Some(scope) = scope else {
            return;
        };
        self.dispatcher.cancel(&scope);
        if self.monitor.transition(generation, ConnectionState::Closed) {
            info!(session_id = %self.session_id, %generation, "Request stopped");
        }
    }

    /// Alias of [`stop`](Self::stop).
    pub fn cancel(&self) {
        self.stop();
    }

    /// Send a message over the open bidirectional connection.
    ///
    /// Never reconnects implicitly.
    ///
    /// # Errors
    ///
    /// [`StreamError::Unsupported`] on the one-way variant and
    /// [`StreamError::NotOpen`] unless the connection is `Open`.
    pub async fn send(&self, message: serde_json::Value) -> StreamResult<()> {
        if self.connector.kind() == TransportKind::OneWay {
            return Err(StreamError::Unsupported {
                operation: "send on a one-way stream",
            });
        }
        let state = self.monitor.state();
        if !state.is_open() {
            return Err(StreamError::NotOpen { state });
        }
        let Some(commands) = self.inner.lock().commands.clone() else {
            return Err(StreamError::NotOpen { state });
        };
        commands
            .send(SessionCommand::Send(message.to_string()))
            .await
            .map_err(|_| StreamError::connection_closed(Some("driver exited".to_string())))?;
        debug!(session_id = %self.session_id, "Message queued");
        Ok(())
    }

    /// Current connection state and latency.
    pub fn connection_info(&self) -> ConnectionInfo {
        self.monitor.snapshot()
    }

    /// Watch connection state and latency changes.
    pub fn subscribe_info(&self) -> watch::Receiver<ConnectionInfo> {
        self.monitor.subscribe()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The most recently started generation (0 before the first `start()`).
    pub fn generation(&self) -> Generation {
        self.inner.lock().generation
    }

    /// Whether the current generation may still deliver frames.
    pub fn is_active(&self) -> bool {
        let live = self
            .inner
            .lock()
            .scope
            .as_ref()
            .is_some_and(|scope| !scope.is_cancelled());
        live && !self.monitor.state().is_terminal()
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.connector.kind()
    }

    pub fn handler(&self) -> &H {
        self.dispatcher.handler()
    }

    /// Stop the current generation and refuse further `start()` calls.
    pub fn dispose(&self) {
        self.stop();
        self.root.cancel();
        debug!(session_id = %self.session_id, "Session disposed");
    }
}

impl<H: FrameHandler> Drop for TransportSession<H> {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

impl<H: FrameHandler> std::fmt::Debug for TransportSession<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession")
            .field("session_id", &self.session_id)
            .field("kind", &self.connector.kind())
            .field("info", &self.monitor.snapshot())
            .finish_non_exhaustive()
    }
}
