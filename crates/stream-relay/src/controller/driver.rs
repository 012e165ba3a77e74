//! The background task that serves one request generation.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, Interval, MissedTickBehavior, interval_at, sleep_until, timeout},
};
use tracing::{debug, error, info, warn};

use super::{ConnectionState, LatencySampler, StateMonitor, liveness::ping_message, unix_millis};
use crate::{
    cancel::CancellationScope,
    coalesce::TokenCoalescer,
    decode::FrameDecoder,
    error::{StreamError, StreamResult},
    frame::Frame,
    reconnect::PendingRetry,
    session::{Dispatcher, FrameHandler, ReplayGuard, SessionConfig, StreamRequest},
    transport::{ConnectTarget, Connection, Connector, Inbound, TransportKind},
};

/// Commands sent from the session to the running driver.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    /// Send one serialized message over the open connection.
    Send(String),
}

/// How one connection ended.
#[derive(Debug)]
enum Outcome {
    /// A terminal frame or the end-of-stream line was delivered.
    Finished,
    /// The generation's scope was cancelled.
    Cancelled,
    /// Transient failure, worth another attempt.
    Dropped(StreamError),
    /// Permanent failure.
    Fatal(StreamError),
}

impl Outcome {
    fn from_error(err: StreamError) -> Self {
        if err.is_retryable() {
            Self::Dropped(err)
        } else {
            Self::Fatal(err)
        }
    }
}

/// What to do after handling a frame.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Finished,
    Cancelled,
}

/// An outstanding heartbeat probe.
#[derive(Debug, Clone, Copy)]
struct Probe {
    timestamp: u64,
    sent_at: Instant,
    deadline: Instant,
}

/// Everything needed to spawn a driver.
pub(crate) struct DriverParts<H> {
    pub(crate) session_id: Arc<str>,
    pub(crate) config: Arc<SessionConfig>,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) dispatcher: Arc<Dispatcher<H>>,
    pub(crate) monitor: Arc<StateMonitor>,
    pub(crate) scope: CancellationScope,
    pub(crate) request: StreamRequest,
    pub(crate) commands: mpsc::Receiver<SessionCommand>,
    /// Driver of the superseded generation; awaited before connecting.
    pub(crate) previous: Option<JoinHandle<()>>,
}

/// Drives the connection of one generation: connect, decode, coalesce,
/// deliver, reconnect with backoff, heartbeat.
///
/// The driver is the only owner of the [`Connection`]. It exits when the
/// generation finishes, fails, or its scope is cancelled, closing the
/// connection on the way out.
pub(crate) struct GenerationDriver<H> {
    session_id: Arc<str>,
    config: Arc<SessionConfig>,
    connector: Arc<dyn Connector>,
    dispatcher: Arc<Dispatcher<H>>,
    monitor: Arc<StateMonitor>,
    scope: CancellationScope,
    request: StreamRequest,
    commands: mpsc::Receiver<SessionCommand>,
    commands_open: bool,
    previous: Option<JoinHandle<()>>,

    decoder: FrameDecoder,
    coalescer: TokenCoalescer,
    replay: ReplayGuard,
    sampler: LatencySampler,
    probe: Option<Probe>,
}

impl<H: FrameHandler> GenerationDriver<H> {
    pub(crate) fn new(parts: DriverParts<H>) -> Self {
        let coalescer = TokenCoalescer::new(parts.config.flush_interval);
        let sampler = LatencySampler::new(parts.config.latency_window);
        Self {
            session_id: parts.session_id,
            config: parts.config,
            connector: parts.connector,
            dispatcher: parts.dispatcher,
            monitor: parts.monitor,
            scope: parts.scope,
            request: parts.request,
            commands: parts.commands,
            commands_open: true,
            previous: parts.previous,
            decoder: FrameDecoder::new(),
            coalescer,
            replay: ReplayGuard::new(),
            sampler,
            probe: None,
        }
    }

    /// Run the generation to completion.
    pub(crate) async fn run(mut self) {
        let generation = self.scope.generation();

        // The superseded driver has been cancelled; wait until it has closed
        // its connection so two connections never overlap.
        if let Some(previous) = self.previous.take()
            && let Err(err) = previous.await
        {
            warn!(session_id = %self.session_id, %generation, error = %err, "Previous driver did not exit cleanly");
        }

        let backoff = self.config.backoff();
        let mut attempt: u32 = 0;

        loop {
            if self.scope.is_cancelled() {
                debug!(session_id = %self.session_id, %generation, "Generation cancelled before connecting");
                return;
            }

            info!(
                session_id = %self.session_id,
                %generation,
                attempt,
                kind = %self.connector.kind(),
                "Connecting"
            );
            let outcome = match self.establish(attempt).await {
                Ok(Some((connection, queued))) => self.serve(connection, queued, &mut attempt).await,
                Ok(None) => Outcome::Cancelled,
                Err(err) => Outcome::from_error(err),
            };

            match outcome {
                Outcome::Finished => {
                    info!(session_id = %self.session_id, %generation, "Stream complete");
                    self.monitor.transition(generation, ConnectionState::Closed);
                    return;
                }
                Outcome::Cancelled => {
                    debug!(session_id = %self.session_id, %generation, "Generation cancelled");
                    self.coalescer.clear();
                    return;
                }
                Outcome::Fatal(err) => {
                    error!(session_id = %self.session_id, %generation, error = %err, "Connection failed permanently");
                    self.fail(&err);
                    return;
                }
                Outcome::Dropped(err) => {
                    // Text that already arrived is not held back by a
                    // reconnect.
                    if let Some(frame) = self.coalescer.flush()
                        && !self.deliver(&frame)
                    {
                        return;
                    }

                    let Some(retry) = PendingRetry::schedule(
                        backoff,
                        attempt,
                        self.config.reconnect_max_attempts,
                        Instant::now(),
                    ) else {
                        error!(
                            session_id = %self.session_id,
                            %generation,
                            attempts = attempt,
                            error = %err,
                            "Max reconnect attempts exceeded"
                        );
                        self.fail(&err);
                        return;
                    };

                    self.monitor
                        .transition(generation, ConnectionState::Reconnecting);
                    self.monitor.set_pending_retry(generation, retry);
                    warn!(
                        session_id = %self.session_id,
                        %generation,
                        attempt,
                        delay_ms = retry.next_delay.as_millis() as u64,
                        delivered = self.replay.admitted(),
                        error = %err,
                        "Reconnecting after backoff"
                    );

                    if self.scope.run(sleep_until(retry.deadline)).await.is_none() {
                        return;
                    }
                    attempt = attempt.saturating_add(1);
                    self.monitor
                        .transition(generation, ConnectionState::Connecting);
                }
            }
        }
    }

    /// One connection attempt, bounded by the connect timeout.
    ///
    /// Returns `Ok(None)` if the scope was cancelled while connecting.
    async fn establish(
        &mut self,
        attempt: u32,
    ) -> StreamResult<Option<(Box<dyn Connection>, Vec<Frame>)>> {
        let scope = self.scope.clone();
        let connect_timeout = self.config.connect_timeout;
        match scope.run(timeout(connect_timeout, self.open(attempt))).await {
            None => Ok(None),
            Some(Err(_elapsed)) => Err(StreamError::timeout(connect_timeout)),
            Some(Ok(result)) => result.map(Some),
        }
    }

    /// Open a connection and, for the bidirectional variant, complete the
    /// acknowledgement handshake and send the request.
    ///
    /// Returns the connection plus frames to deliver before reading on.
    async fn open(&mut self, attempt: u32) -> StreamResult<(Box<dyn Connection>, Vec<Frame>)> {
        let resume_from = self.decoder.last_event_id().map(str::to_owned);
        let target = ConnectTarget {
            session_id: &self.session_id,
            request: &self.request,
            last_event_id: resume_from.as_deref(),
            attempt,
        };
        let mut connection = self.connector.connect(&target).await?;
        self.decoder.reset_connection();
        self.replay.begin_connection(resume_from.is_some());

        let mut ready = Vec::new();
        if self.connector.kind() != TransportKind::Bidirectional {
            return Ok((connection, ready));
        }

        if self.config.require_connection_ack {
            let mut early = Vec::new();
            loop {
                let frames = match connection.recv().await {
                    Some(Ok(inbound)) => self.decode(inbound),
                    Some(Err(err)) => return Err(err),
                    None => {
                        return Err(StreamError::connection_closed(Some(
                            "closed before connection_ack".to_string(),
                        )));
                    }
                };
                let mut acked = false;
                for frame in frames {
                    if !acked && frame == Frame::ConnectionAck {
                        acked = true;
                        ready.push(frame);
                    } else {
                        early.push(frame);
                    }
                }
                if acked {
                    break;
                }
            }
            debug!(
                session_id = %self.session_id,
                queued = early.len(),
                "Connection acknowledged"
            );
            ready.extend(early);
        }

        if let Some(payload) = &self.request.payload {
            connection.send(payload.to_string()).await?;
        }
        Ok((connection, ready))
    }

    /// Read from an open connection until it ends or the scope is cancelled.
    async fn serve(
        &mut self,
        mut connection: Box<dyn Connection>,
        queued: Vec<Frame>,
        attempt: &mut u32,
    ) -> Outcome {
        let generation = self.scope.generation();
        self.monitor.transition(generation, ConnectionState::Open);
        info!(session_id = %self.session_id, %generation, "Connection open");
        *attempt = 0;
        self.probe = None;

        let outcome = self.pump(connection.as_mut(), queued).await;
        connection.close().await;
        outcome
    }

    async fn pump(&mut self, connection: &mut dyn Connection, queued: Vec<Frame>) -> Outcome {
        match self.handle_frames(queued) {
            Flow::Continue => {}
            Flow::Finished => return Outcome::Finished,
            Flow::Cancelled => return Outcome::Cancelled,
        }

        let mut ping = (self.connector.kind() == TransportKind::Bidirectional).then(|| {
            let period = self.config.ping_interval;
            let mut ping = interval_at(Instant::now() + period, period);
            ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ping
        });

        loop {
            let flush_at = self.coalescer.deadline();
            let pong_deadline = self.probe.map(|probe| probe.deadline);

            tokio::select! {
                biased;

                _ = self.scope.cancelled() => return Outcome::Cancelled,

                _ = sleep_until_some(flush_at) => {
                    if let Some(frame) = self.coalescer.poll_flush(Instant::now())
                        && !self.deliver(&frame)
                    {
                        return Outcome::Cancelled;
                    }
                }

                _ = sleep_until_some(pong_deadline) => {
                    warn!(session_id = %self.session_id, "Heartbeat timed out");
                    self.probe = None;
                    return Outcome::Dropped(StreamError::PongTimeout {
                        timeout: self.config.pong_timeout,
                    });
                }

                _ = tick_some(&mut ping) => {
                    if self.probe.is_none() {
                        let timestamp = unix_millis();
                        if let Err(err) = connection.send(ping_message(timestamp)).await {
                            return Outcome::from_error(err);
                        }
                        let sent_at = Instant::now();
                        self.probe = Some(Probe {
                            timestamp,
                            sent_at,
                            deadline: sent_at + self.config.pong_timeout,
                        });
                        debug!(session_id = %self.session_id, timestamp, "Heartbeat sent");
                    }
                }

                cmd = self.commands.recv(), if self.commands_open => {
                    match cmd {
                        Some(SessionCommand::Send(message)) => {
                            if let Err(err) = connection.send(message).await {
                                warn!(session_id = %self.session_id, error = %err, "Send failed");
                                return Outcome::from_error(err);
                            }
                        }
                        None => self.commands_open = false,
                    }
                }

                inbound = connection.recv() => {
                    let flow = match inbound {
                        Some(Ok(inbound)) => {
                            let frames = self.decode(inbound);
                            self.handle_frames(frames)
                        }
                        Some(Err(err)) => {
                            warn!(session_id = %self.session_id, error = %err, "Connection error");
                            return Outcome::from_error(err);
                        }
                        None => {
                            let frames = self.decoder.finish();
                            match self.handle_frames(frames) {
                                Flow::Continue => {
                                    warn!(session_id = %self.session_id, "Connection closed before the stream finished");
                                    return Outcome::Dropped(StreamError::connection_closed(None));
                                }
                                flow => flow,
                            }
                        }
                    };
                    match flow {
                        Flow::Continue => {}
                        Flow::Finished => return Outcome::Finished,
                        Flow::Cancelled => return Outcome::Cancelled,
                    }
                }
            }
        }
    }

    fn decode(&mut self, inbound: Inbound) -> Vec<Frame> {
        match inbound {
            Inbound::Chunk(bytes) => self.decoder.push(&bytes),
            Inbound::Message(text) => self.decoder.push_message(&text),
            Inbound::Malformed(reason) => self.decoder.push_malformed(reason),
        }
    }

    fn handle_frames(&mut self, frames: Vec<Frame>) -> Flow {
        for frame in frames {
            let flow = self.handle_frame(frame);
            if flow != Flow::Continue {
                return flow;
            }
        }
        if self.decoder.is_terminated() {
            return Flow::Finished;
        }
        Flow::Continue
    }

    fn handle_frame(&mut self, frame: Frame) -> Flow {
        let frame = match frame {
            Frame::Pong {
                timestamp,
                latency_ms,
            } => {
                let latency = self.observe_pong(timestamp, latency_ms);
                Frame::Pong {
                    timestamp,
                    latency_ms: latency.map(|d| d.as_millis() as u64).or(latency_ms),
                }
            }
            frame => frame,
        };

        if !self.replay.admit(&frame) {
            debug!(session_id = %self.session_id, kind = %frame.kind(), "Skipping replayed frame");
            return Flow::Continue;
        }
        if frame.is_parse_error() {
            debug!(session_id = %self.session_id, "Delivering parse error");
        }

        let terminal = frame.is_terminal();
        for out in self.coalescer.push(frame, Instant::now()) {
            if !self.deliver(&out) {
                return Flow::Cancelled;
            }
        }
        if terminal {
            return Flow::Finished;
        }
        Flow::Continue
    }

    /// Match a pong against the outstanding probe and sample latency.
    fn observe_pong(&mut self, timestamp: Option<u64>, reported: Option<u64>) -> Option<Duration> {
        let matched = self
            .probe
            .take_if(|probe| timestamp.is_none_or(|ts| ts == probe.timestamp));
        let latency = match (matched, reported, timestamp) {
            (Some(probe), _, _) => Some(probe.sent_at.elapsed()),
            (None, Some(ms), _) => Some(Duration::from_millis(ms)),
            (None, None, Some(ts)) => Some(Duration::from_millis(unix_millis().saturating_sub(ts))),
            (None, None, None) => None,
        }?;

        self.sampler.record(latency);
        self.monitor
            .record_latency(self.scope.generation(), latency, self.sampler.average());
        debug!(
            session_id = %self.session_id,
            latency_ms = latency.as_millis() as u64,
            "Heartbeat acknowledged"
        );
        Some(latency)
    }

    /// Deliver unless the scope is cancelled. Returns `false` if suppressed.
    fn deliver(&self, frame: &Frame) -> bool {
        self.dispatcher.deliver(&self.scope, frame)
    }

    /// Give up on the generation: flush, move to `Failed`, report.
    fn fail(&mut self, err: &StreamError) {
        if let Some(frame) = self.coalescer.flush()
            && !self.deliver(&frame)
        {
            return;
        }
        if self.scope.is_cancelled() {
            return;
        }
        self.monitor
            .transition(self.scope.generation(), ConnectionState::Failed);
        self.deliver(&Frame::connection_failed(err.to_string()));
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn tick_some(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
