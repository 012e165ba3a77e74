//! Session configuration and request payloads.

use std::time::Duration;

use serde::Serialize;

use crate::{
    coalesce::DEFAULT_FLUSH_INTERVAL, error::StreamResult, reconnect::BackoffConfig,
    transport::TransportKind,
};

/// Configuration for a [`TransportSession`](super::TransportSession).
///
/// Builder-style: start from [`one_way`](Self::one_way) or
/// [`bidirectional`](Self::bidirectional) and chain setters.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    // Endpoint
    /// Event stream URL, or WebSocket base URL (see
    /// [`session_url`](crate::transport::websocket::session_url)).
    pub url: String,
    /// Transport variant.
    pub kind: TransportKind,
    /// Additional HTTP headers for the one-way variant.
    pub headers: http::HeaderMap,
    /// Bearer token (header for one-way, `token` query parameter for
    /// bidirectional).
    pub bearer_token: Option<String>,
    /// Timeout for one connection attempt, including the acknowledgement wait.
    pub connect_timeout: Duration,

    // Reconnection settings
    /// Initial delay before the first reconnection attempt.
    pub reconnect_initial_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub reconnect_max_delay: Duration,
    /// Backoff multiplier for reconnection delays.
    pub reconnect_backoff_factor: f64,
    /// Maximum number of reconnection attempts (None = infinite).
    pub reconnect_max_attempts: Option<u32>,
    /// Random jitter factor (0.0-1.0) for reconnection delays.
    pub reconnect_jitter: f64,

    // Heartbeat settings (bidirectional only)
    /// Interval between heartbeat probes.
    pub ping_interval: Duration,
    /// Maximum time to wait for the matching pong.
    pub pong_timeout: Duration,
    /// Wait for `connection_ack` before treating the socket as open.
    pub require_connection_ack: bool,
    /// Number of latency samples in the rolling average.
    pub latency_window: usize,

    // Delivery
    /// Token coalescing cadence. Zero delivers every token as it arrives.
    pub flush_interval: Duration,
    /// Capacity of the outbound `send()` queue.
    pub command_channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            kind: TransportKind::OneWay,
            headers: http::HeaderMap::new(),
            bearer_token: None,
            connect_timeout: Duration::from_secs(10),
            reconnect_initial_delay: Duration::from_millis(1000),
            reconnect_max_delay: Duration::from_millis(30_000),
            reconnect_backoff_factor: 2.0,
            reconnect_max_attempts: Some(5),
            reconnect_jitter: 0.0,
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            require_connection_ack: true,
            latency_window: 10,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            command_channel_capacity: 64,
        }
    }
}

impl SessionConfig {
    /// Create a configuration for the given URL and transport variant.
    #[must_use]
    pub fn new(url: impl Into<String>, kind: TransportKind) -> Self {
        Self {
            url: url.into(),
            kind,
            ..Default::default()
        }
    }

    /// Configuration for a one-way event stream.
    #[must_use]
    pub fn one_way(url: impl Into<String>) -> Self {
        Self::new(url, TransportKind::OneWay)
    }

    /// Configuration for a bidirectional socket.
    #[must_use]
    pub fn bidirectional(url: impl Into<String>) -> Self {
        Self::new(url, TransportKind::Bidirectional)
    }

    /// Set additional HTTP headers.
    #[must_use]
    pub fn headers(mut self, headers: http::HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Set the bearer token.
    #[must_use]
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the initial reconnection delay.
    #[must_use]
    pub fn reconnect_initial_delay(mut self, delay: Duration) -> Self {
        self.reconnect_initial_delay = delay;
        self
    }

    /// Set the maximum reconnection delay.
    #[must_use]
    pub fn reconnect_max_delay(mut self, delay: Duration) -> Self {
        self.reconnect_max_delay = delay;
        self
    }

    /// Set the reconnection backoff factor.
    #[must_use]
    pub fn reconnect_backoff_factor(mut self, factor: f64) -> Self {
        self.reconnect_backoff_factor = factor;
        self
    }

    /// Set the maximum reconnection attempts.
    #[must_use]
    pub fn reconnect_max_attempts(mut self, attempts: Option<u32>) -> Self {
        self.reconnect_max_attempts = attempts;
        self
    }

    /// Set the reconnection jitter factor.
    #[must_use]
    pub fn reconnect_jitter(mut self, jitter: f64) -> Self {
        self.reconnect_jitter = jitter;
        self
    }

    /// Set the heartbeat interval.
    #[must_use]
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set the pong timeout.
    #[must_use]
    pub fn pong_timeout(mut self, timeout: Duration) -> Self {
        self.pong_timeout = timeout;
        self
    }

    /// Set whether to wait for `connection_ack`.
    #[must_use]
    pub fn require_connection_ack(mut self, require: bool) -> Self {
        self.require_connection_ack = require;
        self
    }

    /// Set the latency sampling window.
    #[must_use]
    pub fn latency_window(mut self, window: usize) -> Self {
        self.latency_window = window;
        self
    }

    /// Set the token coalescing interval.
    #[must_use]
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Set the command channel capacity.
    #[must_use]
    pub fn command_channel_capacity(mut self, capacity: usize) -> Self {
        self.command_channel_capacity = capacity;
        self
    }

    pub(crate) fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: self.reconnect_initial_delay,
            max_delay: self.reconnect_max_delay,
            factor: self.reconnect_backoff_factor,
            jitter: self.reconnect_jitter,
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error message string if any field has an invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("URL cannot be empty".to_string());
        }
        if self.connect_timeout.is_zero() {
            return Err("Connect timeout must be > 0".to_string());
        }
        self.backoff().validate()?;
        if self.kind == TransportKind::Bidirectional {
            if self.ping_interval.is_zero() {
                return Err("Ping interval must be > 0".to_string());
            }
            if self.pong_timeout.is_zero() {
                return Err("Pong timeout must be > 0".to_string());
            }
        }
        if self.latency_window == 0 {
            return Err("Latency window must be > 0".to_string());
        }
        if self.command_channel_capacity == 0 {
            return Err("Command channel capacity must be > 0".to_string());
        }
        Ok(())
    }
}

/// The request issued by [`TransportSession::start`](super::TransportSession::start).
///
/// One-way streams `POST` the payload (or `GET` without one); bidirectional
/// sessions send it as the first message after the acknowledgement. It is
/// re-sent on every reconnection.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamRequest {
    pub payload: Option<serde_json::Value>,
}

impl StreamRequest {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload: Some(payload),
        }
    }

    /// A request without a body.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Serialize any payload type.
    ///
    /// # Errors
    ///
    /// Returns an error if `payload` cannot be represented as JSON.
    pub fn from_serialize<T: Serialize>(payload: &T) -> StreamResult<Self> {
        Ok(Self::new(serde_json::to_value(payload)?))
    }
}
