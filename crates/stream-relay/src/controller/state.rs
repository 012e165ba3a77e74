//! Connection state machine and the observable connection info.

use std::{fmt, time::Duration};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{cancel::Generation, reconnect::PendingRetry};

/// Lifecycle of the connection serving the current request generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No request started yet.
    #[default]
    Idle,
    /// Establishing the underlying connection.
    Connecting,
    /// Connected and delivering frames.
    Open,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
    /// Finished, stopped or cancelled. Will not reconnect.
    Closed,
    /// Retry budget exhausted or a permanent error. Needs a new `start()`.
    Failed,
}

impl ConnectionState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::*;

        match (self, next) {
            // Cancellation wins from anywhere.
            (_, Closed) => true,
            (Idle, Connecting) => true,
            (Connecting, Open | Reconnecting | Failed) => true,
            (Open, Reconnecting | Failed) => true,
            (Reconnecting, Connecting | Failed) => true,
            _ => false,
        }
    }

    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Whether no further transitions (other than to `Closed`) will happen.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Connecting => "Connecting",
            Self::Open => "Open",
            Self::Reconnecting => "Reconnecting",
            Self::Closed => "Closed",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Read-only snapshot of a session's connection.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionInfo {
    /// Generation the state belongs to.
    pub generation: Generation,
    pub state: ConnectionState,
    /// Most recent heartbeat round trip.
    pub latency: Option<Duration>,
    /// Rolling average over the sampling window.
    pub average_latency: Option<Duration>,
    /// Set while `Reconnecting`.
    pub pending_retry: Option<PendingRetry>,
}

/// Single writer of [`ConnectionInfo`].
///
/// Updates are tagged with the generation that produced them; updates from a
/// superseded generation are ignored.
#[derive(Debug)]
pub(crate) struct StateMonitor {
    tx: watch::Sender<ConnectionInfo>,
}

impl Default for StateMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMonitor {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionInfo::default());
        Self { tx }
    }

    pub(crate) fn snapshot(&self) -> ConnectionInfo {
        self.tx.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionInfo> {
        self.tx.subscribe()
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.tx.borrow().state
    }

    /// Reset for a new generation and move it to `Connecting`.
    pub(crate) fn begin(&self, generation: Generation) {
        self.tx.send_modify(|info| {
            let latency = info.latency;
            let average_latency = info.average_latency;
            *info = ConnectionInfo {
                generation,
                state: ConnectionState::Connecting,
                latency,
                average_latency,
                pending_retry: None,
            };
        });
        debug!(%generation, "Connection state Idle -> Connecting");
    }

    /// Apply a transition for `generation`. Returns whether it took effect.
    pub(crate) fn transition(&self, generation: Generation, next: ConnectionState) -> bool {
        self.tx.send_if_modified(|info| {
            if info.generation != generation || info.state == next {
                return false;
            }
            let current = info.state;
            if !current.can_transition_to(next) {
                // A stopped generation can still race its own driver.
                if !current.is_terminal() {
                    warn!(%generation, from = %current, to = %next, "Rejected connection state transition");
                    debug_assert!(false, "invalid transition {current} -> {next}");
                }
                return false;
            }
            debug!(%generation, from = %current, to = %next, "Connection state transition");
            info.state = next;
            if next != ConnectionState::Reconnecting {
                info.pending_retry = None;
            }
            true
        })
    }

    pub(crate) fn set_pending_retry(&self, generation: Generation, retry: PendingRetry) {
        self.tx.send_if_modified(|info| {
            if info.generation != generation {
                return false;
            }
            info.pending_retry = Some(retry);
            true
        });
    }

    pub(crate) fn record_latency(
        &self,
        generation: Generation,
        latency: Duration,
        average: Option<Duration>,
    ) {
        self.tx.send_if_modified(|info| {
            if info.generation != generation {
                return false;
            }
            info.latency = Some(latency);
            info.average_latency = average;
            true
        });
    }
}
