//! Heartbeat support: probe messages and round-trip latency sampling.

use std::{
    collections::VecDeque,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Milliseconds since the unix epoch, as carried by heartbeat probes.
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Heartbeat probe sent on the bidirectional transport.
pub(crate) fn ping_message(timestamp: u64) -> String {
    serde_json::json!({ "type": "ping", "timestamp": timestamp }).to_string()
}

/// Rolling window of heartbeat round-trip times.
#[derive(Debug, Clone)]
pub struct LatencySampler {
    window: usize,
    samples: VecDeque<Duration>,
}

impl LatencySampler {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            samples: VecDeque::with_capacity(window.max(1)),
        }
    }

    pub fn record(&mut self, sample: Duration) {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Most recent sample.
    pub fn last(&self) -> Option<Duration> {
        self.samples.back().copied()
    }

    /// Mean of the samples currently in the window.
    pub fn average(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let total: Duration = self.samples.iter().sum();
        Some(total / self.samples.len() as u32)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
