//! Frame-rate bounded batching of token frames.
//!
//! [`TokenCoalescer`] is a pure state machine: the caller hands it the
//! current time and asks for the next flush deadline, so flush cadence can be
//! driven by any timer (the session driver uses `tokio::time::sleep_until`)
//! and tested without wall-clock delays.

use std::time::Duration;

use tokio::time::Instant;

use crate::frame::Frame;

/// Default rendering interval (~60 fps).
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(16);

/// Batches consecutive [`Frame::Token`]s into at most one flush per interval.
///
/// Non-token frames flush the pending text first and are then passed
/// through, so a structural frame never overtakes text that arrived before
/// it. The concatenation of all emitted token text equals the concatenation
/// of all input fragments.
#[derive(Debug)]
pub struct TokenCoalescer {
    interval: Duration,
    buffer: String,
    deadline: Option<Instant>,
}

impl Default for TokenCoalescer {
    fn default() -> Self {
        Self::new(DEFAULT_FLUSH_INTERVAL)
    }
}

impl TokenCoalescer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            buffer: String::new(),
            deadline: None,
        }
    }

    /// Accept a frame and return whatever must be delivered right now.
    pub fn push(&mut self, frame: Frame, now: Instant) -> Vec<Frame> {
        match frame {
            Frame::Token {
                text,
                is_final: false,
            } => {
                self.buffer.push_str(&text);
                if self.interval.is_zero() {
                    return self.flush().into_iter().collect();
                }
                if self.deadline.is_none() && !self.buffer.is_empty() {
                    self.deadline = Some(now + self.interval);
                }
                Vec::new()
            }
            Frame::Token {
                text,
                is_final: true,
            } => {
                self.buffer.push_str(&text);
                self.deadline = None;
                vec![Frame::Token {
                    text: std::mem::take(&mut self.buffer),
                    is_final: true,
                }]
            }
            other => {
                let mut out: Vec<Frame> = self.flush().into_iter().collect();
                out.push(other);
                out
            }
        }
    }

    /// When the pending buffer is due, if anything is pending.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Flush if the deadline has passed.
    pub fn poll_flush(&mut self, now: Instant) -> Option<Frame> {
        match self.deadline {
            Some(deadline) if deadline <= now => self.flush(),
            _ => None,
        }
    }

    /// Emit the pending text as one token, regardless of the deadline.
    pub fn flush(&mut self) -> Option<Frame> {
        self.deadline = None;
        if self.buffer.is_empty() {
            return None;
        }
        Some(Frame::token(std::mem::take(&mut self.buffer)))
    }

    /// Discard pending text without emitting it.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.deadline = None;
    }

    /// Bytes of token text waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}
