//! Duplicate suppression for output replayed after a reconnect.

use tracing::debug;

use crate::frame::{Frame, FrameKind};

/// Tracks what a generation has delivered, so a reconnect does not deliver
/// the same content twice.
///
/// A stream that carries event ids is resumed with `Last-Event-ID` and
/// nothing is skipped. Otherwise the backend replays the generation from the
/// start, and the new connection's frames are dropped while they line up
/// with what was already delivered.
///
/// Skipping stops at the first frame whose kind differs from the delivered
/// one at the same position, and at any terminal frame: a delivered prefix
/// never contains one.
#[derive(Debug, Default)]
pub(crate) struct ReplayGuard {
    delivered: Vec<FrameKind>,
    cursor: usize,
    replaying: bool,
}

impl ReplayGuard {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Prepare for a new connection of the same generation.
    pub(crate) fn begin_connection(&mut self, resumable: bool) {
        self.cursor = 0;
        self.replaying = !resumable && !self.delivered.is_empty();
        if self.replaying {
            debug!(skip = self.delivered.len(), "Suppressing replayed frames");
        }
    }

    /// Whether `frame` should be delivered.
    pub(crate) fn admit(&mut self, frame: &Frame) -> bool {
        if frame.is_transport_level() {
            return true;
        }
        if self.replaying {
            match self.delivered.get(self.cursor) {
                Some(&kind) if kind == frame.kind() && !frame.is_terminal() => {
                    self.cursor += 1;
                    return false;
                }
                Some(&kind) => {
                    debug!(
                        expected = %kind,
                        received = %frame.kind(),
                        position = self.cursor,
                        "Replay diverged, delivering"
                    );
                    self.replaying = false;
                }
                None => self.replaying = false,
            }
        }
        self.delivered.push(frame.kind());
        true
    }

    /// Content frames delivered so far in this generation.
    pub(crate) fn admitted(&self) -> usize {
        self.delivered.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_connection_admits_everything() {
        let mut guard = ReplayGuard::new();
        guard.begin_connection(false);
        assert!(guard.admit(&Frame::token("a")));
        assert!(guard.admit(&Frame::token("b")));
        assert_eq!(guard.admitted(), 2);
    }

    #[test]
    fn test_replayed_prefix_is_skipped() {
        let mut guard = ReplayGuard::new();
        guard.begin_connection(false);
        for text in ["Hel", "lo"] {
            assert!(guard.admit(&Frame::token(text)));
        }

        guard.begin_connection(false);
        let delivered: Vec<bool> = ["Hel", "lo", " wor", "ld"]
            .into_iter()
            .map(|text| guard.admit(&Frame::token(text)))
            .collect();
        assert_eq!(delivered, vec![false, false, true, true]);
        assert_eq!(guard.admitted(), 4);
    }

    #[test]
    fn test_transport_frames_do_not_count() {
        let mut guard = ReplayGuard::new();
        guard.begin_connection(false);
        assert!(guard.admit(&Frame::ConnectionAck));
        assert!(guard.admit(&Frame::token("a")));

        guard.begin_connection(false);
        assert!(guard.admit(&Frame::ConnectionAck));
        assert!(guard.admit(&Frame::TypingStart));
        assert!(!guard.admit(&Frame::token("a")));
        assert!(guard.admit(&Frame::token("b")));
    }

    #[test]
    fn test_resumable_stream_skips_nothing() {
        let mut guard = ReplayGuard::new();
        guard.begin_connection(false);
        assert!(guard.admit(&Frame::token("a")));

        guard.begin_connection(true);
        assert!(guard.admit(&Frame::token("b")));
        assert_eq!(guard.admitted(), 2);
    }

    #[test]
    fn test_terminal_frame_ends_skipping() {
        let mut guard = ReplayGuard::new();
        guard.begin_connection(false);
        assert!(guard.admit(&Frame::StreamStart {
            session_id: "s1".to_string(),
        }));
        assert!(guard.admit(&Frame::token("Hel")));
        assert!(guard.admit(&Frame::token("lo")));

        guard.begin_connection(false);
        assert!(guard.admit(&Frame::Error {
            code: "SESSION_EXPIRED".to_string(),
            message: String::new(),
        }));
        assert_eq!(guard.admitted(), 4);
    }

    #[test]
    fn test_diverging_kind_ends_skipping() {
        let mut guard = ReplayGuard::new();
        guard.begin_connection(false);
        assert!(guard.admit(&Frame::StreamStart {
            session_id: "s1".to_string(),
        }));
        assert!(guard.admit(&Frame::token("a")));

        guard.begin_connection(false);
        assert!(!guard.admit(&Frame::StreamStart {
            session_id: "s1".to_string(),
        }));
        assert!(guard.admit(&Frame::Suggestions {
            items: vec!["x".to_string()],
        }));
        assert!(guard.admit(&Frame::token("b")));
        assert_eq!(guard.admitted(), 4);
    }
}
