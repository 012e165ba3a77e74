//! Line-oriented frame decoder.

use bytes::{Buf, BytesMut};
use tracing::debug;

use super::constants::{BOM, CR, DATA_FIELD, DONE_SENTINEL, ID_FIELD, IGNORED_FIELDS, LF};
use crate::frame::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    /// No line decoded on the current connection yet (BOM still possible).
    NotStarted,
    Started,
    /// The end-of-stream line was seen; further input is discarded.
    Terminated,
}

/// Converts raw stream input into ordered [`Frame`]s.
///
/// Byte input is buffered until a full line is available, so multi-byte
/// characters and JSON payloads split across chunks decode correctly. A
/// malformed line yields a `PARSE_ERROR` frame and decoding carries on with
/// the next line.
///
/// The decoder holds no knowledge of sessions or reconnection; it only
/// remembers the last `id:` seen so a reconnect can ask to resume after it.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    state: DecoderState,
    last_event_id: Option<String>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            state: DecoderState::NotStarted,
            last_event_id: None,
        }
    }

    /// Feed a chunk of line-delimited stream data.
    ///
    /// Returns every frame completed by this chunk, in input order. A trailing
    /// partial line stays buffered for the next call.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        if self.is_terminated() {
            return frames;
        }

        self.buffer.extend_from_slice(chunk);
        while let Some(line) = self.next_line(false) {
            self.decode_line(&line, &mut frames);
            if self.is_terminated() {
                break;
            }
        }
        frames
    }

    /// Feed one complete message from a message-framed transport.
    ///
    /// The whole message is a single JSON frame; there is no line grammar.
    pub fn push_message(&mut self, message: &str) -> Vec<Frame> {
        if self.is_terminated() {
            return Vec::new();
        }
        self.state = DecoderState::Started;

        let message = message.trim();
        if message.is_empty() {
            return Vec::new();
        }
        vec![decode_payload(message)]
    }

    /// Report a message that could not be read at all.
    pub fn push_malformed(&mut self, reason: impl Into<String>) -> Vec<Frame> {
        if self.is_terminated() {
            return Vec::new();
        }
        self.state = DecoderState::Started;
        vec![Frame::parse_error(reason)]
    }

    /// Decode whatever is left in the buffer once the input has ended.
    ///
    /// A final line without its newline is still a well-formed frame.
    pub fn finish(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while !self.is_terminated() {
            let Some(line) = self.next_line(true) else {
                break;
            };
            self.decode_line(&line, &mut frames);
        }
        self.buffer.clear();
        frames
    }

    /// Drop partial input from a dead connection before decoding a new one.
    ///
    /// The last event id survives so the new connection can resume.
    pub fn reset_connection(&mut self) {
        self.buffer.clear();
        if !self.is_terminated() {
            self.state = DecoderState::NotStarted;
        }
    }

    /// Whether the end-of-stream line has been decoded.
    pub fn is_terminated(&self) -> bool {
        self.state == DecoderState::Terminated
    }

    /// The most recent event id seen on the stream, if any.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Whether bytes of an incomplete line are waiting for more input.
    pub fn has_partial_line(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Split the next line off the buffer, without its terminator.
    ///
    /// Accepts LF, CRLF and bare CR endings. A CR at the very end of the
    /// buffer is held back (it may be the first half of a CRLF) unless the
    /// input has ended.
    fn next_line(&mut self, at_eof: bool) -> Option<BytesMut> {
        match memchr::memchr2(LF, CR, &self.buffer) {
            Some(pos) => {
                let terminator_len = if self.buffer[pos] == CR {
                    match self.buffer.get(pos + 1) {
                        Some(&LF) => 2,
                        Some(_) => 1,
                        None if at_eof => 1,
                        None => return None,
                    }
                } else {
                    1
                };
                let line = self.buffer.split_to(pos);
                self.buffer.advance(terminator_len);
                Some(line)
            }
            None if at_eof && !self.buffer.is_empty() => Some(self.buffer.split()),
            None => None,
        }
    }

    fn decode_line(&mut self, line: &[u8], out: &mut Vec<Frame>) {
        let mut line = line;
        if self.state == DecoderState::NotStarted {
            self.state = DecoderState::Started;
            if let Some(rest) = line.strip_prefix(BOM) {
                line = rest;
            }
        }
        if line.is_empty() {
            return;
        }

        let Ok(line) = std::str::from_utf8(line) else {
            out.push(Frame::parse_error("stream line is not valid UTF-8"));
            return;
        };

        // Comment / keep-alive
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            DATA_FIELD if value == DONE_SENTINEL => {
                self.state = DecoderState::Terminated;
                self.buffer.clear();
                out.push(Frame::Token {
                    text: String::new(),
                    is_final: true,
                });
            }
            DATA_FIELD => out.push(decode_payload(value)),
            ID_FIELD => {
                if !value.contains('\0') {
                    self.last_event_id = (!value.is_empty()).then(|| value.to_string());
                }
            }
            f if IGNORED_FIELDS.contains(&f) => {}
            other => {
                debug!(field = %other, "Ignoring unknown stream field");
            }
        }
    }
}

fn decode_payload(payload: &str) -> Frame {
    match Frame::from_json(payload) {
        Ok(frame) => frame,
        Err(err) => {
            debug!(error = %err, "Malformed frame payload");
            Frame::parse_error(format!("malformed frame: {err}"))
        }
    }
}
