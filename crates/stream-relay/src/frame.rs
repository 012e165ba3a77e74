//! Typed application events carried by the stream.
//!
//! Every message on the wire is a JSON object with a `type` discriminator.
//! [`Frame`] is a closed union over those messages so consumers can handle
//! all of them exhaustively.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Error codes produced by the transport itself (as opposed to codes relayed
/// from the backend).
pub mod error_code {
    /// A single line/message could not be decoded. Never terminal.
    pub const PARSE_ERROR: &str = "PARSE_ERROR";
    /// The connection could not be (re-)established within the retry budget.
    pub const CONNECTION_FAILED: &str = "CONNECTION_FAILED";
}

/// Token accounting reported with [`Frame::Complete`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default, alias = "inputTokens", alias = "prompt_tokens")]
    pub input_tokens: u64,
    #[serde(default, alias = "outputTokens", alias = "completion_tokens")]
    pub output_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }
}

/// One entry of an [`Frame::Insight`] event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InsightItem {
    pub text: String,
    #[serde(default)]
    pub confidence: f64,
}

/// A decoded application-level event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// The backend accepted the request and started generating.
    StreamStart {
        #[serde(alias = "sessionId")]
        session_id: String,
    },
    /// A fragment of generated text.
    Token {
        #[serde(alias = "content")]
        text: String,
        #[serde(default, alias = "isFinal")]
        is_final: bool,
    },
    Insight {
        #[serde(default)]
        items: Vec<InsightItem>,
    },
    Suggestions {
        #[serde(default)]
        items: Vec<String>,
    },
    /// Before/after pair produced by the request.
    Result { before: String, after: String },
    /// Successful end of the request.
    Complete {
        #[serde(default)]
        usage: Usage,
    },
    /// Backend or transport error.
    Error {
        code: String,
        #[serde(default)]
        message: String,
    },
    /// The bidirectional server accepted the socket.
    ConnectionAck,
    /// Liveness response. `timestamp` is the echoed probe timestamp (unix
    /// millis); `latency_ms` is filled in by the controller.
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
        #[serde(default, alias = "latencyMs", skip_serializing_if = "Option::is_none")]
        latency_ms: Option<u64>,
    },
    TypingStart,
    TypingStop,
}

/// Payload-free discriminant of a [`Frame`], mostly for logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameKind {
    StreamStart,
    Token,
    Insight,
    Suggestions,
    Result,
    Complete,
    Error,
    ConnectionAck,
    Pong,
    TypingStart,
    TypingStop,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StreamStart => "stream_start",
            Self::Token => "token",
            Self::Insight => "insight",
            Self::Suggestions => "suggestions",
            Self::Result => "result",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::ConnectionAck => "connection_ack",
            Self::Pong => "pong",
            Self::TypingStart => "typing_start",
            Self::TypingStop => "typing_stop",
        };
        f.write_str(name)
    }
}

impl Frame {
    /// Parse a single JSON message into a frame.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Create a non-final token frame.
    pub fn token(text: impl Into<String>) -> Self {
        Self::Token {
            text: text.into(),
            is_final: false,
        }
    }

    /// Create an error frame.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a `PARSE_ERROR` frame.
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::error(error_code::PARSE_ERROR, message)
    }

    /// Create a `CONNECTION_FAILED` frame.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::error(error_code::CONNECTION_FAILED, message)
    }

    pub fn kind(&self) -> FrameKind {
        match self {
            Self::StreamStart { .. } => FrameKind::StreamStart,
            Self::Token { .. } => FrameKind::Token,
            Self::Insight { .. } => FrameKind::Insight,
            Self::Suggestions { .. } => FrameKind::Suggestions,
            Self::Result { .. } => FrameKind::Result,
            Self::Complete { .. } => FrameKind::Complete,
            Self::Error { .. } => FrameKind::Error,
            Self::ConnectionAck => FrameKind::ConnectionAck,
            Self::Pong { .. } => FrameKind::Pong,
            Self::TypingStart => FrameKind::TypingStart,
            Self::TypingStop => FrameKind::TypingStop,
        }
    }

    pub fn is_token(&self) -> bool {
        matches!(self, Self::Token { .. })
    }

    /// Whether this is a `PARSE_ERROR` frame.
    pub fn is_parse_error(&self) -> bool {
        matches!(self, Self::Error { code, .. } if code == error_code::PARSE_ERROR)
    }

    /// Whether this frame ends its request generation.
    ///
    /// `Complete` always does; `Error` does unless it only reports a
    /// malformed line.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Complete { .. } => true,
            Self::Error { .. } => !self.is_parse_error(),
            _ => false,
        }
    }

    /// Frames that describe the connection rather than the generated output.
    pub fn is_transport_level(&self) -> bool {
        matches!(
            self,
            Self::ConnectionAck | Self::Pong { .. } | Self::TypingStart | Self::TypingStop
        )
    }
}
