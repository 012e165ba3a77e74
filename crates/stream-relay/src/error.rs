//! Error handling for the streaming transport.

use std::time::Duration;

use thiserror::Error;

use crate::controller::ConnectionState;

/// The main result type used throughout the streaming transport.
pub type StreamResult<T> = Result<T, StreamError>;

/// Error type for all transport operations.
///
/// These never reach a [`FrameHandler`](crate::session::FrameHandler) as Rust
/// errors; fatal conditions are reported to callers as
/// [`Frame::Error`](crate::frame::Frame::Error).
#[derive(Error, Debug)]
pub enum StreamError {
    /// HTTP request errors from the one-way transport.
    #[cfg(feature = "sse")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket errors from the bidirectional transport.
    #[error("WebSocket error: {message}")]
    WebSocket { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Timeout errors
    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// The underlying connection ended before a terminal frame.
    #[error("Connection closed: {}", reason.as_deref().unwrap_or("no reason"))]
    ConnectionClosed { reason: Option<String> },

    /// The stream endpoint answered with a non-success status.
    #[error("Invalid stream response status: {status}")]
    InvalidStatus { status: http::StatusCode },

    /// The stream endpoint answered with something other than an event stream.
    #[error("Invalid stream content type: {content_type}")]
    InvalidContentType { content_type: String },

    /// `send()` was called while the connection is not open.
    #[error("Connection is not open (state: {state})")]
    NotOpen { state: ConnectionState },

    /// The operation is not supported by this transport variant.
    #[error("Unsupported operation: {operation}")]
    Unsupported { operation: &'static str },

    /// No liveness frame arrived in time.
    #[error("No pong received within {timeout:?}")]
    PongTimeout { timeout: Duration },

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

#[cfg(feature = "websocket")]
impl From<tokio_tungstenite::tungstenite::Error> for StreamError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket {
            message: e.to_string(),
        }
    }
}

impl StreamError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a WebSocket error.
    pub fn websocket(message: impl Into<String>) -> Self {
        Self::WebSocket {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Create a connection-closed error.
    pub fn connection_closed(reason: Option<String>) -> Self {
        Self::ConnectionClosed { reason }
    }

    /// Create an invalid-status error.
    pub fn invalid_status(status: http::StatusCode) -> Self {
        Self::InvalidStatus { status }
    }

    /// Create an invalid-content-type error.
    pub fn invalid_content_type(content_type: impl Into<String>) -> Self {
        Self::InvalidContentType {
            content_type: content_type.into(),
        }
    }

    /// Whether a connection failing with this error is worth retrying.
    ///
    /// Client errors (4xx other than 408/429), configuration problems and
    /// unsupported operations are permanent; everything else is treated as a
    /// transient network condition.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Config { .. } | Self::Unsupported { .. } | Self::NotOpen { .. } => false,
            Self::InvalidContentType { .. } => false,
            Self::InvalidStatus { status } => {
                status.is_server_error()
                    || *status == http::StatusCode::REQUEST_TIMEOUT
                    || *status == http::StatusCode::TOO_MANY_REQUESTS
            }
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = StreamError::config("Invalid URL");
        assert!(matches!(err, StreamError::Config { .. }));

        let err = StreamError::timeout(Duration::from_secs(5));
        assert!(matches!(err, StreamError::Timeout { .. }));

        let err = StreamError::connection_closed(None);
        assert_eq!(err.to_string(), "Connection closed: no reason");
    }

    #[test]
    fn test_retry_classification() {
        assert!(StreamError::connection_closed(Some("reset".into())).is_retryable());
        assert!(StreamError::timeout(Duration::from_secs(1)).is_retryable());
        assert!(StreamError::invalid_status(http::StatusCode::BAD_GATEWAY).is_retryable());
        assert!(StreamError::invalid_status(http::StatusCode::TOO_MANY_REQUESTS).is_retryable());

        assert!(!StreamError::invalid_status(http::StatusCode::UNAUTHORIZED).is_retryable());
        assert!(!StreamError::invalid_content_type("text/html").is_retryable());
        assert!(!StreamError::config("bad").is_retryable());
    }
}
