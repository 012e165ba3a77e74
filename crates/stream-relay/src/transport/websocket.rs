//! Bidirectional transport: a session-scoped WebSocket carrying JSON messages.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::{net::TcpStream, time::timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

use super::{ConnectTarget, Connection, Connector, Inbound, TransportKind};
use crate::{
    error::{StreamError, StreamResult},
    session::SessionConfig,
};

/// Placeholder in [`SessionConfig::url`] replaced by the session id.
pub const SESSION_PLACEHOLDER: &str = "{session_id}";

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Opens WebSocket connections with `tokio-tungstenite`.
#[derive(Clone, Debug)]
pub struct WsConnector {
    config: Arc<SessionConfig>,
}

impl WsConnector {
    pub fn new(config: Arc<SessionConfig>) -> Self {
        Self { config }
    }
}

/// Build the socket URL for `session_id`.
///
/// A `{session_id}` placeholder in the configured URL is substituted;
/// otherwise the id is appended as the last path segment. A configured bearer
/// token travels as the `token` query parameter.
///
/// # Errors
///
/// Returns a configuration error if the resulting URL does not parse.
pub fn session_url(config: &SessionConfig, session_id: &str) -> StreamResult<Url> {
    let invalid = |e: url::ParseError| StreamError::config(format!("Invalid WebSocket URL: {e}"));

    let mut url = if config.url.contains(SESSION_PLACEHOLDER) {
        let encoded: String = url::form_urlencoded::byte_serialize(session_id.as_bytes()).collect();
        Url::parse(&config.url.replace(SESSION_PLACEHOLDER, &encoded)).map_err(invalid)?
    } else {
        let mut url = Url::parse(&config.url).map_err(invalid)?;
        url.path_segments_mut()
            .map_err(|()| StreamError::config("WebSocket URL cannot carry a path"))?
            .pop_if_empty()
            .push(session_id);
        url
    };

    if let Some(token) = &config.bearer_token {
        url.query_pairs_mut().append_pair("token", token);
    }
    Ok(url)
}

#[async_trait]
impl Connector for WsConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::Bidirectional
    }

    async fn connect(&self, target: &ConnectTarget<'_>) -> StreamResult<Box<dyn Connection>> {
        let url = session_url(&self.config, target.session_id)?;
        let (stream, response) = connect_async(url.as_str()).await?;
        debug!(
            session_id = %target.session_id,
            attempt = target.attempt,
            status = %response.status(),
            "WebSocket handshake complete"
        );
        Ok(Box::new(WsConnection { stream }))
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn recv(&mut self) -> Option<StreamResult<Inbound>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Inbound::Message(text))),
                Ok(Message::Binary(data)) => {
                    return Some(Ok(match String::from_utf8(data) {
                        Ok(text) => Inbound::Message(text),
                        Err(err) => {
                            warn!(error = %err, "Binary WebSocket message is not UTF-8");
                            Inbound::Malformed(format!("invalid UTF-8 in binary message: {err}"))
                        }
                    }));
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "WebSocket closed by peer");
                    return None;
                }
                // Protocol pings are answered by tungstenite itself.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(err) => return Some(Err(err.into())),
            }
        }
    }

    async fn send(&mut self, message: String) -> StreamResult<()> {
        self.stream.send(Message::Text(message)).await?;
        Ok(())
    }

    async fn close(&mut self) {
        let _ = timeout(CLOSE_TIMEOUT, self.stream.close(None)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_url_appends_segment() {
        let config = SessionConfig::bidirectional("ws://localhost:8080/ws/");
        let url = session_url(&config, "abc 1").expect("url");
        assert_eq!(url.as_str(), "ws://localhost:8080/ws/abc%201");
    }

    #[test]
    fn test_session_url_placeholder_and_token() {
        let config =
            SessionConfig::bidirectional("wss://api.example.com/sessions/{session_id}/stream")
                .bearer_token("t0k");
        let url = session_url(&config, "s1").expect("url");
        assert_eq!(
            url.as_str(),
            "wss://api.example.com/sessions/s1/stream?token=t0k"
        );
    }

    #[test]
    fn test_session_url_rejects_garbage() {
        let config = SessionConfig::bidirectional("not a url");
        assert!(matches!(
            session_url(&config, "s1"),
            Err(StreamError::Config { .. })
        ));
    }
}
