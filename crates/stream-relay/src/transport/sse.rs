//! One-way transport: a streaming HTTP response of `data:` lines.

use std::{pin::Pin, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream};
use http::{HeaderValue, header};
use tracing::debug;

use super::{ConnectTarget, Connection, Connector, Inbound, TransportKind};
use crate::{
    error::{StreamError, StreamResult},
    session::SessionConfig,
};

const EVENT_STREAM: &str = "text/event-stream";

/// Opens server-sent event streams with `reqwest`.
///
/// Every attempt re-sends the request: `POST` with the JSON payload, or `GET`
/// when the request has none. After a drop, the last event id seen is sent
/// back as `Last-Event-ID`.
#[derive(Clone, Debug)]
pub struct SseConnector {
    client: reqwest::Client,
    config: Arc<SessionConfig>,
}

impl SseConnector {
    /// Create a connector with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: Arc<SessionConfig>) -> StreamResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| StreamError::config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Create a connector that shares an existing HTTP client.
    pub fn with_client(client: reqwest::Client, config: Arc<SessionConfig>) -> Self {
        Self { client, config }
    }

    fn request_headers(&self, target: &ConnectTarget<'_>) -> http::HeaderMap {
        let mut headers = self.config.headers.clone();
        headers.insert(header::ACCEPT, HeaderValue::from_static(EVENT_STREAM));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        if let Ok(value) = HeaderValue::from_str(target.session_id) {
            headers.insert(header::HeaderName::from_static("x-session-id"), value);
        }

        // Last-Event-ID for resumption.
        if let Some(id) = target.last_event_id
            && let Ok(value) = HeaderValue::from_str(id)
        {
            headers.insert(header::HeaderName::from_static("last-event-id"), value);
        }

        if let Some(token) = &self.config.bearer_token
            && let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}"))
        {
            headers.insert(header::AUTHORIZATION, value);
        }
        headers
    }
}

#[async_trait]
impl Connector for SseConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::OneWay
    }

    async fn connect(&self, target: &ConnectTarget<'_>) -> StreamResult<Box<dyn Connection>> {
        let headers = self.request_headers(target);
        let req = match &target.request.payload {
            Some(payload) => self.client.post(&self.config.url).json(payload),
            None => self.client.get(&self.config.url),
        };

        let resp = req.headers(headers).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(StreamError::invalid_status(status));
        }

        if let Some(ct) = resp.headers().get(header::CONTENT_TYPE) {
            let ct_str = ct.to_str().unwrap_or("");
            if !ct_str.contains(EVENT_STREAM) {
                return Err(StreamError::invalid_content_type(ct_str));
            }
        }

        debug!(
            url = %self.config.url,
            session_id = %target.session_id,
            attempt = target.attempt,
            "Event stream response received"
        );
        Ok(Box::new(SseConnection {
            body: Box::pin(resp.bytes_stream()),
        }))
    }
}

type BodyStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

struct SseConnection {
    body: BodyStream,
}

#[async_trait]
impl Connection for SseConnection {
    async fn recv(&mut self) -> Option<StreamResult<Inbound>> {
        self.body
            .next()
            .await
            .map(|chunk| chunk.map(Inbound::Chunk).map_err(StreamError::from))
    }

    async fn send(&mut self, _message: String) -> StreamResult<()> {
        Err(StreamError::Unsupported {
            operation: "send on a one-way stream",
        })
    }

    async fn close(&mut self) {
        // Dropping the body releases the HTTP connection.
        self.body = Box::pin(stream::empty());
    }
}
