//! Integration tests for sessions over the one-way (SSE) transport.
//!
//! Uses a mock hyper HTTP server to emit `data:` lines, verifying the full
//! connect → decode → coalesce → deliver pipeline, including reconnection.

#![cfg(feature = "sse")]

use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use http_body_util::Full;
use hyper::{
    Request, Response,
    body::{Bytes, Incoming},
    server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use stream_relay::{
    ChannelHandler, ConnectionState, Frame, SessionConfig, StreamRequest, TransportSession, Usage,
    create_session, error_code,
};
use tokio::{net::TcpListener, sync::mpsc, time::timeout};

// ---------------------------------------------------------------------------
// Mock SSE server helpers
// ---------------------------------------------------------------------------

/// What the mock server saw of one request.
#[derive(Clone, Debug)]
struct Seen {
    method: String,
    last_event_id: Option<String>,
    session_id: Option<String>,
}

type Recorded = Arc<Mutex<Vec<Seen>>>;

/// Start a mock SSE server that answers successive connections with the
/// given `(body, content_type, status)` responses.
async fn start_multi_sse_server(
    responses: Vec<(&'static str, &'static str, u16)>,
) -> (SocketAddr, Recorded) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let addr = listener.local_addr().expect("local addr");
    let responses = Arc::new(Mutex::new(responses.into_iter()));
    let recorded: Recorded = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&recorded);

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let responses = Arc::clone(&responses);
            let seen = Arc::clone(&seen);
            let io = TokioIo::new(stream);
            tokio::spawn(async move {
                let _ = http1::Builder::new()
                    .serve_connection(
                        io,
                        service_fn(move |req: Request<Incoming>| {
                            let header = |name: &str| {
                                req.headers()
                                    .get(name)
                                    .and_then(|v| v.to_str().ok())
                                    .map(str::to_owned)
                            };
                            seen.lock().expect("lock seen").push(Seen {
                                method: req.method().to_string(),
                                last_event_id: header("last-event-id"),
                                session_id: header("x-session-id"),
                            });
                            let next = responses.lock().expect("lock responses").next();
                            let (body, content_type, status) =
                                next.unwrap_or(("", "text/event-stream", 503));
                            let resp = Response::builder()
                                .status(status)
                                .header("content-type", content_type)
                                .body(Full::new(Bytes::from(body)))
                                .expect("build response");
                            async move { Ok::<_, Infallible>(resp) }
                        }),
                    )
                    .await;
            });
        }
    });

    (addr, recorded)
}

async fn start_sse_server(body: &'static str) -> (SocketAddr, Recorded) {
    start_multi_sse_server(vec![(body, "text/event-stream", 200)]).await
}

fn config(addr: SocketAddr) -> SessionConfig {
    SessionConfig::one_way(format!("http://{addr}/stream"))
        .reconnect_initial_delay(Duration::from_millis(10))
        .reconnect_max_delay(Duration::from_millis(50))
        .flush_interval(Duration::from_millis(5))
}

fn open_session(
    config: SessionConfig,
) -> (
    TransportSession<ChannelHandler>,
    mpsc::UnboundedReceiver<Frame>,
) {
    let (handler, rx) = ChannelHandler::new();
    let session = create_session("s1", config, handler).expect("session");
    (session, rx)
}

async fn collect_until_terminal(rx: &mut mpsc::UnboundedReceiver<Frame>) -> Vec<Frame> {
    let mut frames = Vec::new();
    loop {
        let frame = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timeout")
            .expect("frame");
        let done = frame.is_terminal() || matches!(frame, Frame::Token { is_final: true, .. });
        frames.push(frame);
        if done {
            return frames;
        }
    }
}

fn token_text(frames: &[Frame]) -> String {
    frames
        .iter()
        .filter_map(|f| match f {
            Frame::Token { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

async fn wait_for_state(session: &TransportSession<ChannelHandler>, state: ConnectionState) {
    let mut info = session.subscribe_info();
    timeout(Duration::from_secs(5), info.wait_for(|i| i.state == state))
        .await
        .expect("timeout")
        .expect("monitor alive");
}

// ---------------------------------------------------------------------------
// Clean stream
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_clean_stream_over_http() {
    let body = concat!(
        "data: {\"type\":\"stream_start\",\"session_id\":\"s1\"}\n\n",
        "data: {\"type\":\"token\",\"text\":\"Hel\"}\n\n",
        "data: {\"type\":\"token\",\"text\":\"lo\"}\n\n",
        "data: {\"type\":\"complete\",\"usage\":{\"input_tokens\":5,\"output_tokens\":2}}\n\n",
    );
    let (addr, seen) = start_sse_server(body).await;
    let (session, mut rx) = open_session(config(addr));

    session
        .start(StreamRequest::new(serde_json::json!({"prompt": "hi"})))
        .expect("start");
    let frames = collect_until_terminal(&mut rx).await;

    assert_eq!(
        frames.first(),
        Some(&Frame::StreamStart {
            session_id: "s1".into()
        })
    );
    assert_eq!(token_text(&frames), "Hello");
    assert_eq!(
        frames.last(),
        Some(&Frame::Complete {
            usage: Usage::new(5, 2)
        })
    );
    wait_for_state(&session, ConnectionState::Closed).await;

    let seen = seen.lock().expect("lock").clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, "POST");
    assert_eq!(seen[0].session_id.as_deref(), Some("s1"));
}

#[tokio::test]
async fn test_get_without_payload_and_done_sentinel() {
    let body = "data: {\"type\":\"token\",\"text\":\"a\"}\n\ndata: {\"type\":\"token\",\"text\":\"b\"}\n\ndata: [DONE]\n\n";
    let (addr, seen) = start_sse_server(body).await;
    let (session, mut rx) = open_session(config(addr));

    session.start(StreamRequest::empty()).expect("start");
    let frames = collect_until_terminal(&mut rx).await;

    assert_eq!(token_text(&frames), "ab");
    assert!(matches!(
        frames.last(),
        Some(Frame::Token { is_final: true, .. })
    ));
    wait_for_state(&session, ConnectionState::Closed).await;
    assert_eq!(seen.lock().expect("lock")[0].method, "GET");
}

// ---------------------------------------------------------------------------
// Reconnection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_reconnect_after_drop_does_not_duplicate() {
    let (addr, seen) = start_multi_sse_server(vec![
        (
            "data: {\"type\":\"token\",\"text\":\"Hel\"}\n\ndata: {\"type\":\"token\",\"text\":\"lo\"}\n\n",
            "text/event-stream",
            200,
        ),
        (
            concat!(
                "data: {\"type\":\"token\",\"text\":\"Hel\"}\n\n",
                "data: {\"type\":\"token\",\"text\":\"lo\"}\n\n",
                "data: {\"type\":\"token\",\"text\":\" wor\"}\n\n",
                "data: {\"type\":\"token\",\"text\":\"ld\"}\n\n",
                "data: {\"type\":\"complete\"}\n\n",
            ),
            "text/event-stream",
            200,
        ),
    ])
    .await;
    let (session, mut rx) = open_session(config(addr));

    session.start(StreamRequest::empty()).expect("start");
    let frames = collect_until_terminal(&mut rx).await;

    assert_eq!(token_text(&frames), "Hello world");
    assert_eq!(seen.lock().expect("lock").len(), 2);
}

#[tokio::test]
async fn test_reconnect_sends_last_event_id() {
    let (addr, seen) = start_multi_sse_server(vec![
        (
            "id: 1\ndata: {\"type\":\"token\",\"text\":\"Hel\"}\n\nid: 2\ndata: {\"type\":\"token\",\"text\":\"lo\"}\n\n",
            "text/event-stream",
            200,
        ),
        (
            "id: 3\ndata: {\"type\":\"token\",\"text\":\"!\"}\n\ndata: {\"type\":\"complete\"}\n\n",
            "text/event-stream",
            200,
        ),
    ])
    .await;
    let (session, mut rx) = open_session(config(addr));

    session.start(StreamRequest::empty()).expect("start");
    let frames = collect_until_terminal(&mut rx).await;

    assert_eq!(token_text(&frames), "Hello!");
    let seen = seen.lock().expect("lock").clone();
    assert_eq!(seen[0].last_event_id, None);
    assert_eq!(seen[1].last_event_id.as_deref(), Some("2"));
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_client_error_status_fails_immediately() {
    let (addr, seen) = start_multi_sse_server(vec![("", "text/event-stream", 403)]).await;
    let (session, mut rx) = open_session(config(addr));

    session.start(StreamRequest::empty()).expect("start");
    let frames = collect_until_terminal(&mut rx).await;

    assert!(matches!(
        frames.as_slice(),
        [Frame::Error { code, .. }] if code == error_code::CONNECTION_FAILED
    ));
    assert_eq!(session.connection_info().state, ConnectionState::Failed);
    assert_eq!(seen.lock().expect("lock").len(), 1);
}

#[tokio::test]
async fn test_invalid_content_type_fails() {
    let (addr, _seen) =
        start_multi_sse_server(vec![("data: test\n\n", "application/json", 200)]).await;
    let (session, mut rx) = open_session(config(addr));

    session.start(StreamRequest::empty()).expect("start");
    let frames = collect_until_terminal(&mut rx).await;

    match frames.as_slice() {
        [Frame::Error { code, message }] => {
            assert_eq!(code, error_code::CONNECTION_FAILED);
            assert!(message.contains("application/json"), "message {message}");
        }
        other => panic!("unexpected frames {other:?}"),
    }
}

#[tokio::test]
async fn test_server_errors_exhaust_retry_budget() {
    // Every response is a 503.
    let (addr, seen) = start_multi_sse_server(Vec::new()).await;
    let (session, mut rx) = open_session(config(addr).reconnect_max_attempts(Some(2)));

    session.start(StreamRequest::empty()).expect("start");
    let frames = collect_until_terminal(&mut rx).await;

    assert!(matches!(
        frames.as_slice(),
        [Frame::Error { code, .. }] if code == error_code::CONNECTION_FAILED
    ));
    assert_eq!(session.connection_info().state, ConnectionState::Failed);
    assert_eq!(seen.lock().expect("lock").len(), 3);
}

#[tokio::test]
async fn test_parse_error_is_reported_and_stream_continues() {
    let body = "data: {broken\n\ndata: {\"type\":\"token\",\"text\":\"ok\"}\n\ndata: {\"type\":\"complete\"}\n\n";
    let (addr, _seen) = start_sse_server(body).await;
    let (session, mut rx) = open_session(config(addr));

    session.start(StreamRequest::empty()).expect("start");
    let frames = collect_until_terminal(&mut rx).await;

    assert!(frames[0].is_parse_error());
    assert_eq!(token_text(&frames), "ok");
    assert!(matches!(frames.last(), Some(Frame::Complete { .. })));
}
