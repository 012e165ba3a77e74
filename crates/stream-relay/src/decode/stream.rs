//! [`Stream`] that converts a stream of byte chunks into [`Frame`]s.

use std::{
    collections::VecDeque,
    pin::Pin,
    task::{Context, Poll, ready},
};

use futures_util::Stream;

use super::decoder::FrameDecoder;
use crate::frame::Frame;

pin_project_lite::pin_project! {
    /// A [`Stream`] of decoded [`Frame`]s over an underlying stream of byte
    /// chunks (for example an HTTP response body).
    ///
    /// Ends after the end-of-stream line, or when the inner stream ends and
    /// any trailing partial line has been decoded. Errors from the inner
    /// stream are passed through and do not end the stream.
    #[derive(Debug)]
    pub struct FrameStream<S> {
        #[pin]
        stream: S,
        decoder: FrameDecoder,
        ready: VecDeque<Frame>,
        done: bool,
    }
}

impl<S> FrameStream<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            decoder: FrameDecoder::new(),
            ready: VecDeque::new(),
            done: false,
        }
    }

    /// The decoder driving this stream.
    pub fn decoder(&self) -> &FrameDecoder {
        &self.decoder
    }
}

impl<S, B, E> Stream for FrameStream<S>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    type Item = Result<Frame, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(frame) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(frame)));
            }
            if *this.done || this.decoder.is_terminated() {
                *this.done = true;
                return Poll::Ready(None);
            }

            match ready!(this.stream.as_mut().poll_next(cx)) {
                Some(Ok(chunk)) => this.ready.extend(this.decoder.push(chunk.as_ref())),
                Some(Err(err)) => return Poll::Ready(Some(Err(err))),
                None => {
                    this.ready.extend(this.decoder.finish());
                    *this.done = true;
                    if this.ready.is_empty() {
                        return Poll::Ready(None);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{StreamExt, stream};

    use super::*;

    #[tokio::test]
    async fn test_frame_stream_decodes_chunks() {
        let chunks: Vec<Result<&[u8], ()>> = vec![
            Ok(b"data: {\"type\":\"token\",\"te"),
            Ok(b"xt\":\"Hi\"}\ndata: {\"type\":\"typing_"),
            Ok(b"stop\"}"),
        ];
        let frames: Vec<_> = FrameStream::new(stream::iter(chunks))
            .map(|f| f.expect("frame"))
            .collect()
            .await;
        assert_eq!(frames, vec![Frame::token("Hi"), Frame::TypingStop]);
    }

    #[tokio::test]
    async fn test_frame_stream_stops_at_sentinel() {
        let chunks: Vec<Result<&[u8], ()>> = vec![
            Ok(b"data: [DONE]\n"),
            Ok(b"data: {\"type\":\"token\",\"text\":\"late\"}\n"),
        ];
        let frames: Vec<_> = FrameStream::new(stream::iter(chunks))
            .map(|f| f.expect("frame"))
            .collect()
            .await;
        assert_eq!(
            frames,
            vec![Frame::Token {
                text: String::new(),
                is_final: true
            }]
        );
    }

    #[tokio::test]
    async fn test_frame_stream_passes_errors_through() {
        let chunks: Vec<Result<&[u8], &str>> =
            vec![Err("reset"), Ok(b"data: {\"type\":\"connection_ack\"}\n")];
        let items: Vec<_> = FrameStream::new(stream::iter(chunks)).collect().await;
        assert_eq!(items, vec![Err("reset"), Ok(Frame::ConnectionAck)]);
    }
}
