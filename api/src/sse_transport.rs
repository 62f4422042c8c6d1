//! Adapts `SseWriter`'s `SseSink` to a `hyper::Body`, the same "channel
//! feeding a wrapped stream" shape the teacher uses for ndjson responses
//! (`events::http::ndjson::reply`), but framed as `text/event-stream`
//! instead of newline-delimited JSON.

use async_trait::async_trait;
use bytes::Bytes;
use search_core::{
    error::SearchError,
    sse::{SseFrame, SseSink},
};
use tokio_stream::wrappers::ReceiverStream;

fn frame_name(frame: &SseFrame) -> &'static str {
    match frame {
        SseFrame::Event { .. } => "event",
        SseFrame::Message { .. } => "message",
        SseFrame::StreamInfo { .. } => "stream_info",
        SseFrame::KeepAlive { .. } => "keep_alive",
        SseFrame::Error { .. } => "error",
        SseFrame::Close { .. } => "close",
    }
}

fn frame_id(frame: &SseFrame) -> u64 {
    match frame {
        SseFrame::Event { id, .. }
        | SseFrame::Message { id, .. }
        | SseFrame::StreamInfo { id, .. }
        | SseFrame::KeepAlive { id, .. }
        | SseFrame::Error { id, .. }
        | SseFrame::Close { id } => *id,
    }
}

/// Formats one frame as a `text/event-stream` record: an `id:` line, an
/// `event:` line naming the frame kind, a `data:` line carrying the JSON
/// payload, and the blank line that terminates the record.
fn encode(frame: &SseFrame) -> Bytes {
    let data = serde_json::to_string(frame).unwrap_or_else(|_| "null".to_string());
    let mut out = String::with_capacity(data.len() + 32);
    out.push_str("id: ");
    out.push_str(&frame_id(frame).to_string());
    out.push('\n');
    out.push_str("event: ");
    out.push_str(frame_name(frame));
    out.push('\n');
    out.push_str("data: ");
    out.push_str(&data);
    out.push_str("\n\n");
    Bytes::from(out)
}

pub struct HyperSseSink {
    tx: tokio::sync::mpsc::Sender<Result<Bytes, std::convert::Infallible>>,
}

impl HyperSseSink {
    /// Opens a sink/body pair: frames written to the sink arrive, encoded,
    /// on the returned body stream.
    pub fn channel(buffer: usize) -> (Self, hyper::Body) {
        let (tx, rx) = tokio::sync::mpsc::channel(buffer.max(1));
        let body = hyper::Body::wrap_stream(ReceiverStream::new(rx));
        (Self { tx }, body)
    }
}

#[async_trait]
impl SseSink for HyperSseSink {
    async fn write(&mut self, frame: SseFrame) -> search_core::Result<()> {
        self.tx
            .send(Ok(encode(&frame)))
            .await
            .map_err(|_| SearchError::Cancelled)
    }
}
