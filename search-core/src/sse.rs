//! `SseWriter` (spec §4.8): serializes entities to SSE frames with
//! monotonically assigned ids, interleaves keep-alive frames carrying
//! `LastScannedObjectInfo`, and guarantees an orderly, exactly-once close
//! with child-task cancellation. The background keep-alive task follows the
//! teacher's ndjson keep-alive (`api/src/events/http/ndjson.rs`): the timer
//! resets on every data frame written, so a keep-alive only fires after
//! `keepAliveTimeout` of genuine inactivity rather than on a fixed cadence.

use crate::{
    error::{Result, SearchError},
    model::{DecodedMessage, LastScannedObjectInfo, MessageId, StreamKey, TestEvent, Timestamp},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SseFrame {
    Event {
        id: u64,
        event: TestEvent,
    },
    Message {
        id: u64,
        stream: StreamKey,
        message: DecodedMessage,
    },
    StreamInfo {
        id: u64,
        streams: Vec<StreamKey>,
    },
    KeepAlive {
        id: u64,
        info: LastScannedObjectInfo,
    },
    Error {
        id: u64,
        kind: &'static str,
        message: String,
    },
    Close {
        id: u64,
    },
}

/// The transport-facing half of an SSE connection. Out of scope: the wire
/// encoding and HTTP plumbing, which belong to the façade crate.
#[async_trait]
pub trait SseSink: Send + 'static {
    async fn write(&mut self, frame: SseFrame) -> Result<()>;
}

fn sentinel(after: bool) -> Timestamp {
    use chrono::{DateTime, Utc};
    if after {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    }
}

pub struct SseWriter<S> {
    sink: Arc<tokio::sync::Mutex<S>>,
    next_id: Arc<AtomicU64>,
    last_scanned: Arc<Mutex<LastScannedObjectInfo>>,
    closed: Arc<AtomicBool>,
    activity: Arc<tokio::sync::Notify>,
    keep_alive: Option<tokio::task::JoinHandle<()>>,
}

impl<S: SseSink> SseWriter<S> {
    pub fn new(sink: S, keep_alive_timeout: Duration, direction_is_after: bool) -> Self {
        let sink = Arc::new(tokio::sync::Mutex::new(sink));
        let next_id = Arc::new(AtomicU64::new(0));
        let last_scanned = Arc::new(Mutex::new(LastScannedObjectInfo {
            last_processed_id: None,
            last_scanned_time: sentinel(direction_is_after),
            stream_empty: false,
        }));
        let closed = Arc::new(AtomicBool::new(false));
        let activity = Arc::new(tokio::sync::Notify::new());

        let keep_alive = {
            let sink = sink.clone();
            let next_id = next_id.clone();
            let last_scanned = last_scanned.clone();
            let closed = closed.clone();
            let activity = activity.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(keep_alive_timeout) => {}
                        _ = activity.notified() => continue,
                    }
                    if closed.load(Ordering::SeqCst) {
                        return;
                    }
                    let info = last_scanned.lock().clone();
                    let id = next_id.fetch_add(1, Ordering::SeqCst);
                    let mut guard = sink.lock().await;
                    if guard.write(SseFrame::KeepAlive { id, info }).await.is_err() {
                        return;
                    }
                }
            })
        };

        Self {
            sink,
            next_id,
            last_scanned,
            closed,
            activity,
            keep_alive: Some(keep_alive),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn note_progress(&self, last_processed_id: Option<MessageId>, last_scanned_time: Timestamp, stream_empty: bool) {
        *self.last_scanned.lock() = LastScannedObjectInfo {
            last_processed_id,
            last_scanned_time,
            stream_empty,
        };
    }

    pub async fn write_stream_info(&self, streams: Vec<StreamKey>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SearchError::Cancelled);
        }
        self.activity.notify_one();
        let id = self.next_id();
        self.sink.lock().await.write(SseFrame::StreamInfo { id, streams }).await
    }

    pub async fn write_event(&self, event: TestEvent) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SearchError::Cancelled);
        }
        self.activity.notify_one();
        let id = self.next_id();
        self.sink.lock().await.write(SseFrame::Event { id, event }).await
    }

    pub async fn write_message(&self, stream: StreamKey, message: DecodedMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SearchError::Cancelled);
        }
        self.activity.notify_one();
        let id = self.next_id();
        self.sink.lock().await.write(SseFrame::Message { id, stream, message }).await
    }

    pub async fn write_last_scanned(&self, last_processed_id: Option<MessageId>, last_scanned_time: Timestamp, stream_empty: bool) -> Result<()> {
        self.note_progress(last_processed_id.clone(), last_scanned_time, stream_empty);
        if self.closed.load(Ordering::SeqCst) {
            return Err(SearchError::Cancelled);
        }
        self.activity.notify_one();
        let id = self.next_id();
        self.sink
            .lock()
            .await
            .write(SseFrame::KeepAlive {
                id,
                info: LastScannedObjectInfo {
                    last_processed_id,
                    last_scanned_time,
                    stream_empty,
                },
            })
            .await
    }

    pub async fn write_error(&self, error: &SearchError) -> Result<()> {
        let id = self.next_id();
        self.sink
            .lock()
            .await
            .write(SseFrame::Error {
                id,
                kind: error.kind(),
                message: error.to_string(),
            })
            .await
    }

    /// Closes the writer exactly once, cancelling the keep-alive task. Safe
    /// to call more than once; only the first call writes the `close` frame.
    pub async fn close(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.keep_alive.take() {
            handle.abort();
        }
        let id = self.next_id();
        let _ = self.sink.lock().await.write(SseFrame::Close { id }).await;
    }
}

impl<S> Drop for SseWriter<S> {
    fn drop(&mut self) {
        if let Some(handle) = self.keep_alive.take() {
            handle.abort();
        }
    }
}
