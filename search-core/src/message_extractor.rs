//! `MessageExtractor` (spec §4.4): one per `(stream, direction)`, owning a
//! single underlying batch iterator. Emits `RawBatch` items trimmed at head
//! and tail, and `EmptyTick` heartbeats so a quiet stream doesn't starve the
//! merger. When `keep_open` is set, an empty fetch doesn't end the stream: it
//! sleeps `poll_delay` and re-polls from the same cursor, so a live search
//! keeps surfacing messages as they arrive.

use crate::{
    model::{MessageBatch, MessageFlowItem, RawMessage, SearchDirection, StreamKey, StreamProgress, Timestamp},
    store::{MessageBatchQuery, StoreGateway},
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How to trim the head of the very first batch this extractor fetches.
#[derive(Debug, Clone)]
pub enum HeadTrim {
    /// Resume search: exclude everything at-or-before (AFTER) / at-or-after
    /// (BEFORE) this sequence — the resume id itself is never re-emitted.
    AfterSequence(i64),
    ByTimestamp(Timestamp),
    None,
}

fn sentinel(direction: SearchDirection) -> Timestamp {
    match direction {
        SearchDirection::After => DateTime::<Utc>::MAX_UTC,
        SearchDirection::Before => DateTime::<Utc>::MIN_UTC,
    }
}

fn trim_batch(batch: MessageBatch, head_trim: &HeadTrim, end_timestamp: Option<Timestamp>, direction: SearchDirection) -> MessageBatch {
    let stream = batch.stream.clone();
    let messages: Vec<RawMessage> = batch
        .messages()
        .cloned()
        .filter(|m| match head_trim {
            HeadTrim::AfterSequence(seq) => match direction {
                SearchDirection::After => m.id.sequence > *seq,
                SearchDirection::Before => m.id.sequence < *seq,
            },
            HeadTrim::ByTimestamp(start) => match direction {
                SearchDirection::After => m.id.timestamp >= *start,
                SearchDirection::Before => m.id.timestamp <= *start,
            },
            HeadTrim::None => true,
        })
        .filter(|m| match end_timestamp {
            Some(end) => match direction {
                SearchDirection::After => m.id.timestamp <= end,
                SearchDirection::Before => m.id.timestamp >= end,
            },
            None => true,
        })
        .collect();
    MessageBatch::new(stream, messages)
}

#[allow(clippy::too_many_arguments)]
pub fn spawn<G: StoreGateway + 'static>(
    store: Arc<G>,
    stream: StreamKey,
    direction: SearchDirection,
    mut head_trim: HeadTrim,
    start_sequence_exclusive: Option<i64>,
    end_timestamp: Option<Timestamp>,
    chunk_size: usize,
    send_empty_delay: Duration,
    keep_open: bool,
    poll_delay: Duration,
    buffer: usize,
) -> mpsc::Receiver<MessageFlowItem> {
    let (tx, rx) = mpsc::channel(buffer);
    tokio::spawn(async move {
        let mut last_processed_id = None;
        let mut last_scanned_time = sentinel(direction);
        let mut cursor_sequence = start_sequence_exclusive;

        'outer: loop {
            let fetch = store.get_message_batches(MessageBatchQuery {
                stream: stream.clone(),
                direction,
                from_sequence: cursor_sequence,
                from_timestamp: None,
                to_timestamp: end_timestamp,
                limit: chunk_size,
            });
            tokio::pin!(fetch);
            let heartbeat = tokio::time::sleep(send_empty_delay);
            tokio::pin!(heartbeat);

            let batches = loop {
                tokio::select! {
                    biased;
                    res = &mut fetch => break res,
                    _ = &mut heartbeat => {
                        let progress = StreamProgress {
                            stream: stream.clone(),
                            stream_empty: false,
                            last_processed_id: last_processed_id.clone(),
                            last_scanned_time,
                        };
                        if tx.send(MessageFlowItem::EmptyTick { progress }).await.is_err() {
                            return;
                        }
                        heartbeat.as_mut().reset(tokio::time::Instant::now() + send_empty_delay);
                    }
                }
            };

            let batches = match batches {
                Ok(b) => b,
                Err(e) => {
                    tracing::error!(%stream, error = %e, "message extractor: store error, terminating stream");
                    break 'outer;
                }
            };

            if batches.is_empty() {
                if keep_open {
                    let progress = StreamProgress {
                        stream: stream.clone(),
                        stream_empty: false,
                        last_processed_id: last_processed_id.clone(),
                        last_scanned_time,
                    };
                    if tx.send(MessageFlowItem::EmptyTick { progress }).await.is_err() {
                        return;
                    }
                    tokio::time::sleep(poll_delay).await;
                    continue 'outer;
                }
                break 'outer;
            }

            for batch in batches {
                let last_seq_before_trim = batch.last().map(|m| m.id.sequence);
                let trimmed = trim_batch(batch, &head_trim, end_timestamp, direction);
                head_trim = HeadTrim::None;
                if let Some(seq) = last_seq_before_trim {
                    cursor_sequence = Some(seq);
                }
                if trimmed.is_empty() {
                    continue;
                }
                let last = trimmed.last().expect("non-empty").clone();
                last_processed_id = Some(last.id.clone());
                last_scanned_time = last.id.timestamp;
                let progress = StreamProgress {
                    stream: stream.clone(),
                    stream_empty: false,
                    last_processed_id: last_processed_id.clone(),
                    last_scanned_time,
                };
                if tx
                    .send(MessageFlowItem::RawBatch {
                        progress,
                        batch: Arc::new(trimmed),
                    })
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }

        let progress = StreamProgress {
            stream: stream.clone(),
            stream_empty: true,
            last_processed_id: last_processed_id.clone(),
            last_scanned_time: sentinel(direction),
        };
        let _ = tx.send(MessageFlowItem::EmptyTick { progress }).await;
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::Result, model::StreamDirection};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StoreGateway for FakeStore {
        async fn get_events(
            &self,
            _s: Timestamp,
            _e: Timestamp,
            _o: SearchDirection,
        ) -> Result<Vec<crate::model::EventWrapper>> {
            unimplemented!()
        }
        async fn get_events_from_resume(
            &self,
            _r: &crate::model::ProviderEventId,
            _e: Timestamp,
            _o: SearchDirection,
        ) -> Result<Vec<crate::model::EventWrapper>> {
            unimplemented!()
        }
        async fn get_events_to_resume(
            &self,
            _s: Timestamp,
            _r: &crate::model::ProviderEventId,
            _o: SearchDirection,
        ) -> Result<Vec<crate::model::EventWrapper>> {
            unimplemented!()
        }
        async fn get_event(&self, _id: &crate::model::ProviderEventId) -> Result<Option<crate::model::EventWrapper>> {
            unimplemented!()
        }
        async fn get_message_batches(&self, query: MessageBatchQuery) -> Result<Vec<MessageBatch>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n > 0 {
                return Ok(vec![]);
            }
            let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
            let messages = (1..=3)
                .map(|i| RawMessage {
                    id: crate::model::MessageId {
                        stream: query.stream.clone(),
                        sequence: i,
                        timestamp: base + chrono::Duration::minutes(i),
                    },
                    body: vec![],
                })
                .collect();
            Ok(vec![MessageBatch::new(query.stream, messages)])
        }
        async fn get_message(&self, _id: &crate::model::MessageId) -> Result<Option<RawMessage>> {
            unimplemented!()
        }
        async fn get_first_message_id(
            &self,
            _ts: Timestamp,
            _stream: &StreamKey,
            _relation: crate::store::TimeRelation,
        ) -> Result<Option<crate::model::MessageId>> {
            unimplemented!()
        }
        async fn get_first_message_sequence(&self, _stream: &StreamKey, _direction: SearchDirection) -> Result<Option<i64>> {
            unimplemented!()
        }
        async fn get_event_ids(&self, _message_id: &crate::model::MessageId) -> Result<Vec<crate::model::ProviderEventId>> {
            unimplemented!()
        }
        async fn get_message_ids(&self, _event_id: &crate::model::ProviderEventId) -> Result<Vec<crate::model::MessageId>> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn emits_trimmed_batch_then_terminates() {
        let store = Arc::new(FakeStore {
            calls: AtomicUsize::new(0),
        });
        let mut rx = spawn(
            store,
            StreamKey::new("s", StreamDirection::First),
            SearchDirection::After,
            HeadTrim::AfterSequence(1),
            Some(1),
            None,
            10,
            Duration::from_secs(5),
            false,
            Duration::from_millis(100),
            4,
        );

        let first = rx.recv().await.unwrap();
        match first {
            MessageFlowItem::RawBatch { batch, .. } => assert_eq!(batch.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
        let last = rx.recv().await.unwrap();
        assert!(last.progress().stream_empty);
    }
}
