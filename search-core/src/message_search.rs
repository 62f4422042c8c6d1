//! `MessageSearchEngine`: the message-side counterpart to `EventSearchEngine`,
//! composing `MessageStreamInitializer` (§4.3), one `MessageExtractor` per
//! requested stream (§4.4), codec round-trips (§4.5-§4.6 via `convert`),
//! `StreamMerger` (§4.6), `FilterPipeline` (§4.7) and the global result cap
//! into a single ordered, resumable flow. Per-stream heads are located once
//! up front; a stream with nothing in range is simply dropped from the
//! merge rather than kept alive with an empty extractor.

use crate::{
    codec::{CodecBroker, CodecTransport},
    config::SearchConfig,
    convert,
    error::{Result, SearchError},
    filter::{FilterKind, FilterPipeline, Filterable},
    merger::{MergerOutput, StreamMerger},
    message_extractor::{self, HeadTrim},
    message_init::MessageStreamInitializer,
    metrics::Metrics,
    model::{DecodedMessage, ResumeId, SearchRequest, StreamKey, StreamProgress},
    store::StoreGateway,
};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct EmittedMessage {
    pub id: u64,
    pub stream: StreamKey,
    pub message: DecodedMessage,
}

#[derive(Debug, Clone)]
pub enum MessageSearchItem {
    Message(EmittedMessage),
    /// Carries each live stream's progress so a caller can report
    /// `LastScannedObjectInfo` on an SSE keep-alive frame (§4.8).
    KeepAlive(Vec<StreamProgress>),
    Error(SearchError),
}

/// A decoded message plus its cross-referenced event ids, resolved only
/// when a filter or `attachedMessages` actually needs them (§4.7's
/// body-materialization laziness, extended to cross-ref lookups).
struct FilterableMessage {
    message: DecodedMessage,
    attached_event_ids: Vec<String>,
}

impl Filterable for FilterableMessage {
    fn message_type(&self) -> Option<&str> {
        self.message.message_type.as_deref()
    }

    fn body_text(&self) -> Option<String> {
        self.message.body.as_ref().map(|v| v.to_string())
    }

    fn body_binary(&self) -> Option<Vec<u8>> {
        self.message.body.as_ref().and_then(|v| serde_json::to_vec(v).ok())
    }

    fn attached_event_ids(&self) -> &[String] {
        &self.attached_event_ids
    }
}

fn needs_attached_event_ids(request: &SearchRequest) -> bool {
    request.attached_messages
        || request
            .filters
            .iter()
            .any(|f| matches!(f.kind, FilterKind::AttachedEventId | FilterKind::AttachedEventIds))
}

pub struct MessageSearchEngine<G, T> {
    store: Arc<G>,
    broker: Arc<CodecBroker<T>>,
    metrics: Arc<dyn Metrics>,
    config: SearchConfig,
}

impl<G: StoreGateway + 'static, T: CodecTransport + 'static> MessageSearchEngine<G, T> {
    pub fn new(store: Arc<G>, broker: Arc<CodecBroker<T>>, metrics: Arc<dyn Metrics>, config: SearchConfig) -> Self {
        Self {
            store,
            broker,
            metrics,
            config,
        }
    }

    pub fn spawn(self: Arc<Self>, request: SearchRequest) -> mpsc::Receiver<MessageSearchItem> {
        let buffer = self.config.message_search_pipeline_buffer.max(1);
        let (tx, rx) = mpsc::channel(buffer);
        tokio::spawn(async move {
            self.run(request, tx).await;
        });
        rx
    }

    /// Resolves one stream's starting point: the head-trim rule to apply to
    /// its first fetched batch, and the sequence to resume scanning from
    /// (exclusive). Returns `Ok(None)` when the stream has nothing in range
    /// within the lookup window, so the caller can simply omit it.
    async fn locate_start(&self, stream: &StreamKey, request: &SearchRequest) -> Result<Option<(HeadTrim, Option<i64>)>> {
        if let Some(ResumeId::Message(resume)) = &request.resume_from_id {
            if &resume.stream == stream {
                return Ok(Some((HeadTrim::AfterSequence(resume.sequence), Some(resume.sequence))));
            }
            let initializer = MessageStreamInitializer::new(&*self.store);
            let located = initializer
                .locate(
                    stream,
                    resume.timestamp,
                    request.direction,
                    request.lookup_limit_days,
                    request.end_timestamp,
                )
                .await?;
            return Ok(located.map(|id| {
                (
                    HeadTrim::ByTimestamp(resume.timestamp),
                    Some(id.sequence.saturating_sub(1)),
                )
            }));
        }

        let start = request
            .start_timestamp
            .ok_or_else(|| SearchError::InvalidRequest("startTimestamp or resumeFromId required".into()))?;
        let initializer = MessageStreamInitializer::new(&*self.store);
        let located = initializer
            .locate(stream, start, request.direction, request.lookup_limit_days, request.end_timestamp)
            .await?;
        Ok(located.map(|id| (HeadTrim::ByTimestamp(start), Some(id.sequence.saturating_sub(1)))))
    }

    async fn run(&self, request: SearchRequest, tx: mpsc::Sender<MessageSearchItem>) {
        if let Err(e) = request.validate() {
            let _ = tx.send(MessageSearchItem::Error(e.into())).await;
            return;
        }

        let mut sources = Vec::new();
        for stream in &request.streams {
            let start = match self.locate_start(stream, &request).await {
                Ok(v) => v,
                Err(e) => {
                    let _ = tx.send(MessageSearchItem::Error(e)).await;
                    return;
                }
            };
            let Some((head_trim, start_sequence_exclusive)) = start else {
                tracing::debug!(%stream, "no messages in range for stream, omitting from merge");
                continue;
            };
            let raw = message_extractor::spawn(
                self.store.clone(),
                stream.clone(),
                request.direction,
                head_trim,
                start_sequence_exclusive,
                request.end_timestamp,
                self.config.event_search_chunk_size,
                self.config.send_empty_delay,
                request.keep_open,
                self.config.sse_search_delay,
                self.config.message_search_pipeline_buffer,
            );
            let decoded = convert::spawn(self.broker.clone(), raw, self.config.message_search_pipeline_buffer);
            sources.push((stream.clone(), decoded));
        }

        if sources.is_empty() {
            return;
        }

        let needs_attached = needs_attached_event_ids(&request);
        let mut merger = StreamMerger::new(request.direction, sources);
        let mut next_id: u64 = 0;
        let mut taken: usize = 0;
        let limit = request.result_count_limit;

        while let Some(out) = merger.next().await {
            match out {
                MergerOutput::Message(m) => {
                    let attached_event_ids = if needs_attached {
                        match self.store.get_event_ids(&m.message.id).await {
                            Ok(ids) => ids.into_iter().map(|p| p.event_id).collect(),
                            Err(e) => {
                                let _ = tx.send(MessageSearchItem::Error(e)).await;
                                return;
                            }
                        }
                    } else {
                        Vec::new()
                    };
                    let filterable = FilterableMessage {
                        message: m.message.clone(),
                        attached_event_ids,
                    };
                    if !FilterPipeline::apply(&request.filters, &filterable) {
                        continue;
                    }
                    let id = next_id;
                    next_id += 1;
                    taken += 1;
                    self.metrics.messages_emitted();
                    let message = if request.metadata_only {
                        DecodedMessage { body: None, ..m.message }
                    } else {
                        m.message
                    };
                    if tx
                        .send(MessageSearchItem::Message(EmittedMessage {
                            id,
                            stream: m.stream,
                            message,
                        }))
                        .await
                        .is_err()
                    {
                        return;
                    }
                    if let Some(limit) = limit {
                        if taken >= limit {
                            return;
                        }
                    }
                }
                MergerOutput::Tick(progress) => {
                    if tx.send(MessageSearchItem::KeepAlive(progress)).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::{CodecRequest, CodecResponse},
        metrics::NoopMetrics,
        model::{EventWrapper, MessageBatch, MessageId, ProviderEventId, RawMessage, SearchDirection, StreamDirection, Timestamp},
        store::{MessageBatchQuery, TimeRelation},
    };
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    struct FixtureStore {
        batches: Vec<(StreamKey, Vec<i64>)>,
    }

    #[async_trait]
    impl StoreGateway for FixtureStore {
        async fn get_events(&self, _s: Timestamp, _e: Timestamp, _o: SearchDirection) -> Result<Vec<EventWrapper>> {
            unimplemented!()
        }
        async fn get_events_from_resume(&self, _r: &ProviderEventId, _e: Timestamp, _o: SearchDirection) -> Result<Vec<EventWrapper>> {
            unimplemented!()
        }
        async fn get_events_to_resume(&self, _s: Timestamp, _r: &ProviderEventId, _o: SearchDirection) -> Result<Vec<EventWrapper>> {
            unimplemented!()
        }
        async fn get_event(&self, _id: &ProviderEventId) -> Result<Option<EventWrapper>> {
            unimplemented!()
        }
        async fn get_message_batches(&self, query: MessageBatchQuery) -> Result<Vec<MessageBatch>> {
            let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
            let (_, sequences) = self.batches.iter().find(|(s, _)| s == &query.stream).unwrap();
            let from = query.from_sequence.unwrap_or(0);
            let remaining: Vec<_> = sequences.iter().filter(|&&seq| seq > from).cloned().collect();
            if remaining.is_empty() {
                return Ok(vec![]);
            }
            let messages = remaining
                .into_iter()
                .map(|seq| RawMessage {
                    id: MessageId {
                        stream: query.stream.clone(),
                        sequence: seq,
                        timestamp: base + ChronoDuration::minutes(seq),
                    },
                    body: vec![seq as u8],
                })
                .collect();
            Ok(vec![MessageBatch::new(query.stream.clone(), messages)])
        }
        async fn get_message(&self, _id: &MessageId) -> Result<Option<RawMessage>> {
            unimplemented!()
        }
        async fn get_first_message_id(&self, ts: Timestamp, stream: &StreamKey, relation: TimeRelation) -> Result<Option<MessageId>> {
            let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
            let (_, sequences) = self.batches.iter().find(|(s, _)| s == stream).unwrap();
            let found = match relation {
                TimeRelation::AtOrAfter => sequences.iter().find(|&&seq| base + ChronoDuration::minutes(seq) >= ts),
                TimeRelation::AtOrBefore => sequences.iter().rev().find(|&&seq| base + ChronoDuration::minutes(seq) <= ts),
            };
            Ok(found.map(|&seq| MessageId {
                stream: stream.clone(),
                sequence: seq,
                timestamp: base + ChronoDuration::minutes(seq),
            }))
        }
        async fn get_first_message_sequence(&self, _stream: &StreamKey, _direction: SearchDirection) -> Result<Option<i64>> {
            unimplemented!()
        }
        async fn get_event_ids(&self, _message_id: &MessageId) -> Result<Vec<ProviderEventId>> {
            Ok(vec![])
        }
        async fn get_message_ids(&self, _event_id: &ProviderEventId) -> Result<Vec<MessageId>> {
            unimplemented!()
        }
    }

    struct LoopbackTransport {
        broker: parking_lot::Mutex<Option<Arc<CodecBroker<LoopbackTransport>>>>,
    }

    #[async_trait]
    impl CodecTransport for LoopbackTransport {
        async fn send(&self, request: CodecRequest) -> Result<()> {
            let broker = self.broker.lock().clone().unwrap();
            let messages = request
                .messages
                .iter()
                .map(|m| DecodedMessage {
                    id: m.id.clone(),
                    message_type: Some("t".into()),
                    body: None,
                    diagnostic: None,
                })
                .collect();
            tokio::spawn(async move {
                broker
                    .complete(CodecResponse {
                        request_id: request.request_id,
                        messages,
                    })
                    .await;
            });
            Ok(())
        }
    }

    #[tokio::test]
    async fn merges_two_streams_in_timestamp_order() {
        let s1 = StreamKey::new("a", StreamDirection::First);
        let s2 = StreamKey::new("b", StreamDirection::First);
        let store = Arc::new(FixtureStore {
            batches: vec![(s1.clone(), vec![1, 2, 3]), (s2.clone(), vec![1, 2, 3])],
        });
        let transport = Arc::new(LoopbackTransport {
            broker: parking_lot::Mutex::new(None),
        });
        let broker = Arc::new(CodecBroker::new(transport.clone(), &SearchConfig::default(), Arc::new(NoopMetrics)));
        *transport.broker.lock() = Some(broker.clone());

        let engine = Arc::new(MessageSearchEngine::new(store, broker, Arc::new(NoopMetrics), SearchConfig::default()));
        let request = SearchRequest {
            direction: SearchDirection::After,
            start_timestamp: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            end_timestamp: Some(Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap()),
            resume_from_id: None,
            streams: vec![s1, s2],
            filters: vec![],
            limit: None,
            limit_for_parent: None,
            keep_open: false,
            metadata_only: false,
            attached_messages: false,
            lookup_limit_days: None,
            result_count_limit: None,
            parent_event: None,
        };
        let mut rx = engine.spawn(request);
        let mut seqs = Vec::new();
        while let Some(item) = rx.recv().await {
            if let MessageSearchItem::Message(m) = item {
                seqs.push(m.message.id.sequence);
            }
        }
        assert_eq!(seqs.len(), 6);
    }

    #[tokio::test]
    async fn resume_excludes_resume_message_for_its_own_stream() {
        let s1 = StreamKey::new("a", StreamDirection::First);
        let store = Arc::new(FixtureStore {
            batches: vec![(s1.clone(), vec![1, 2, 3, 4])],
        });
        let transport = Arc::new(LoopbackTransport {
            broker: parking_lot::Mutex::new(None),
        });
        let broker = Arc::new(CodecBroker::new(transport.clone(), &SearchConfig::default(), Arc::new(NoopMetrics)));
        *transport.broker.lock() = Some(broker.clone());

        let engine = Arc::new(MessageSearchEngine::new(store, broker, Arc::new(NoopMetrics), SearchConfig::default()));
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let request = SearchRequest {
            direction: SearchDirection::After,
            start_timestamp: None,
            end_timestamp: Some(base + ChronoDuration::minutes(10)),
            resume_from_id: Some(ResumeId::Message(MessageId {
                stream: s1.clone(),
                sequence: 2,
                timestamp: base + ChronoDuration::minutes(2),
            })),
            streams: vec![s1],
            filters: vec![],
            limit: None,
            limit_for_parent: None,
            keep_open: false,
            metadata_only: false,
            attached_messages: false,
            lookup_limit_days: None,
            result_count_limit: None,
            parent_event: None,
        };
        let mut rx = engine.spawn(request);
        let mut seqs = Vec::new();
        while let Some(item) = rx.recv().await {
            if let MessageSearchItem::Message(m) = item {
                seqs.push(m.message.id.sequence);
            }
        }
        assert_eq!(seqs, vec![3, 4]);
    }
}
