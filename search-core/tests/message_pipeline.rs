//! End-to-end scenarios for the message-side pipeline: extractor → decode →
//! merge, across two streams. Mirrors the store with an in-memory fixture
//! instead of mocking each stage in isolation.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use search_core::{
    codec::{CodecBroker, CodecRequest, CodecResponse, CodecTransport},
    config::SearchConfig,
    convert, message_extractor,
    message_extractor::HeadTrim,
    merger::{MergerOutput, StreamMerger},
    metrics::NoopMetrics,
    model::{
        EventWrapper, MessageBatch, MessageId, ProviderEventId, RawMessage, SearchDirection, StreamDirection, StreamKey,
        Timestamp,
    },
    store::{MessageBatchQuery, StoreGateway, TimeRelation},
    Result,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

struct FixtureStore {
    batches: Vec<(StreamKey, Vec<i64>)>,
    calls: AtomicUsize,
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
        self.calls.fetch_add(1, Ordering::SeqCst);
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
    async fn get_first_message_id(&self, _ts: Timestamp, _stream: &StreamKey, _relation: TimeRelation) -> Result<Option<MessageId>> {
        unimplemented!()
    }
    async fn get_first_message_sequence(&self, _stream: &StreamKey, _direction: SearchDirection) -> Result<Option<i64>> {
        unimplemented!()
    }
    async fn get_event_ids(&self, _message_id: &MessageId) -> Result<Vec<ProviderEventId>> {
        unimplemented!()
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
            .map(|m| search_core::model::DecodedMessage {
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

async fn run_two_stream_merge(
    store: Arc<FixtureStore>,
    s1: StreamKey,
    s2: StreamKey,
) -> Vec<i64> {
    let transport = Arc::new(LoopbackTransport {
        broker: parking_lot::Mutex::new(None),
    });
    let broker = Arc::new(CodecBroker::new(transport.clone(), &SearchConfig::default(), Arc::new(NoopMetrics)));
    *transport.broker.lock() = Some(broker.clone());

    let raw1 = message_extractor::spawn(
        store.clone(),
        s1.clone(),
        SearchDirection::After,
        HeadTrim::None,
        None,
        None,
        100,
        std::time::Duration::from_secs(60),
        false,
        std::time::Duration::from_millis(100),
        8,
    );
    let raw2 = message_extractor::spawn(
        store.clone(),
        s2.clone(),
        SearchDirection::After,
        HeadTrim::None,
        None,
        None,
        100,
        std::time::Duration::from_secs(60),
        false,
        std::time::Duration::from_millis(100),
        8,
    );

    let decoded1 = convert::spawn(broker.clone(), raw1, 8);
    let decoded2 = convert::spawn(broker.clone(), raw2, 8);

    let mut merger = StreamMerger::new(SearchDirection::After, vec![(s1, decoded1), (s2, decoded2)]);
    let mut sequences = Vec::new();
    while let Some(out) = merger.next().await {
        if let MergerOutput::Message(m) = out {
            sequences.push(m.message.id.sequence);
        }
    }
    sequences
}

#[tokio::test]
async fn adjacent_batches_emit_in_timestamp_order() {
    let s1 = StreamKey::new("a", StreamDirection::First);
    let s2 = StreamKey::new("b", StreamDirection::First);
    let store = Arc::new(FixtureStore {
        batches: vec![(s1.clone(), vec![1, 2, 3, 4, 5, 6]), (s2.clone(), vec![7, 8, 9, 10, 11, 12])],
        calls: AtomicUsize::new(0),
    });

    let seqs = run_two_stream_merge(store, s1, s2).await;
    assert_eq!(seqs, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
}

#[tokio::test]
async fn resume_mid_batch_excludes_resume_and_everything_before_it() {
    let s1 = StreamKey::new("a", StreamDirection::First);
    let store = Arc::new(FixtureStore {
        batches: vec![(s1.clone(), vec![1, 2, 3, 4, 5, 6])],
        calls: AtomicUsize::new(0),
    });
    let transport = Arc::new(LoopbackTransport {
        broker: parking_lot::Mutex::new(None),
    });
    let broker = Arc::new(CodecBroker::new(transport.clone(), &SearchConfig::default(), Arc::new(NoopMetrics)));
    *transport.broker.lock() = Some(broker.clone());

    let raw = message_extractor::spawn(
        store,
        s1.clone(),
        SearchDirection::After,
        HeadTrim::AfterSequence(4),
        Some(4),
        None,
        100,
        std::time::Duration::from_secs(60),
        false,
        std::time::Duration::from_millis(100),
        8,
    );
    let decoded = convert::spawn(broker, raw, 8);
    let mut merger = StreamMerger::new(SearchDirection::After, vec![(s1, decoded)]);
    let mut sequences = Vec::new();
    while let Some(out) = merger.next().await {
        if let MergerOutput::Message(m) = out {
            sequences.push(m.message.id.sequence);
        }
    }
    assert_eq!(sequences, vec![5, 6]);
}
