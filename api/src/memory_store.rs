//! A minimal in-memory `StoreGateway` + `CodecTransport` so the `data-provider`
//! binary is runnable end-to-end out of the box. The real persistent store
//! and the real codec wire protocol are explicitly out of scope (spec §1);
//! this stands in for both, the way the teacher's own `ax` binary is backed
//! by a concrete `BanyanStore`/`SwarmState` rather than a trait object — here
//! scaled down to "seed some data in memory and decode by echoing UTF-8 text".

use async_trait::async_trait;
use search_core::{
    codec::{CodecBroker, CodecRequest, CodecResponse, CodecTransport},
    error::Result,
    model::{DecodedMessage, EventWrapper, MessageBatch, MessageId, ProviderEventId, RawMessage, SearchDirection, StreamKey},
    store::{MessageBatchQuery, StoreGateway, TimeRelation},
};
use std::{collections::HashMap, sync::Arc};

/// Seeded, read-only message/event data held entirely in memory.
pub struct MemoryStoreGateway {
    events: Vec<EventWrapper>,
    messages: HashMap<StreamKey, Vec<RawMessage>>,
}

impl MemoryStoreGateway {
    pub fn new(events: Vec<EventWrapper>, messages: HashMap<StreamKey, Vec<RawMessage>>) -> Self {
        for batch in messages.values() {
            debug_assert!(batch.windows(2).all(|w| w[1].id.sequence > w[0].id.sequence));
        }
        Self { events, messages }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), HashMap::new())
    }

    fn stream_messages(&self, stream: &StreamKey) -> &[RawMessage] {
        self.messages.get(stream).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[async_trait]
impl StoreGateway for MemoryStoreGateway {
    async fn get_events(
        &self,
        start: search_core::model::Timestamp,
        end: search_core::model::Timestamp,
        _order: SearchDirection,
    ) -> Result<Vec<EventWrapper>> {
        Ok(self
            .events
            .iter()
            .filter(|w| w.start() >= start && w.start() <= end)
            .cloned()
            .collect())
    }

    async fn get_events_from_resume(
        &self,
        resume_id: &ProviderEventId,
        end: search_core::model::Timestamp,
        _order: SearchDirection,
    ) -> Result<Vec<EventWrapper>> {
        let anchor = self.events.iter().position(|w| w.find(&resume_id.event_id).is_some());
        let Some(anchor) = anchor else {
            return Ok(Vec::new());
        };
        Ok(self.events[anchor + 1..].iter().filter(|w| w.start() <= end).cloned().collect())
    }

    async fn get_events_to_resume(
        &self,
        start: search_core::model::Timestamp,
        resume_id: &ProviderEventId,
        _order: SearchDirection,
    ) -> Result<Vec<EventWrapper>> {
        let anchor = self.events.iter().position(|w| w.find(&resume_id.event_id).is_some());
        let Some(anchor) = anchor else {
            return Ok(Vec::new());
        };
        Ok(self.events[..anchor].iter().filter(|w| w.start() >= start).cloned().collect())
    }

    async fn get_event(&self, id: &ProviderEventId) -> Result<Option<EventWrapper>> {
        Ok(self.events.iter().find(|w| w.find(&id.event_id).is_some()).cloned())
    }

    async fn get_message_batches(&self, query: MessageBatchQuery) -> Result<Vec<MessageBatch>> {
        let all = self.stream_messages(&query.stream);
        let mut selected: Vec<RawMessage> = match query.direction {
            SearchDirection::After => all
                .iter()
                .filter(|m| query.from_sequence.map_or(true, |from| m.id.sequence > from))
                .filter(|m| query.from_timestamp.map_or(true, |ts| m.id.timestamp >= ts))
                .filter(|m| query.to_timestamp.map_or(true, |ts| m.id.timestamp <= ts))
                .take(query.limit.max(1))
                .cloned()
                .collect(),
            SearchDirection::Before => {
                let mut rev: Vec<RawMessage> = all
                    .iter()
                    .rev()
                    .filter(|m| query.from_sequence.map_or(true, |from| m.id.sequence < from))
                    .filter(|m| query.from_timestamp.map_or(true, |ts| m.id.timestamp <= ts))
                    .filter(|m| query.to_timestamp.map_or(true, |ts| m.id.timestamp >= ts))
                    .take(query.limit.max(1))
                    .cloned()
                    .collect();
                rev.reverse();
                rev
            }
        };
        selected.dedup_by(|a, b| a.id == b.id);
        if selected.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![MessageBatch::new(query.stream, selected)])
    }

    async fn get_message(&self, id: &MessageId) -> Result<Option<RawMessage>> {
        Ok(self
            .stream_messages(&id.stream)
            .iter()
            .find(|m| m.id.sequence == id.sequence)
            .cloned())
    }

    async fn get_first_message_id(&self, ts: search_core::model::Timestamp, stream: &StreamKey, relation: TimeRelation) -> Result<Option<MessageId>> {
        let all = self.stream_messages(stream);
        let found = match relation {
            TimeRelation::AtOrAfter => all.iter().find(|m| m.id.timestamp >= ts),
            TimeRelation::AtOrBefore => all.iter().rev().find(|m| m.id.timestamp <= ts),
        };
        Ok(found.map(|m| m.id.clone()))
    }

    async fn get_first_message_sequence(&self, stream: &StreamKey, direction: SearchDirection) -> Result<Option<i64>> {
        let all = self.stream_messages(stream);
        Ok(match direction {
            SearchDirection::After => all.first().map(|m| m.id.sequence),
            SearchDirection::Before => all.last().map(|m| m.id.sequence),
        })
    }

    async fn get_event_ids(&self, _message_id: &MessageId) -> Result<Vec<ProviderEventId>> {
        Ok(Vec::new())
    }

    async fn get_message_ids(&self, _event_id: &ProviderEventId) -> Result<Vec<MessageId>> {
        Ok(Vec::new())
    }
}

/// Decodes every message body as UTF-8 text, synchronously, completing the
/// broker round-trip from a spawned task the moment `send` is called — the
/// same "response thread pool calls back into the broker" shape the real
/// codec integration would use, minus an actual external process.
pub struct EchoCodecTransport {
    broker: parking_lot::Mutex<Option<Arc<CodecBroker<EchoCodecTransport>>>>,
}

impl EchoCodecTransport {
    pub fn new() -> Self {
        Self {
            broker: parking_lot::Mutex::new(None),
        }
    }

    /// Must be called once, after the owning `CodecBroker` exists, so `send`
    /// has somewhere to deliver its callback.
    pub fn bind(&self, broker: Arc<CodecBroker<EchoCodecTransport>>) {
        *self.broker.lock() = Some(broker);
    }
}

impl Default for EchoCodecTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CodecTransport for EchoCodecTransport {
    async fn send(&self, request: CodecRequest) -> Result<()> {
        let broker = self
            .broker
            .lock()
            .clone()
            .expect("EchoCodecTransport::bind must be called before the first request");
        let messages = request
            .messages
            .iter()
            .map(|m| DecodedMessage {
                id: m.id.clone(),
                message_type: Some("text".to_string()),
                body: Some(serde_json::Value::String(String::from_utf8_lossy(&m.body).into_owned())),
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
