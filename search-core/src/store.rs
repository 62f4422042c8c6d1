//! `StoreGateway`: thin adapter over the persistent record store (spec §2.1,
//! §6). Only the query surface is modeled — writing and the store internals
//! are out of scope.

use crate::{
    error::{Result, SearchError},
    model::{EventWrapper, MessageBatch, MessageId, ProviderEventId, RawMessage, SearchDirection, StreamKey, Timestamp},
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Bounds for a single batch scan against one `(stream, direction)`.
#[derive(Debug, Clone)]
pub struct MessageBatchQuery {
    pub stream: StreamKey,
    pub direction: SearchDirection,
    /// Resume strictly after this sequence (exclusive), if set.
    pub from_sequence: Option<i64>,
    pub from_timestamp: Option<Timestamp>,
    pub to_timestamp: Option<Timestamp>,
    pub limit: usize,
}

/// A relation used by `get_first_message_id` to pick the nearest candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeRelation {
    AtOrAfter,
    AtOrBefore,
}

#[async_trait]
pub trait StoreGateway: Send + Sync {
    async fn get_events(&self, start: Timestamp, end: Timestamp, order: SearchDirection) -> Result<Vec<EventWrapper>>;

    async fn get_events_from_resume(
        &self,
        resume_id: &ProviderEventId,
        end: Timestamp,
        order: SearchDirection,
    ) -> Result<Vec<EventWrapper>>;

    async fn get_events_to_resume(
        &self,
        start: Timestamp,
        resume_id: &ProviderEventId,
        order: SearchDirection,
    ) -> Result<Vec<EventWrapper>>;

    async fn get_event(&self, id: &ProviderEventId) -> Result<Option<EventWrapper>>;

    async fn get_message_batches(&self, query: MessageBatchQuery) -> Result<Vec<MessageBatch>>;

    async fn get_message(&self, id: &MessageId) -> Result<Option<RawMessage>>;

    async fn get_first_message_id(
        &self,
        ts: Timestamp,
        stream: &StreamKey,
        relation: TimeRelation,
    ) -> Result<Option<MessageId>>;

    async fn get_first_message_sequence(&self, stream: &StreamKey, direction: SearchDirection) -> Result<Option<i64>>;

    async fn get_event_ids(&self, message_id: &MessageId) -> Result<Vec<ProviderEventId>>;

    async fn get_message_ids(&self, event_id: &ProviderEventId) -> Result<Vec<MessageId>>;
}

/// Wraps any `StoreGateway` with a fixed-delay, bounded-attempt retry policy
/// for `StoreTransient` failures. Per spec §2.1/§5, retries apply only in
/// SSE (streaming) mode — bounded list callers get `inner` directly.
pub struct RetryingStoreGateway<G> {
    inner: Arc<G>,
    delay: Duration,
    attempts: usize,
}

impl<G: StoreGateway> RetryingStoreGateway<G> {
    pub fn new(inner: Arc<G>, delay: Duration, attempts: usize) -> Self {
        Self { inner, delay, attempts }
    }

    async fn retry<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_err = None;
        for attempt in 0..=self.attempts {
            match op().await {
                Ok(v) => return Ok(v),
                Err(SearchError::StoreTransient(msg)) => {
                    tracing::warn!(attempt, %msg, "transient store error, retrying");
                    last_err = Some(SearchError::StoreTransient(msg));
                    if attempt < self.attempts {
                        tokio::time::sleep(self.delay).await;
                    }
                }
                Err(other) => return Err(other),
            }
        }
        Err(last_err.unwrap_or_else(|| SearchError::StoreTransient("retries exhausted".into())))
    }
}

#[async_trait]
impl<G: StoreGateway> StoreGateway for RetryingStoreGateway<G> {
    async fn get_events(&self, start: Timestamp, end: Timestamp, order: SearchDirection) -> Result<Vec<EventWrapper>> {
        self.retry(|| self.inner.get_events(start, end, order)).await
    }

    async fn get_events_from_resume(
        &self,
        resume_id: &ProviderEventId,
        end: Timestamp,
        order: SearchDirection,
    ) -> Result<Vec<EventWrapper>> {
        self.retry(|| self.inner.get_events_from_resume(resume_id, end, order)).await
    }

    async fn get_events_to_resume(
        &self,
        start: Timestamp,
        resume_id: &ProviderEventId,
        order: SearchDirection,
    ) -> Result<Vec<EventWrapper>> {
        self.retry(|| self.inner.get_events_to_resume(start, resume_id, order)).await
    }

    async fn get_event(&self, id: &ProviderEventId) -> Result<Option<EventWrapper>> {
        self.retry(|| self.inner.get_event(id)).await
    }

    async fn get_message_batches(&self, query: MessageBatchQuery) -> Result<Vec<MessageBatch>> {
        self.retry(|| self.inner.get_message_batches(query.clone())).await
    }

    async fn get_message(&self, id: &MessageId) -> Result<Option<RawMessage>> {
        self.retry(|| self.inner.get_message(id)).await
    }

    async fn get_first_message_id(
        &self,
        ts: Timestamp,
        stream: &StreamKey,
        relation: TimeRelation,
    ) -> Result<Option<MessageId>> {
        self.retry(|| self.inner.get_first_message_id(ts, stream, relation)).await
    }

    async fn get_first_message_sequence(&self, stream: &StreamKey, direction: SearchDirection) -> Result<Option<i64>> {
        self.retry(|| self.inner.get_first_message_sequence(stream, direction)).await
    }

    async fn get_event_ids(&self, message_id: &MessageId) -> Result<Vec<ProviderEventId>> {
        self.retry(|| self.inner.get_event_ids(message_id)).await
    }

    async fn get_message_ids(&self, event_id: &ProviderEventId) -> Result<Vec<MessageId>> {
        self.retry(|| self.inner.get_message_ids(event_id)).await
    }
}

/// Lets a boxed trait object stand in for `G: StoreGateway` wherever the
/// engine generics need a concrete, `Sized` type — e.g. a façade wiring up
/// one dynamically-chosen store implementation at startup.
#[async_trait]
impl StoreGateway for Box<dyn StoreGateway> {
    async fn get_events(&self, start: Timestamp, end: Timestamp, order: SearchDirection) -> Result<Vec<EventWrapper>> {
        (**self).get_events(start, end, order).await
    }

    async fn get_events_from_resume(
        &self,
        resume_id: &ProviderEventId,
        end: Timestamp,
        order: SearchDirection,
    ) -> Result<Vec<EventWrapper>> {
        (**self).get_events_from_resume(resume_id, end, order).await
    }

    async fn get_events_to_resume(
        &self,
        start: Timestamp,
        resume_id: &ProviderEventId,
        order: SearchDirection,
    ) -> Result<Vec<EventWrapper>> {
        (**self).get_events_to_resume(start, resume_id, order).await
    }

    async fn get_event(&self, id: &ProviderEventId) -> Result<Option<EventWrapper>> {
        (**self).get_event(id).await
    }

    async fn get_message_batches(&self, query: MessageBatchQuery) -> Result<Vec<MessageBatch>> {
        (**self).get_message_batches(query).await
    }

    async fn get_message(&self, id: &MessageId) -> Result<Option<RawMessage>> {
        (**self).get_message(id).await
    }

    async fn get_first_message_id(&self, ts: Timestamp, stream: &StreamKey, relation: TimeRelation) -> Result<Option<MessageId>> {
        (**self).get_first_message_id(ts, stream, relation).await
    }

    async fn get_first_message_sequence(&self, stream: &StreamKey, direction: SearchDirection) -> Result<Option<i64>> {
        (**self).get_first_message_sequence(stream, direction).await
    }

    async fn get_event_ids(&self, message_id: &MessageId) -> Result<Vec<ProviderEventId>> {
        (**self).get_event_ids(message_id).await
    }

    async fn get_message_ids(&self, event_id: &ProviderEventId) -> Result<Vec<MessageId>> {
        (**self).get_message_ids(event_id).await
    }
}
