//! Core data model: record identifiers, batches, event wrappers and the
//! search request shape from spec §3.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type Timestamp = DateTime<Utc>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StreamDirection {
    First,
    Second,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamKey {
    pub name: String,
    pub direction: StreamDirection,
}

impl StreamKey {
    pub fn new(name: impl Into<String>, direction: StreamDirection) -> Self {
        Self {
            name: name.into(),
            direction,
        }
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{:?}", self.name, self.direction)
    }
}

/// `(StreamKey, sequence, timestamp)`. Sequences are monotonic per `StreamKey`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId {
    pub stream: StreamKey,
    pub sequence: i64,
    pub timestamp: Timestamp,
}

/// Opaque event identifier.
pub type EventId = String;

/// `(batchId?, eventId)`; a single (non-batched) event has `batch_id = None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderEventId {
    pub batch_id: Option<String>,
    pub event_id: EventId,
}

impl ProviderEventId {
    pub fn single(event_id: impl Into<EventId>) -> Self {
        Self {
            batch_id: None,
            event_id: event_id.into(),
        }
    }

    pub fn batched(batch_id: impl Into<String>, event_id: impl Into<EventId>) -> Self {
        Self {
            batch_id: Some(batch_id.into()),
            event_id: event_id.into(),
        }
    }
}

/// One binary payload belonging to a `MessageBatch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    pub id: MessageId,
    pub body: Vec<u8>,
}

/// A decoded message, or a diagnostic standing in for one that failed to
/// round-trip through the codec (§4.5, §7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodedMessage {
    pub id: MessageId,
    pub message_type: Option<String>,
    pub body: Option<serde_json::Value>,
    /// Set when the codec round-trip failed (timeout or dispatch failure);
    /// the message is still emitted, carrying this diagnostic.
    pub diagnostic: Option<String>,
}

/// Ordered sequence of messages sharing a `StreamKey`. Sequences within a
/// batch are contiguous and strictly monotonic; timestamps are non-decreasing.
#[derive(Debug, Clone)]
pub struct MessageBatch {
    pub stream: StreamKey,
    messages: Vec<RawMessage>,
}

impl MessageBatch {
    /// Builds a batch, asserting the sequence/timestamp invariants in debug builds.
    pub fn new(stream: StreamKey, messages: Vec<RawMessage>) -> Self {
        debug_assert!(messages.windows(2).all(|w| w[1].id.sequence == w[0].id.sequence + 1));
        debug_assert!(messages.windows(2).all(|w| w[1].id.timestamp >= w[0].id.timestamp));
        debug_assert!(messages.iter().all(|m| m.id.stream == stream));
        Self { stream, messages }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Ascending by sequence.
    pub fn messages(&self) -> impl DoubleEndedIterator<Item = &RawMessage> {
        self.messages.iter()
    }

    /// Descending by sequence.
    pub fn messages_reverse(&self) -> impl Iterator<Item = &RawMessage> {
        self.messages.iter().rev()
    }

    pub fn first(&self) -> Option<&RawMessage> {
        self.messages.first()
    }

    pub fn last(&self) -> Option<&RawMessage> {
        self.messages.last()
    }
}

/// A single test event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestEvent {
    pub id: EventId,
    pub parent_id: Option<EventId>,
    pub start: Timestamp,
    pub end: Timestamp,
    pub content: Option<serde_json::Value>,
}

/// Either a lone event or a batch of events sharing a `batch_id`/`parent_id`.
#[derive(Debug, Clone)]
pub enum EventWrapper {
    Single(TestEvent),
    Batch {
        batch_id: String,
        parent_id: EventId,
        test_events: Vec<TestEvent>,
    },
}

impl EventWrapper {
    pub fn batch_id(&self) -> Option<&str> {
        match self {
            EventWrapper::Single(_) => None,
            EventWrapper::Batch { batch_id, .. } => Some(batch_id),
        }
    }

    /// Start of the wrapper: the event's own start for `Single`, the minimum
    /// start across contained events for `Batch`.
    pub fn start(&self) -> Timestamp {
        match self {
            EventWrapper::Single(e) => e.start,
            EventWrapper::Batch { test_events, .. } => {
                test_events.iter().map(|e| e.start).min().expect("non-empty batch")
            }
        }
    }

    pub fn end(&self) -> Timestamp {
        match self {
            EventWrapper::Single(e) => e.end,
            EventWrapper::Batch { test_events, .. } => {
                test_events.iter().map(|e| e.end).max().expect("non-empty batch")
            }
        }
    }

    /// `O(1)`-ish lookup by event id within this wrapper.
    pub fn find(&self, id: &EventId) -> Option<&TestEvent> {
        match self {
            EventWrapper::Single(e) if &e.id == id => Some(e),
            EventWrapper::Single(_) => None,
            EventWrapper::Batch { test_events, .. } => test_events.iter().find(|e| &e.id == id),
        }
    }

    /// `Single` contributes its own `(id, parentId)`; `Batch` contributes one
    /// entry per contained event, all sharing `parent_id`.
    pub fn expand(&self) -> Vec<&TestEvent> {
        match self {
            EventWrapper::Single(e) => vec![e],
            EventWrapper::Batch { test_events, .. } => test_events.iter().collect(),
        }
    }
}

/// In-memory index built once per batch for `O(1)` event lookup (§3).
pub struct EventIndex<'a>(HashMap<&'a EventId, &'a TestEvent>);

impl<'a> EventIndex<'a> {
    pub fn build(wrapper: &'a EventWrapper) -> Self {
        Self(wrapper.expand().into_iter().map(|e| (&e.id, e)).collect())
    }

    pub fn get(&self, id: &EventId) -> Option<&'a TestEvent> {
        self.0.get(id).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SearchDirection {
    After,
    Before,
}

impl SearchDirection {
    pub fn is_after(self) -> bool {
        matches!(self, SearchDirection::After)
    }
}

/// The id a client last observed, to resume from (§3, §4.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResumeId {
    Message(MessageId),
    Event(ProviderEventId),
}

#[derive(Debug, thiserror::Error)]
pub enum RequestValidationError {
    #[error("at least one of startTimestamp or resumeFromId must be present")]
    MissingStart,
    #[error("for AFTER, startTimestamp must be <= endTimestamp")]
    BadAfterRange,
    #[error("for BEFORE, startTimestamp must be >= endTimestamp")]
    BadBeforeRange,
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub direction: SearchDirection,
    pub start_timestamp: Option<Timestamp>,
    pub end_timestamp: Option<Timestamp>,
    pub resume_from_id: Option<ResumeId>,
    pub streams: Vec<StreamKey>,
    pub filters: Vec<crate::filter::FilterSpec>,
    pub limit: Option<usize>,
    pub limit_for_parent: Option<usize>,
    pub keep_open: bool,
    pub metadata_only: bool,
    pub attached_messages: bool,
    pub lookup_limit_days: Option<u32>,
    pub result_count_limit: Option<usize>,
    pub parent_event: Option<EventId>,
}

impl SearchRequest {
    pub fn validate(&self) -> Result<(), RequestValidationError> {
        if self.start_timestamp.is_none() && self.resume_from_id.is_none() {
            return Err(RequestValidationError::MissingStart);
        }
        if let (Some(start), Some(end)) = (self.start_timestamp, self.end_timestamp) {
            match self.direction {
                SearchDirection::After if start > end => return Err(RequestValidationError::BadAfterRange),
                SearchDirection::Before if start < end => return Err(RequestValidationError::BadBeforeRange),
                _ => {}
            }
        }
        Ok(())
    }
}

/// Progress metadata carried alongside every pipeline item from a given
/// stream's extractor: whether the stream is exhausted, the id/time of the
/// last message actually processed (for resume and keep-alive reporting).
#[derive(Debug, Clone)]
pub struct StreamProgress {
    pub stream: StreamKey,
    pub stream_empty: bool,
    pub last_processed_id: Option<MessageId>,
    pub last_scanned_time: Timestamp,
}

/// Tagged pipeline item flowing through the message side of the engine
/// (§3 "Pipeline items", §4.4-§4.6).
#[derive(Debug, Clone)]
pub enum MessageFlowItem {
    RawBatch {
        progress: StreamProgress,
        batch: std::sync::Arc<MessageBatch>,
    },
    CodecRequest {
        progress: StreamProgress,
        request: crate::codec::CodecRequest,
    },
    DecodedBatch {
        progress: StreamProgress,
        decoded: Vec<DecodedMessage>,
    },
    FilteredMessage {
        progress: StreamProgress,
        message: DecodedMessage,
        passed: bool,
    },
    EmptyTick {
        progress: StreamProgress,
    },
}

impl MessageFlowItem {
    pub fn progress(&self) -> &StreamProgress {
        match self {
            MessageFlowItem::RawBatch { progress, .. }
            | MessageFlowItem::CodecRequest { progress, .. }
            | MessageFlowItem::DecodedBatch { progress, .. }
            | MessageFlowItem::FilteredMessage { progress, .. }
            | MessageFlowItem::EmptyTick { progress } => progress,
        }
    }

    pub fn is_tick(&self) -> bool {
        matches!(self, MessageFlowItem::EmptyTick { .. })
    }
}

/// `LastScannedObjectInfo`: reported on keep-alive frames (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastScannedObjectInfo {
    pub last_processed_id: Option<MessageId>,
    pub last_scanned_time: Timestamp,
    pub stream_empty: bool,
}
