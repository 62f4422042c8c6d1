//! `EventSearchEngine` (spec §4.2): interval → store fetch → wrapper
//! expansion → resume-trim → filter → per-parent cap → global cap → emit.
//! Intervals are fetched with bounded concurrency (`eventSearchPipelineBuffer`)
//! via `StreamExt::buffered`, which preserves completion order while still
//! prefetching ahead — the same shape as a bounded producer/consumer channel
//! without needing to hand-roll one. When `keepOpen` is set, exhausting the
//! requested range doesn't end the stream: it sleeps `eventSearchGap` and
//! restarts the interval walk from the frontier with no upper bound, so a
//! live search keeps surfacing events as they arrive.

use crate::{
    error::{Result, SearchError},
    filter::{FilterPipeline, Filterable},
    interval::{IntervalGenerator, SearchInterval},
    metrics::Metrics,
    model::{EventId, EventWrapper, ResumeId, SearchDirection, SearchRequest, TestEvent, Timestamp},
    store::StoreGateway,
};
use futures::{stream, StreamExt};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tokio::sync::mpsc;

impl Filterable for TestEvent {
    fn parent_event_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    fn body_text(&self) -> Option<String> {
        self.content.as_ref().map(|v| v.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct EmittedEvent {
    pub id: u64,
    pub event: TestEvent,
}

#[derive(Debug, Clone)]
pub enum EventSearchItem {
    Event(EmittedEvent),
    Error(SearchError),
}

/// Cap sentinel: once a parent's counter hits this, occurrences of an event
/// sharing that parent's id (appearing as a node in some other subtree) are
/// suppressed too (§4.2 step 5).
const CAPPED: usize = usize::MAX;

#[derive(Default)]
struct ParentCaps {
    counters: HashMap<EventId, usize>,
}

impl ParentCaps {
    fn admit(&mut self, event: &TestEvent, limit_for_parent: Option<usize>) -> bool {
        let Some(limit) = limit_for_parent else {
            return true;
        };
        if self.counters.get(&event.id).copied() == Some(CAPPED) {
            return false;
        }
        let Some(parent) = event.parent_id.clone() else {
            return true;
        };
        if self.counters.get(&parent).copied() == Some(CAPPED) {
            return false;
        }
        let counter = self.counters.entry(parent.clone()).or_insert(0);
        if *counter >= limit {
            return false;
        }
        *counter += 1;
        let reached = *counter >= limit;
        if reached {
            self.counters.insert(parent, CAPPED);
        }
        true
    }
}

/// Resolves the head of the very first emitted run against the resume id
/// (§4.2 step 3): events at-or-before the search start are buffered until
/// either the resume id itself is seen (head discarded) or an event strictly
/// past the start arrives first (head flushed — the resume event was never
/// present, so nothing is excluded).
enum ResumeTrim {
    Active { head: Vec<TestEvent>, resume_event_id: EventId },
    Inactive,
}

impl ResumeTrim {
    fn new(resume_id: &Option<ResumeId>) -> Self {
        match resume_id {
            Some(ResumeId::Event(id)) => ResumeTrim::Active {
                head: Vec::new(),
                resume_event_id: id.event_id.clone(),
            },
            _ => ResumeTrim::Inactive,
        }
    }

    fn process(&mut self, event: TestEvent, start: Timestamp, direction: SearchDirection) -> Vec<TestEvent> {
        let ResumeTrim::Active { head, resume_event_id } = self else {
            return vec![event];
        };
        if event.id == *resume_event_id {
            let flushed = std::mem::take(head);
            let _ = flushed; // resume id discards the head entirely (§4.2 step 3)
            *self = ResumeTrim::Inactive;
            return vec![];
        }
        let past_start = match direction {
            SearchDirection::After => event.start > start,
            SearchDirection::Before => event.start < start,
        };
        if past_start {
            let mut flushed = std::mem::take(head);
            flushed.push(event);
            *self = ResumeTrim::Inactive;
            flushed
        } else {
            head.push(event);
            vec![]
        }
    }
}

fn expand_for_parent<'a>(wrapper: &'a EventWrapper, parent_event: &Option<EventId>) -> Vec<&'a TestEvent> {
    match wrapper {
        EventWrapper::Single(e) => {
            let include = parent_event.as_ref().map_or(true, |p| e.parent_id.as_ref() == Some(p));
            if include {
                vec![e]
            } else {
                vec![]
            }
        }
        EventWrapper::Batch {
            parent_id, test_events, ..
        } => {
            let include = parent_event.as_ref().map_or(true, |p| parent_id == p);
            if include {
                test_events.iter().collect()
            } else {
                vec![]
            }
        }
    }
}

fn order_by_direction(mut events: Vec<&TestEvent>, direction: SearchDirection) -> Vec<&TestEvent> {
    events.sort_by_key(|e| e.start);
    if direction == SearchDirection::Before {
        events.reverse();
    }
    events
}

async fn fetch_interval<G: StoreGateway>(
    store: &G,
    direction: SearchDirection,
    interval: SearchInterval,
) -> Result<(SearchInterval, Vec<EventWrapper>)> {
    let from = interval.start_with_gap.unwrap_or(interval.from);
    let wrappers = match &interval.resume_id {
        Some(ResumeId::Event(id)) => match direction {
            SearchDirection::After => store.get_events_from_resume(id, interval.to, direction).await?,
            SearchDirection::Before => store.get_events_to_resume(from, id, direction).await?,
        },
        _ => store.get_events(from, interval.to, direction).await?,
    };
    Ok((interval, wrappers))
}

pub struct EventSearchEngine<G> {
    store: Arc<G>,
    metrics: Arc<dyn Metrics>,
}

impl<G: StoreGateway + 'static> EventSearchEngine<G> {
    pub fn new(store: Arc<G>, metrics: Arc<dyn Metrics>) -> Self {
        Self { store, metrics }
    }

    pub fn spawn(
        self: Arc<Self>,
        request: SearchRequest,
        gap: std::time::Duration,
        buffer: usize,
    ) -> mpsc::Receiver<EventSearchItem> {
        let (tx, rx) = mpsc::channel(buffer);
        tokio::spawn(async move {
            self.run(request, gap, buffer, tx).await;
        });
        rx
    }

    async fn resolve_t0(&self, request: &SearchRequest) -> std::result::Result<Timestamp, SearchError> {
        if let Some(ResumeId::Event(id)) = &request.resume_from_id {
            return match self.store.get_event(id).await {
                Ok(Some(w)) => Ok(if request.direction.is_after() { w.start() } else { w.end() }),
                Ok(None) => Err(SearchError::InvalidRequest(format!(
                    "resume event {:?} not found",
                    id.event_id
                ))),
                Err(e) => Err(e),
            };
        }
        request
            .start_timestamp
            .ok_or_else(|| SearchError::InvalidRequest("startTimestamp or resumeFromId required".into()))
    }

    async fn run(&self, request: SearchRequest, gap: std::time::Duration, buffer: usize, tx: mpsc::Sender<EventSearchItem>) {
        let t0 = match self.resolve_t0(&request).await {
            Ok(t) => t,
            Err(e) => {
                let _ = tx.send(EventSearchItem::Error(e)).await;
                return;
            }
        };

        let direction = request.direction;
        let store = self.store.clone();

        let mut resume_trim = ResumeTrim::new(&request.resume_from_id);
        let mut parent_caps = ParentCaps::default();
        let mut emitted = HashSet::new();
        let mut next_id: u64 = 0;
        let mut taken: usize = 0;
        let limit = request.result_count_limit;

        // First pass drains the requested (possibly bounded) range. When
        // `keepOpen` is set, every later pass re-polls the frontier left off
        // by the previous one with no upper bound, so a live search keeps
        // surfacing events as they arrive instead of closing once caught up.
        let mut cursor = t0;
        let mut bound = request.end_timestamp;
        let mut resume_id = request.resume_from_id.clone();

        loop {
            let generator = IntervalGenerator::new(direction, cursor, bound, gap, resume_id.take());
            let store_for_stream = store.clone();
            let mut fetches = stream::iter(generator)
                .map(move |interval| {
                    let store = store_for_stream.clone();
                    async move { fetch_interval(&*store, direction, interval).await }
                })
                .buffered(buffer.max(1));

            while let Some(fetch) = fetches.next().await {
                let (interval, wrappers) = match fetch {
                    Ok(v) => v,
                    Err(e) => {
                        let _ = tx.send(EventSearchItem::Error(e)).await;
                        return;
                    }
                };
                cursor = interval.to;

                let lower_bound = interval.start_with_gap.unwrap_or(interval.from);
                for wrapper in &wrappers {
                    let ordered = order_by_direction(expand_for_parent(wrapper, &request.parent_event), request.direction);
                    for event in ordered {
                        if !(lower_bound <= event.start && event.start <= interval.to) {
                            continue; // outside even the gap-widened window
                        }
                        if !emitted.insert(event.id.clone()) {
                            continue; // already surfaced via an earlier, intersecting batch
                        }
                        for trimmed in resume_trim.process(event.clone(), t0, request.direction) {
                            if !FilterPipeline::apply(&request.filters, &trimmed) {
                                continue;
                            }
                            if !parent_caps.admit(&trimmed, request.limit_for_parent) {
                                continue;
                            }
                            let id = next_id;
                            next_id += 1;
                            taken += 1;
                            self.metrics.events_emitted();
                            let outgoing = if request.metadata_only {
                                TestEvent { content: None, ..trimmed }
                            } else {
                                trimmed
                            };
                            if tx
                                .send(EventSearchItem::Event(EmittedEvent { id, event: outgoing }))
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
                    }
                }
            }

            if !request.keep_open {
                return;
            }
            tokio::time::sleep(gap).await;
            bound = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{metrics::NoopMetrics, model::ProviderEventId, store::MessageBatchQuery};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    struct FakeStore {
        events: Vec<EventWrapper>,
    }

    fn wrap(id: &str, parent: Option<&str>, minute: i64) -> EventWrapper {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        EventWrapper::Single(TestEvent {
            id: id.into(),
            parent_id: parent.map(Into::into),
            start: base + ChronoDuration::minutes(minute),
            end: base + ChronoDuration::minutes(minute),
            content: None,
        })
    }

    #[async_trait]
    impl StoreGateway for FakeStore {
        async fn get_events(&self, start: Timestamp, end: Timestamp, _order: SearchDirection) -> Result<Vec<EventWrapper>> {
            Ok(self
                .events
                .iter()
                .filter(|w| w.start() >= start && w.start() <= end)
                .cloned()
                .collect())
        }
        async fn get_events_from_resume(
            &self,
            _r: &ProviderEventId,
            _e: Timestamp,
            _o: SearchDirection,
        ) -> Result<Vec<EventWrapper>> {
            unimplemented!()
        }
        async fn get_events_to_resume(
            &self,
            _s: Timestamp,
            _r: &ProviderEventId,
            _o: SearchDirection,
        ) -> Result<Vec<EventWrapper>> {
            unimplemented!()
        }
        async fn get_event(&self, _id: &ProviderEventId) -> Result<Option<EventWrapper>> {
            unimplemented!()
        }
        async fn get_message_batches(&self, _q: MessageBatchQuery) -> Result<Vec<crate::model::MessageBatch>> {
            unimplemented!()
        }
        async fn get_message(&self, _id: &crate::model::MessageId) -> Result<Option<crate::model::RawMessage>> {
            unimplemented!()
        }
        async fn get_first_message_id(
            &self,
            _ts: Timestamp,
            _stream: &crate::model::StreamKey,
            _relation: crate::store::TimeRelation,
        ) -> Result<Option<crate::model::MessageId>> {
            unimplemented!()
        }
        async fn get_first_message_sequence(
            &self,
            _stream: &crate::model::StreamKey,
            _direction: SearchDirection,
        ) -> Result<Option<i64>> {
            unimplemented!()
        }
        async fn get_event_ids(&self, _message_id: &crate::model::MessageId) -> Result<Vec<ProviderEventId>> {
            unimplemented!()
        }
        async fn get_message_ids(&self, _event_id: &ProviderEventId) -> Result<Vec<crate::model::MessageId>> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn emits_all_events_in_order_for_contained_range() {
        let store = Arc::new(FakeStore {
            events: (1..=5).map(|i| wrap(&format!("e{i}"), None, i)).collect(),
        });
        let engine = Arc::new(EventSearchEngine::new(store, Arc::new(NoopMetrics)));
        let request = SearchRequest {
            direction: SearchDirection::After,
            start_timestamp: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            end_timestamp: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 10, 0).unwrap()),
            resume_from_id: None,
            streams: vec![],
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
        let mut rx = engine.spawn(request, std::time::Duration::from_secs(30), 4);
        let mut ids = Vec::new();
        while let Some(item) = rx.recv().await {
            match item {
                EventSearchItem::Event(e) => ids.push(e.event.id),
                EventSearchItem::Error(e) => panic!("unexpected error {e}"),
            }
        }
        assert_eq!(ids, vec!["e1", "e2", "e3", "e4", "e5"]);
    }

    #[tokio::test]
    async fn per_parent_cap_limits_children() {
        let mut events = vec![wrap("p", None, 0)];
        for i in 1..=5 {
            events.push(wrap(&format!("c{i}"), Some("p"), i));
        }
        let store = Arc::new(FakeStore { events });
        let engine = Arc::new(EventSearchEngine::new(store, Arc::new(NoopMetrics)));
        let request = SearchRequest {
            direction: SearchDirection::After,
            start_timestamp: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            end_timestamp: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 10, 0).unwrap()),
            resume_from_id: None,
            streams: vec![],
            filters: vec![],
            limit: None,
            limit_for_parent: Some(2),
            keep_open: false,
            metadata_only: false,
            attached_messages: false,
            lookup_limit_days: None,
            result_count_limit: None,
            parent_event: None,
        };
        let mut rx = engine.spawn(request, std::time::Duration::from_secs(30), 4);
        let mut count = 0;
        while let Some(item) = rx.recv().await {
            if let EventSearchItem::Event(e) = item {
                if e.event.parent_id.as_deref() == Some("p") {
                    count += 1;
                }
            }
        }
        assert_eq!(count, 2);
    }
}
