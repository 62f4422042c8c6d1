//! `MessageStreamInitializer` (spec §4.3): locates the first relevant
//! stored message id for a `(stream, direction)` given a search timestamp.

use crate::{
    error::Result,
    model::{MessageId, SearchDirection, StreamKey, Timestamp},
    store::{MessageBatchQuery, StoreGateway, TimeRelation},
};
use chrono::Duration as ChronoDuration;

/// Hard safety bound for an unbounded lookup (no `lookupLimitDays`, no
/// `endTimestamp`) so a stream with no data at all doesn't spin forever.
/// Not named in the spec; a defensive limit only.
const UNBOUNDED_LOOKUP_DAYS: u32 = 3650;

pub struct MessageStreamInitializer<'a, G> {
    store: &'a G,
}

impl<'a, G: StoreGateway> MessageStreamInitializer<'a, G> {
    pub fn new(store: &'a G) -> Self {
        Self { store }
    }

    pub async fn locate(
        &self,
        stream: &StreamKey,
        request_start: Timestamp,
        direction: SearchDirection,
        lookup_limit_days: Option<u32>,
        end_timestamp: Option<Timestamp>,
    ) -> Result<Option<MessageId>> {
        let mut day_offset: u32 = 0;
        let hard_limit = lookup_limit_days.unwrap_or(UNBOUNDED_LOOKUP_DAYS);

        loop {
            if day_offset > hard_limit {
                return Ok(None);
            }

            let day_ts = match direction {
                SearchDirection::After => request_start + ChronoDuration::days(day_offset as i64),
                SearchDirection::Before => request_start - ChronoDuration::days(day_offset as i64),
            };

            if let Some(end) = end_timestamp {
                match direction {
                    SearchDirection::After if day_ts > end => return Ok(None),
                    SearchDirection::Before if day_ts < end => return Ok(None),
                    _ => {}
                }
            }

            let candidate = if day_offset == 0 {
                self.try_both_directions(day_ts, stream).await?
            } else {
                let relation = if direction.is_after() {
                    TimeRelation::AtOrAfter
                } else {
                    TimeRelation::AtOrBefore
                };
                self.store.get_first_message_id(day_ts, stream, relation).await?
            };

            if let Some(candidate) = candidate {
                return self.nearest_in_batch(stream, &candidate, request_start, direction).await;
            }

            day_offset += 1;
        }
    }

    /// On the very first day, try BEFORE then AFTER to locate any message
    /// near the requested timestamp, regardless of the search's own direction.
    async fn try_both_directions(&self, ts: Timestamp, stream: &StreamKey) -> Result<Option<MessageId>> {
        if let Some(id) = self.store.get_first_message_id(ts, stream, TimeRelation::AtOrBefore).await? {
            return Ok(Some(id));
        }
        self.store.get_first_message_id(ts, stream, TimeRelation::AtOrAfter).await
    }

    async fn nearest_in_batch(
        &self,
        stream: &StreamKey,
        candidate: &MessageId,
        request_start: Timestamp,
        direction: SearchDirection,
    ) -> Result<Option<MessageId>> {
        let query = MessageBatchQuery {
            stream: stream.clone(),
            direction,
            from_sequence: Some(candidate.sequence.saturating_sub(1)),
            from_timestamp: None,
            to_timestamp: None,
            limit: 1,
        };
        let batch = match self.store.get_message_batches(query).await?.into_iter().next() {
            Some(b) => b,
            None => return Ok(None),
        };

        let nearest = match direction {
            SearchDirection::After => batch
                .messages()
                .find(|m| m.id.timestamp >= request_start)
                .or_else(|| batch.last()),
            SearchDirection::Before => batch
                .messages_reverse()
                .find(|m| m.id.timestamp <= request_start)
                .or_else(|| batch.first()),
        };
        Ok(nearest.map(|m| m.id.clone()))
    }
}
