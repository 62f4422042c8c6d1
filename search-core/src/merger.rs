//! `StreamMerger` (spec §4.6): merges one decoded `(stream, direction)`
//! channel (produced by `convert`, downstream of `MessageExtractor`) into a
//! single globally-ordered sequence, tie-broken on `(timestamp, streamName,
//! direction, sequence)`. Builds on the same min-heap-over-known-heads idea
//! as the teacher's `ax-futures-util::stream::merge_ordered`, but a stream
//! without a buffered head can still be judged "safe to skip" once its own
//! `EmptyTick` watermark has scanned past the current candidate.

use crate::model::{DecodedMessage, MessageId, SearchDirection, StreamDirection, StreamKey, StreamProgress, Timestamp};
use chrono::{DateTime, Utc};
use futures::future::select_all;
use std::collections::VecDeque;
use tokio::sync::mpsc;

use crate::model::MessageFlowItem;

#[derive(Debug, Clone)]
pub struct MergedMessage {
    pub stream: StreamKey,
    pub message: DecodedMessage,
}

#[derive(Debug, Clone)]
pub enum MergerOutput {
    Message(MergedMessage),
    /// Emitted when no stream currently has an emittable message; carries a
    /// snapshot of every stream's progress so a caller can drive keep-alives.
    Tick(Vec<StreamProgress>),
}

struct StreamHolder {
    stream: StreamKey,
    rx: mpsc::Receiver<MessageFlowItem>,
    buffer: VecDeque<DecodedMessage>,
    watermark: Timestamp,
    last_processed_id: Option<MessageId>,
    exhausted: bool,
}

impl StreamHolder {
    fn push_item(&mut self, item: MessageFlowItem) {
        match item {
            MessageFlowItem::DecodedBatch { progress, decoded } => {
                self.buffer.extend(decoded);
                self.watermark = progress.last_scanned_time;
                self.last_processed_id = progress.last_processed_id;
                self.exhausted = progress.stream_empty;
            }
            MessageFlowItem::EmptyTick { progress } => {
                self.watermark = progress.last_scanned_time;
                self.last_processed_id = progress.last_processed_id;
                self.exhausted = progress.stream_empty;
            }
            _ => {}
        }
    }

    fn head_timestamp(&self) -> Option<Timestamp> {
        self.buffer.front().map(|m| m.id.timestamp)
    }

    fn progress(&self) -> StreamProgress {
        StreamProgress {
            stream: self.stream.clone(),
            stream_empty: self.exhausted && self.buffer.is_empty(),
            last_processed_id: self.last_processed_id.clone(),
            last_scanned_time: self.watermark,
        }
    }
}

/// `StreamMerger`'s initial per-holder watermark before any tick has arrived.
/// Picked so the very first candidate from any stream is never blocked by a
/// sibling that hasn't reported anything yet.
fn initial_watermark(direction: SearchDirection) -> Timestamp {
    match direction {
        SearchDirection::After => DateTime::<Utc>::MIN_UTC,
        SearchDirection::Before => DateTime::<Utc>::MAX_UTC,
    }
}

pub struct StreamMerger {
    holders: Vec<StreamHolder>,
    direction: SearchDirection,
}

impl StreamMerger {
    pub fn new(direction: SearchDirection, sources: Vec<(StreamKey, mpsc::Receiver<MessageFlowItem>)>) -> Self {
        let holders = sources
            .into_iter()
            .map(|(stream, rx)| StreamHolder {
                stream,
                rx,
                buffer: VecDeque::new(),
                watermark: initial_watermark(direction),
                last_processed_id: None,
                exhausted: false,
            })
            .collect();
        Self { holders, direction }
    }

    fn candidate_order(&self, i: usize, j: usize) -> std::cmp::Ordering {
        let a = &self.holders[i];
        let b = &self.holders[j];
        let (at, bt) = (a.head_timestamp().unwrap(), b.head_timestamp().unwrap());
        let ts_order = match self.direction {
            SearchDirection::After => at.cmp(&bt),
            SearchDirection::Before => bt.cmp(&at),
        };
        ts_order
            .then_with(|| a.stream.name.cmp(&b.stream.name))
            .then_with(|| direction_rank(a.stream.direction).cmp(&direction_rank(b.stream.direction)))
            .then_with(|| {
                a.buffer
                    .front()
                    .unwrap()
                    .id
                    .sequence
                    .cmp(&b.buffer.front().unwrap().id.sequence)
            })
    }

    /// Picks the index of the message that is provably the next one to emit,
    /// or `None` if some stream hasn't scanned far enough yet to rule out an
    /// earlier message of its own.
    fn pick_ready_index(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for i in 0..self.holders.len() {
            if self.holders[i].head_timestamp().is_none() {
                continue;
            }
            best = match best {
                None => Some(i),
                Some(b) if self.candidate_order(i, b) == std::cmp::Ordering::Less => Some(i),
                Some(b) => Some(b),
            };
        }
        let best_idx = best?;
        let best_ts = self.holders[best_idx].head_timestamp().unwrap();

        for (i, h) in self.holders.iter().enumerate() {
            if i == best_idx || h.head_timestamp().is_some() {
                continue;
            }
            if h.exhausted {
                continue;
            }
            let safe = match self.direction {
                SearchDirection::After => h.watermark >= best_ts,
                SearchDirection::Before => h.watermark <= best_ts,
            };
            if !safe {
                return None;
            }
        }
        Some(best_idx)
    }

    /// Awaits the next report from whichever non-exhausted stream answers
    /// first. Returns `false` once every stream is exhausted and drained.
    async fn poll_any(&mut self) -> bool {
        let futs: Vec<_> = self
            .holders
            .iter_mut()
            .enumerate()
            .filter(|(_, h)| !h.exhausted)
            .map(|(i, h)| Box::pin(async move { (i, h.rx.recv().await) }))
            .collect();
        if futs.is_empty() {
            return false;
        }
        let ((i, item), _, _) = select_all(futs).await;
        match item {
            Some(msg) => self.holders[i].push_item(msg),
            None => {
                self.holders[i].exhausted = true;
                self.holders[i].watermark = initial_watermark_exhausted(self.direction);
            }
        }
        true
    }

    /// Returns the next globally-ordered message, or `Tick` when nothing is
    /// currently emittable, or `None` once every stream is drained.
    pub async fn next(&mut self) -> Option<MergerOutput> {
        loop {
            if let Some(idx) = self.pick_ready_index() {
                let msg = self.holders[idx].buffer.pop_front().expect("picked index has a buffered head");
                return Some(MergerOutput::Message(MergedMessage {
                    stream: self.holders[idx].stream.clone(),
                    message: msg,
                }));
            }
            if self.holders.iter().all(|h| h.exhausted && h.buffer.is_empty()) {
                return None;
            }
            if !self.poll_any().await {
                let snapshot = self.holders.iter().map(StreamHolder::progress).collect();
                return Some(MergerOutput::Tick(snapshot));
            }
        }
    }
}

fn direction_rank(d: StreamDirection) -> u8 {
    match d {
        StreamDirection::First => 0,
        StreamDirection::Second => 1,
    }
}

fn initial_watermark_exhausted(direction: SearchDirection) -> Timestamp {
    match direction {
        SearchDirection::After => DateTime::<Utc>::MAX_UTC,
        SearchDirection::Before => DateTime::<Utc>::MIN_UTC,
    }
}
