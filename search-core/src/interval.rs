//! `IntervalGenerator` (spec §4.1): a lazy, day-bounded tiling of the
//! requested time range, reversed for BEFORE scans, with an overlap "gap"
//! prefix and a resume id attached to only the first yielded interval.

use crate::model::{ResumeId, SearchDirection, Timestamp};
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchInterval {
    pub from: Timestamp,
    pub to: Timestamp,
    /// Overlap prefix for catching events that straddle a day boundary.
    pub start_with_gap: Option<Timestamp>,
    /// Set only on the very first interval produced by this generator.
    pub resume_id: Option<ResumeId>,
}

fn day_start(ts: Timestamp) -> Timestamp {
    Utc.from_utc_datetime(&ts.date_naive().and_hms_opt(0, 0, 0).expect("valid midnight"))
}

fn next_day_start(ts: Timestamp) -> Timestamp {
    day_start(ts) + ChronoDuration::days(1)
}

pub struct IntervalGenerator {
    direction: SearchDirection,
    /// Moving cursor; `None` once the sequence is exhausted.
    cursor: Option<Timestamp>,
    /// Requested bound in the direction of travel (`endTimestamp`); `None`
    /// means unbounded (open-ended SSE search).
    bound: Option<Timestamp>,
    gap: Duration,
    resume_id: Option<ResumeId>,
    emitted_first: bool,
}

impl IntervalGenerator {
    /// `t0` is the initial cursor: the resume event's own timestamp when a
    /// resume id is present, else the request's `startTimestamp`.
    pub fn new(
        direction: SearchDirection,
        t0: Timestamp,
        bound: Option<Timestamp>,
        gap: Duration,
        resume_id: Option<ResumeId>,
    ) -> Self {
        Self {
            direction,
            cursor: Some(t0),
            bound,
            gap,
            resume_id,
            emitted_first: false,
        }
    }

    fn exhausted(&self, cursor: Timestamp) -> bool {
        match (self.direction, self.bound) {
            (SearchDirection::After, Some(end)) => cursor > end,
            (SearchDirection::Before, Some(end)) => cursor < end,
            (_, None) => false,
        }
    }
}

impl Iterator for IntervalGenerator {
    type Item = SearchInterval;

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.cursor?;
        if self.exhausted(cursor) {
            self.cursor = None;
            return None;
        }

        let gap_chrono = ChronoDuration::from_std(self.gap).unwrap_or(ChronoDuration::zero());

        let interval = match self.direction {
            SearchDirection::After => {
                let day_end = next_day_start(cursor) - ChronoDuration::nanoseconds(1);
                let to = match self.bound {
                    Some(end) => day_end.min(end),
                    None => day_end,
                };
                let start_with_gap = (day_start(cursor)).max(cursor - gap_chrono);
                let next_cursor = if self.bound.is_some_and(|end| to >= end) {
                    // one tick past `end` so the next call observes exhaustion
                    to + ChronoDuration::nanoseconds(1)
                } else {
                    day_end + ChronoDuration::nanoseconds(1)
                };
                self.cursor = Some(next_cursor);
                SearchInterval {
                    from: cursor,
                    to,
                    start_with_gap: Some(start_with_gap),
                    resume_id: None,
                }
            }
            SearchDirection::Before => {
                let day_floor = day_start(cursor);
                let from = match self.bound {
                    Some(end) => day_floor.max(end),
                    None => day_floor,
                };
                let start_with_gap = day_floor.max(from - gap_chrono);
                let next_cursor = if self.bound.is_some_and(|end| from <= end) {
                    from - ChronoDuration::nanoseconds(1)
                } else {
                    from - ChronoDuration::nanoseconds(1)
                };
                self.cursor = Some(next_cursor);
                SearchInterval {
                    from,
                    to: cursor,
                    start_with_gap: Some(start_with_gap),
                    resume_id: None,
                }
            }
        };

        let interval = if !self.emitted_first {
            self.emitted_first = true;
            SearchInterval {
                resume_id: self.resume_id.take(),
                ..interval
            }
        } else {
            interval
        };

        Some(interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(y: i32, m: u32, d: u32, h: u32, mi: u32) -> Timestamp {
        Utc.with_ymd_and_hms(y, m, d, h, mi, 0).unwrap()
    }

    #[test]
    fn single_day_range_yields_one_interval() {
        let gen = IntervalGenerator::new(
            SearchDirection::After,
            ts(2024, 1, 1, 1, 0),
            Some(ts(2024, 1, 1, 10, 0)),
            Duration::from_secs(30),
            None,
        );
        let ivs: Vec<_> = gen.collect();
        assert_eq!(ivs.len(), 1);
        assert_eq!(ivs[0].from, ts(2024, 1, 1, 1, 0));
        assert_eq!(ivs[0].to, ts(2024, 1, 1, 10, 0));
    }

    #[test]
    fn day_rollover_yields_two_intervals() {
        let gen = IntervalGenerator::new(
            SearchDirection::After,
            ts(2024, 1, 1, 23, 0),
            Some(ts(2024, 1, 2, 1, 0)),
            Duration::from_secs(30),
            None,
        );
        let ivs: Vec<_> = gen.collect();
        assert_eq!(ivs.len(), 2);
        assert_eq!(ivs[0].from, ts(2024, 1, 1, 23, 0));
        assert_eq!(ivs[1].from, ts(2024, 1, 2, 0, 0));
        assert_eq!(ivs[1].to, ts(2024, 1, 2, 1, 0));
    }

    #[test]
    fn before_direction_reverses_travel() {
        let gen = IntervalGenerator::new(
            SearchDirection::Before,
            ts(2024, 1, 2, 1, 0),
            Some(ts(2024, 1, 1, 23, 0)),
            Duration::from_secs(30),
            None,
        );
        let ivs: Vec<_> = gen.collect();
        assert_eq!(ivs.len(), 2);
        assert_eq!(ivs[0].to, ts(2024, 1, 2, 1, 0));
        assert_eq!(ivs[0].from, ts(2024, 1, 2, 0, 0));
        assert_eq!(ivs[1].to, ts(2024, 1, 2, 0, 0) - ChronoDuration::nanoseconds(1));
        assert_eq!(ivs[1].from, ts(2024, 1, 1, 23, 0));
    }

    #[test]
    fn resume_id_attached_only_once() {
        let mut gen = IntervalGenerator::new(
            SearchDirection::After,
            ts(2024, 1, 1, 23, 0),
            Some(ts(2024, 1, 3, 1, 0)),
            Duration::from_secs(30),
            Some(ResumeId::Event(crate::model::ProviderEventId::single("e1"))),
        );
        let first = gen.next().unwrap();
        assert!(first.resume_id.is_some());
        for iv in gen {
            assert!(iv.resume_id.is_none());
        }
    }
}
