//! Anchor timing intents and the timing reconciler.
//!
//! Timing intents are recorded per anchor identity, independently of the
//! geometry, and merged into the anchor points when a splice is built. The
//! reconciler then decides whether the splice keeps the explicit anchor times
//! or falls back to times projected from the segment's moving speed.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::{Coordinates, PointId, SegmentStatistics, TimingFallback, TrackPoint};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorTiming {
    pub coordinates: Coordinates,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Pending timing intents keyed by anchor identity, with at most one entry
/// selected for editing.
#[derive(Debug, Clone, Default)]
pub struct AnchorTimingStore {
    timings: HashMap<PointId, AnchorTiming>,
    active: Option<PointId>,
}

impl AnchorTimingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &PointId) -> Option<&AnchorTiming> {
        self.timings.get(id)
    }

    /// Records a timing intent. Fields left unset keep their previous value.
    pub fn set_timing(
        &mut self,
        id: PointId,
        coordinates: Coordinates,
        timestamp: Option<DateTime<Utc>>,
        notes: Option<String>,
    ) {
        debug!(%id, ?timestamp, "set anchor timing");
        let existing = self.timings.remove(&id);
        let (old_timestamp, old_notes) = existing
            .map(|t| (t.timestamp, t.notes))
            .unwrap_or((None, None));
        self.timings.insert(
            id,
            AnchorTiming {
                coordinates,
                timestamp: timestamp.or(old_timestamp),
                notes: notes.or(old_notes),
            },
        );
    }

    pub fn remove_timing(&mut self, id: &PointId) -> Option<AnchorTiming> {
        if self.active.as_ref() == Some(id) {
            self.active = None;
        }
        self.timings.remove(id)
    }

    pub fn set_active(&mut self, id: Option<PointId>) {
        self.active = id;
    }

    pub fn active(&self) -> Option<PointId> {
        self.active
    }

    pub fn active_timing(&self) -> Option<&AnchorTiming> {
        self.active.as_ref().and_then(|id| self.timings.get(id))
    }

    /// Entries with a timestamp, in chronological order.
    pub fn ordered(&self) -> Vec<(PointId, &AnchorTiming)> {
        let mut entries: Vec<_> = self
            .timings
            .iter()
            .filter(|(_, t)| t.timestamp.is_some())
            .map(|(id, t)| (*id, t))
            .collect();
        entries.sort_by_key(|(_, t)| t.timestamp);
        entries
    }

    /// Whether giving `id` the time `timestamp` keeps it between its
    /// chronological neighbours among the stored timings.
    pub fn validate_timing(&self, id: &PointId, timestamp: DateTime<Utc>) -> bool {
        let ordered = self.ordered();
        let Some(position) = ordered.iter().position(|(other, _)| other == id) else {
            return true;
        };
        let previous = position
            .checked_sub(1)
            .and_then(|i| ordered[i].1.timestamp);
        let next = ordered.get(position + 1).and_then(|(_, t)| t.timestamp);

        !(previous.is_some_and(|p| timestamp < p) || next.is_some_and(|n| timestamp > n))
    }

    /// Writes a stored intent for the point's identity into the point.
    pub fn merge_into(&self, point: &mut TrackPoint) {
        let Some(timing) = point.id.as_ref().and_then(|id| self.timings.get(id)) else {
            return;
        };
        if let Some(timestamp) = timing.timestamp {
            point.geo.time = Some(timestamp);
        }
        if let Some(notes) = &timing.notes {
            point.notes = Some(notes.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.timings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timings.is_empty()
    }

    pub fn clear(&mut self) {
        self.timings.clear();
        self.active = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimingMode {
    /// Anchor timestamps are kept; routed points stay untimed.
    Explicit,
    /// Times are derived by the model from the projected speed.
    SpeedProjection(TimingFallback),
}

impl TimingMode {
    pub fn fallback(&self) -> TimingFallback {
        match self {
            Self::Explicit => TimingFallback::none(),
            Self::SpeedProjection(fallback) => *fallback,
        }
    }
}

/// Explicit timing applies when the first and last anchors carry times and
/// every timed interior anchor lies between its timed neighbours.
pub fn explicit_mode_applies(anchor_times: &[Option<DateTime<Utc>>]) -> bool {
    let (Some(Some(_)), Some(Some(_))) = (anchor_times.first(), anchor_times.last()) else {
        return false;
    };
    (1..anchor_times.len().saturating_sub(1)).all(|i| {
        match (anchor_times[i - 1], anchor_times[i], anchor_times[i + 1]) {
            (Some(previous), Some(current), Some(next)) => previous <= current && current <= next,
            _ => true,
        }
    })
}

/// The span being replaced, in the segment's original point indices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplacedSpan {
    pub start: usize,
    pub end: usize,
    /// Length of the replacement path in kilometers.
    pub replacing_distance: f64,
    pub start_time: Option<DateTime<Utc>>,
    /// Original time of the point at `end`.
    pub end_time: Option<DateTime<Utc>>,
}

/// Estimates the speed and start time for a replaced span so that the
/// segment keeps its global moving speed.
pub fn project_speed(stats: &SegmentStatistics, span: ReplacedSpan) -> TimingFallback {
    let global = &stats.global;
    let local = &stats.local;
    let no_projection = TimingFallback::new(None, span.start_time);
    if global.speed_moving <= 0.0 || stats.is_empty() {
        return no_projection;
    }

    let last = stats.len() - 1;
    let (start, end) = (span.start.min(last), span.end.min(last));
    let (start, end) = (start.min(end), end.max(start));

    let replaced_distance = local.distance_moving[end] - local.distance_moving[start];
    let span_moving_time = local.time_moving[end] - local.time_moving[start];
    let span_total_time = local.time_total[end] - local.time_total[start];

    let new_distance = global.distance_moving + span.replacing_distance - replaced_distance;
    let new_time = new_distance / global.speed_moving * 3600.0;
    let mut replacing_time = new_time - (global.time_moving - span_moving_time);
    if replacing_time <= 0.0 {
        replacing_time = span_total_time;
    }

    let speed = if replacing_time > 0.0 && span.replacing_distance > 0.0 {
        span.replacing_distance / replacing_time * 3600.0
    } else {
        global.speed_moving
    };

    let start_time = span.start_time.or_else(|| {
        let end_time = span.end_time?;
        let stopped = span_total_time - span_moving_time;
        let elapsed = replacing_time.max(0.0) + stopped.max(0.0);
        Some(end_time - Duration::milliseconds((elapsed * 1000.0).round() as i64))
    });

    debug!(speed, replacing_time, ?start_time, "projected splice timing");
    TimingFallback::new(Some(speed), start_time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Coordinates;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, h, m, 0).unwrap()
    }

    #[test]
    fn test_explicit_mode_in_order() {
        assert!(explicit_mode_applies(&[
            Some(at(10, 0)),
            Some(at(10, 5)),
            Some(at(10, 10))
        ]));
    }

    #[test]
    fn test_explicit_mode_rejects_out_of_order_interior() {
        assert!(!explicit_mode_applies(&[
            Some(at(10, 0)),
            Some(at(10, 15)),
            Some(at(10, 10))
        ]));
    }

    #[test]
    fn test_explicit_mode_needs_both_ends() {
        assert!(!explicit_mode_applies(&[None, Some(at(10, 5)), Some(at(10, 10))]));
        assert!(!explicit_mode_applies(&[Some(at(10, 0)), None]));
        assert!(explicit_mode_applies(&[Some(at(10, 0)), None, Some(at(10, 10))]));
    }

    #[test]
    fn test_store_keeps_notes_and_validates_order() {
        let mut store = AnchorTimingStore::new();
        let (a, b, c) = (PointId::new(), PointId::new(), PointId::new());
        let here = Coordinates::new(45.0, 6.0);
        store.set_timing(a, here, Some(at(9, 0)), Some("start".into()));
        store.set_timing(b, here, Some(at(9, 30)), None);
        store.set_timing(c, here, Some(at(10, 0)), None);

        store.set_timing(a, here, None, None);
        assert_eq!(store.get(&a).unwrap().notes.as_deref(), Some("start"));
        assert_eq!(store.get(&a).unwrap().timestamp, Some(at(9, 0)));

        assert!(store.validate_timing(&b, at(9, 45)));
        assert!(!store.validate_timing(&b, at(10, 30)));
        assert!(store.validate_timing(&PointId::new(), at(23, 0)));

        let ordered: Vec<_> = store.ordered().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ordered, vec![a, b, c]);
    }

    #[test]
    fn test_active_cleared_on_remove() {
        let mut store = AnchorTimingStore::new();
        let id = PointId::new();
        store.set_timing(id, Coordinates::new(0.0, 0.0), None, None);
        store.set_active(Some(id));
        assert!(store.active_timing().is_some());
        store.remove_timing(&id);
        assert_eq!(store.active(), None);
    }

    #[test]
    fn test_merge_into_point() {
        let mut store = AnchorTimingStore::new();
        let mut point = TrackPoint::new(Coordinates::new(1.0, 1.0));
        let id = point.ensure_id();
        store.set_timing(id, point.coordinates(), Some(at(12, 0)), Some("lunch".into()));
        store.merge_into(&mut point);
        assert_eq!(point.time(), Some(at(12, 0)));
        assert_eq!(point.notes.as_deref(), Some("lunch"));
    }

    fn stats_36kmh() -> SegmentStatistics {
        // 3 points, 1 km apart, 100 s apart: 36 km/h.
        let t0 = at(8, 0);
        let points: Vec<TrackPoint> = (0..3)
            .map(|i| {
                TrackPoint::new(Coordinates::new(45.0 + i as f64 * 0.008_993, 6.0))
                    .with_time(t0 + Duration::seconds(i * 100))
            })
            .collect();
        SegmentStatistics::compute(&points, 0.5)
    }

    #[test]
    fn test_speed_projection_keeps_global_speed() {
        let stats = stats_36kmh();
        let fallback = project_speed(
            &stats,
            ReplacedSpan {
                start: 1,
                end: 2,
                replacing_distance: 2.0,
                start_time: Some(at(8, 0) + Duration::seconds(100)),
                end_time: Some(at(8, 0) + Duration::seconds(200)),
            },
        );
        let speed = fallback.speed_kmh.unwrap();
        assert!((speed - 36.0).abs() < 0.5, "speed {speed}");
        assert_eq!(fallback.start_time, Some(at(8, 0) + Duration::seconds(100)));
    }

    #[test]
    fn test_speed_projection_back_computes_start() {
        let stats = stats_36kmh();
        let fallback = project_speed(
            &stats,
            ReplacedSpan {
                start: 0,
                end: 1,
                replacing_distance: 1.0,
                start_time: None,
                end_time: Some(at(8, 0) + Duration::seconds(100)),
            },
        );
        let start = fallback.start_time.unwrap();
        let offset = (start - at(8, 0)).num_seconds();
        assert!(offset.abs() <= 1, "offset {offset}");
    }

    #[test]
    fn test_no_speed_without_history() {
        let points = vec![
            TrackPoint::new(Coordinates::new(0.0, 0.0)),
            TrackPoint::new(Coordinates::new(0.0, 0.01)),
        ];
        let stats = SegmentStatistics::compute(&points, 0.5);
        let fallback = project_speed(
            &stats,
            ReplacedSpan {
                start: 0,
                end: 1,
                replacing_distance: 1.0,
                start_time: None,
                end_time: None,
            },
        );
        assert_eq!(fallback, TimingFallback::none());
    }
}
