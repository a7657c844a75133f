use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::debug;

use crate::{TrackError, TrackPoint};

/// Speed and start time used to derive timestamps for spliced points.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimingFallback {
    pub speed_kmh: Option<f64>,
    pub start_time: Option<DateTime<Utc>>,
}

impl TimingFallback {
    pub const fn none() -> Self {
        Self {
            speed_kmh: None,
            start_time: None,
        }
    }

    pub fn new(speed_kmh: Option<f64>, start_time: Option<DateTime<Utc>>) -> Self {
        Self {
            speed_kmh,
            start_time,
        }
    }

    fn usable_speed(&self) -> Option<f64> {
        self.speed_kmh.filter(|s| s.is_finite() && *s > 0.0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    #[serde(default)]
    pub points: Vec<TrackPoint>,
}

impl Segment {
    pub fn new(points: Vec<TrackPoint>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&TrackPoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&TrackPoint> {
        self.points.last()
    }

    pub fn anchor_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.points
            .iter()
            .enumerate()
            .filter(|(_, p)| p.anchor)
            .map(|(i, _)| i)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Track {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub segments: Vec<Segment>,
}

impl Track {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self {
            name: None,
            segments,
        }
    }
}

/// The edited file: an ordered list of tracks made of segments.
///
/// `replace_track_points` is the only primitive that changes point data; every
/// structural change bumps `revision`, which splice fencing compares against.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TrackFile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tracks: Vec<Track>,
    #[serde(skip)]
    revision: u64,
}

impl TrackFile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tracks: Vec::new(),
            revision: 0,
        }
    }

    pub fn with_tracks(mut self, tracks: Vec<Track>) -> Self {
        self.tracks = tracks;
        self
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn for_each_segment<F>(&self, mut visitor: F)
    where
        F: FnMut(&Segment, usize, usize),
    {
        for (track_index, track) in self.tracks.iter().enumerate() {
            for (segment_index, segment) in track.segments.iter().enumerate() {
                visitor(segment, track_index, segment_index);
            }
        }
    }

    pub fn segment(&self, track: usize, segment: usize) -> Result<&Segment, TrackError> {
        self.tracks
            .get(track)
            .ok_or(TrackError::TrackNotFound(track))?
            .segments
            .get(segment)
            .ok_or(TrackError::SegmentNotFound { track, segment })
    }

    fn segment_mut(&mut self, track: usize, segment: usize) -> Result<&mut Segment, TrackError> {
        self.tracks
            .get_mut(track)
            .ok_or(TrackError::TrackNotFound(track))?
            .segments
            .get_mut(segment)
            .ok_or(TrackError::SegmentNotFound { track, segment })
    }

    pub fn point(&self, track: usize, segment: usize, index: usize) -> Option<&TrackPoint> {
        self.segment(track, segment).ok()?.points.get(index)
    }

    /// Substitutes the points in `range` with `points`.
    ///
    /// An empty range inserts, an empty `points` deletes. When a usable
    /// fallback speed is given and the new points lack timestamps (or would
    /// start before the preceding point), their times are derived from
    /// cumulative distance at that speed. The call is rejected before any
    /// mutation when the range is out of bounds.
    pub fn replace_track_points(
        &mut self,
        track: usize,
        segment: usize,
        range: Range<usize>,
        mut points: Vec<TrackPoint>,
        fallback: TimingFallback,
    ) -> Result<(), TrackError> {
        let target = self.segment_mut(track, segment)?;
        let len = target.points.len();
        if range.start > range.end || range.end > len {
            return Err(TrackError::InvalidRange {
                track,
                segment,
                start: range.start,
                end: range.end,
                len,
            });
        }

        let previous = range
            .start
            .checked_sub(1)
            .and_then(|i| target.points.get(i))
            .cloned();
        if let Some(speed) = fallback.usable_speed() {
            retime(&mut points, speed, previous.as_ref(), fallback.start_time);
        }

        let old_last_time = range
            .end
            .checked_sub(1)
            .filter(|i| *i >= range.start)
            .and_then(|i| target.points[i].time());
        let new_last_time = points.last().and_then(|p| p.time()).or(previous.and_then(|p| p.time()));

        let inserted = points.len();
        target.points.splice(range.clone(), points);
        shift_trailing(
            &mut target.points[range.start + inserted..],
            old_last_time,
            new_last_time,
        );

        self.revision += 1;
        debug!(
            track,
            segment,
            start = range.start,
            end = range.end,
            inserted,
            revision = self.revision,
            "replaced track points"
        );
        Ok(())
    }

    /// Substitutes a range of whole tracks.
    pub fn replace_tracks(&mut self, range: Range<usize>, tracks: Vec<Track>) -> Result<(), TrackError> {
        if range.start > range.end || range.end > self.tracks.len() {
            return Err(TrackError::TrackNotFound(range.end));
        }
        self.tracks.splice(range, tracks);
        self.revision += 1;
        Ok(())
    }

    /// Substitutes a range of segments inside one track.
    pub fn replace_segments(
        &mut self,
        track: usize,
        range: Range<usize>,
        segments: Vec<Segment>,
    ) -> Result<(), TrackError> {
        let target = self
            .tracks
            .get_mut(track)
            .ok_or(TrackError::TrackNotFound(track))?;
        if range.start > range.end || range.end > target.segments.len() {
            return Err(TrackError::SegmentNotFound {
                track,
                segment: range.end,
            });
        }
        target.segments.splice(range, segments);
        self.revision += 1;
        Ok(())
    }

    /// Keeps only the points in `range`.
    pub fn crop(&mut self, track: usize, segment: usize, range: Range<usize>) -> Result<(), TrackError> {
        let target = self.segment_mut(track, segment)?;
        let len = target.points.len();
        if range.start > range.end || range.end > len {
            return Err(TrackError::InvalidRange {
                track,
                segment,
                start: range.start,
                end: range.end,
                len,
            });
        }
        target.points.truncate(range.end);
        target.points.drain(..range.start);
        self.revision += 1;
        Ok(())
    }
}

fn travel_time(from: &TrackPoint, to: &TrackPoint, speed_kmh: f64) -> Duration {
    let seconds = from.distance_to(to) / 1000.0 / speed_kmh * 3600.0;
    Duration::milliseconds((seconds * 1000.0).round() as i64)
}

fn retime(
    points: &mut [TrackPoint],
    speed_kmh: f64,
    previous: Option<&TrackPoint>,
    start_time: Option<DateTime<Utc>>,
) {
    let Some(first) = points.first() else {
        return;
    };

    let untimed = points.iter().any(|p| p.time().is_none());
    let out_of_order = matches!(
        (previous.and_then(|p| p.time()), first.time()),
        (Some(prev), Some(first)) if first < prev
    );
    if !untimed && !out_of_order {
        return;
    }

    // A timed preceding point always anchors the new times.
    let start = previous
        .and_then(|p| Some(p.time()? + travel_time(p, first, speed_kmh)))
        .or(start_time);
    let Some(start) = start else {
        return;
    };

    if untimed {
        let mut cursor = start;
        points[0].geo.time = Some(cursor);
        for i in 1..points.len() {
            cursor += travel_time(&points[i - 1], &points[i], speed_kmh);
            points[i].geo.time = Some(cursor);
        }
    } else if let Some(first_time) = first.time() {
        let delta = start - first_time;
        for point in points.iter_mut() {
            point.geo.time = point.geo.time.map(|t| t + delta);
        }
    }
}

fn shift_trailing(
    trailing: &mut [TrackPoint],
    old_last: Option<DateTime<Utc>>,
    new_last: Option<DateTime<Utc>>,
) {
    let (Some(new_last), Some(next)) = (new_last, trailing.first().and_then(|p| p.time())) else {
        return;
    };
    if next >= new_last {
        return;
    }
    let delta = match old_last {
        Some(old_last) => new_last - old_last,
        None => new_last - next,
    };
    for point in trailing.iter_mut() {
        point.geo.time = point.geo.time.map(|t| t + delta);
    }
}
