//! Playback of a timed path: position interpolation, the frame-driven
//! clock and summary statistics.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

use crate::{Coordinates, TrackFile, TrackPoint};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedPoint {
    pub time: DateTime<Utc>,
    pub coordinates: Coordinates,
    pub elevation: Option<f64>,
    pub heading: Option<f64>,
}

impl TimedPoint {
    pub fn from_track_point(point: &TrackPoint) -> Option<Self> {
        Some(Self {
            time: point.time()?,
            coordinates: point.coordinates(),
            elevation: point.geo.elevation,
            heading: point.geo.heading,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        time >= self.start && time <= self.end
    }

    pub fn clamp(&self, time: DateTime<Utc>) -> DateTime<Utc> {
        time.max(self.start).min(self.end)
    }
}

/// Timed points in chronological order. Untimed points are dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackData {
    points: Vec<TimedPoint>,
}

impl PlaybackData {
    pub fn new(mut points: Vec<TimedPoint>) -> Self {
        points.sort_by_key(|p| p.time);
        Self { points }
    }

    pub fn from_points(points: &[TrackPoint]) -> Self {
        Self::new(points.iter().filter_map(TimedPoint::from_track_point).collect())
    }

    /// Every timed point of the file, across tracks and segments.
    pub fn from_file(file: &TrackFile) -> Self {
        let mut points = Vec::new();
        file.for_each_segment(|segment, _, _| {
            points.extend(segment.points.iter().filter_map(TimedPoint::from_track_point));
        });
        Self::new(points)
    }

    pub fn points(&self) -> &[TimedPoint] {
        &self.points
    }

    pub fn time_range(&self) -> Option<TimeRange> {
        Some(TimeRange::new(self.points.first()?.time, self.points.last()?.time))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InterpolatedPosition {
    pub coordinates: Coordinates,
    pub elevation: Option<f64>,
    pub heading: Option<f64>,
}

impl From<&TimedPoint> for InterpolatedPosition {
    fn from(point: &TimedPoint) -> Self {
        Self {
            coordinates: point.coordinates,
            elevation: point.elevation,
            heading: point.heading,
        }
    }
}

/// Position along `points` at `time`, clamped to the points' time span and
/// to `filter` when given. An exact timestamp match returns that point.
pub fn interpolate(
    points: &[TimedPoint],
    time: DateTime<Utc>,
    filter: Option<&TimeRange>,
) -> Option<InterpolatedPosition> {
    let (first, last) = (points.first()?, points.last()?);
    let mut time = time.max(first.time).min(last.time);
    if let Some(filter) = filter {
        time = filter.clamp(time).max(first.time).min(last.time);
    }

    let index = points.partition_point(|p| p.time < time);
    let next = points.get(index)?;
    if next.time == time || index == 0 {
        return Some(next.into());
    }
    let current = &points[index - 1];

    let span = (next.time - current.time).num_milliseconds() as f64;
    let factor = (time - current.time).num_milliseconds() as f64 / span;
    let lerp = |a: f64, b: f64| a + (b - a) * factor;

    let coordinates = Coordinates::new(
        lerp(current.coordinates.lat, next.coordinates.lat),
        lerp(current.coordinates.lon, next.coordinates.lon),
    );
    let elevation = match (current.elevation, next.elevation) {
        (Some(a), Some(b)) => Some(lerp(a, b)),
        _ => None,
    };
    let heading = match (current.heading, next.heading) {
        (Some(a), Some(b)) => lerp(a, b),
        _ => (next.coordinates.lon - current.coordinates.lon)
            .atan2(next.coordinates.lat - current.coordinates.lat)
            .to_degrees(),
    };

    Some(InterpolatedPosition {
        coordinates,
        elevation,
        heading: Some(heading),
    })
}

/// Frame-driven playback clock over a timed path.
#[derive(Debug, Clone)]
pub struct Playback {
    data: PlaybackData,
    current: DateTime<Utc>,
    playing: bool,
    speed: f64,
    filter: Option<TimeRange>,
    last_frame: Option<Instant>,
}

impl Playback {
    pub fn new(data: PlaybackData) -> Self {
        let current = data.time_range().map(|r| r.start).unwrap_or_default();
        Self {
            data,
            current,
            playing: false,
            speed: 1.0,
            filter: None,
            last_frame: None,
        }
    }

    pub fn data(&self) -> &PlaybackData {
        &self.data
    }

    pub fn current_time(&self) -> DateTime<Utc> {
        self.current
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn filter(&self) -> Option<&TimeRange> {
        self.filter.as_ref()
    }

    /// The active filter, or the data's own time span.
    pub fn bounds(&self) -> Option<TimeRange> {
        self.filter.or_else(|| self.data.time_range())
    }

    pub fn play(&mut self) {
        if self.data.points.is_empty() {
            return;
        }
        self.playing = true;
        self.last_frame = None;
    }

    pub fn pause(&mut self) {
        self.playing = false;
        self.last_frame = None;
    }

    pub fn toggle(&mut self) {
        if self.playing {
            self.pause();
        } else {
            self.play();
        }
    }

    /// Ignores speeds that are not finite and positive.
    pub fn set_speed(&mut self, speed: f64) {
        if speed.is_finite() && speed > 0.0 {
            self.speed = speed;
        } else {
            debug!(speed, "playback speed rejected");
        }
    }

    pub fn seek(&mut self, time: DateTime<Utc>) {
        self.current = match self.bounds() {
            Some(bounds) => bounds.clamp(time),
            None => time,
        };
        self.last_frame = None;
    }

    /// Restricts playback to `filter`, rewinding to its start and pausing.
    pub fn set_time_filter(&mut self, filter: Option<TimeRange>) {
        self.filter = filter;
        if let Some(bounds) = self.bounds() {
            self.current = bounds.start;
        }
        self.pause();
    }

    pub fn position(&self) -> Option<InterpolatedPosition> {
        interpolate(&self.data.points, self.current, self.filter.as_ref())
    }

    /// Advances by the real time elapsed since the previous frame, scaled by
    /// the playback speed. The first frame after starting only records its
    /// timestamp. Reaching the end of the bounds clamps to it and pauses.
    pub fn advance_frame(&mut self, now: Instant) -> Option<InterpolatedPosition> {
        if !self.playing {
            return None;
        }
        let previous = self.last_frame.replace(now)?;
        let elapsed = now.saturating_duration_since(previous).as_secs_f64() * 1000.0 * self.speed;
        let bounds = self.bounds()?;
        // Float to int casts saturate; an overflowing step lands on the end.
        let advanced = Duration::try_milliseconds(elapsed.round() as i64)
            .and_then(|step| self.current.checked_add_signed(step))
            .unwrap_or(bounds.end)
            .max(bounds.start);

        if advanced >= bounds.end {
            self.current = bounds.end;
            self.pause();
            debug!(time = %self.current, "playback reached the end");
        } else {
            self.current = advanced;
        }
        self.position()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryThresholds {
    pub min_interval_secs: f64,
    pub max_interval_secs: f64,
    /// Faster pairs are treated as GPS glitches.
    pub max_speed_kmh: f64,
}

impl Default for SummaryThresholds {
    fn default() -> Self {
        Self {
            min_interval_secs: 1.0,
            max_interval_secs: 3600.0,
            max_speed_kmh: 200.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSummary {
    pub distance_km: f64,
    pub duration_secs: f64,
    pub average_speed_kmh: f64,
    pub max_speed_kmh: f64,
}

/// Distance, duration and speeds of the points inside `range`.
pub fn summarize(
    points: &[TimedPoint],
    range: Option<&TimeRange>,
    thresholds: &SummaryThresholds,
) -> Option<PlaybackSummary> {
    let selected: Vec<&TimedPoint> = points
        .iter()
        .filter(|p| range.map_or(true, |r| r.contains(p.time)))
        .collect();
    let (first, last) = (selected.first()?, selected.last()?);
    if selected.len() < 2 {
        return None;
    }

    let mut summary = PlaybackSummary {
        distance_km: 0.0,
        duration_secs: (last.time - first.time).num_milliseconds() as f64 / 1000.0,
        average_speed_kmh: 0.0,
        max_speed_kmh: 0.0,
    };
    let (mut valid_km, mut valid_secs) = (0.0, 0.0);
    for pair in selected.windows(2) {
        let km = pair[0].coordinates.distance_to(&pair[1].coordinates) / 1000.0;
        summary.distance_km += km;

        let secs = (pair[1].time - pair[0].time).num_milliseconds() as f64 / 1000.0;
        if secs < thresholds.min_interval_secs || secs > thresholds.max_interval_secs {
            continue;
        }
        let speed = km / secs * 3600.0;
        if speed >= thresholds.max_speed_kmh {
            continue;
        }
        valid_km += km;
        valid_secs += secs;
        summary.max_speed_kmh = summary.max_speed_kmh.max(speed);
    }
    if valid_secs > 0.0 {
        summary.average_speed_kmh = valid_km / valid_secs * 3600.0;
    }
    Some(summary)
}
