use chrono::{DateTime, Utc};
use geo::{Distance, Haversine, Point};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable identity of a track point, assigned lazily the first time the
/// point is interacted with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct PointId(pub Uuid);

impl PointId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Great-circle distance in meters.
    pub fn distance_to(&self, other: &Coordinates) -> f64 {
        Haversine::distance(self.to_point(), other.to_point())
    }

    pub(crate) fn to_point(self) -> Point<f64> {
        Point::new(self.lon, self.lat)
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.lat, self.lon)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    #[serde(flatten)]
    pub coordinates: Coordinates,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
}

impl GeoPoint {
    pub fn new(coordinates: Coordinates) -> Self {
        Self {
            coordinates,
            elevation: None,
            heading: None,
            time: None,
        }
    }

    pub fn with_elevation(mut self, elevation: f64) -> Self {
        self.elevation = Some(elevation);
        self
    }

    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }
}

impl From<Coordinates> for GeoPoint {
    fn from(coordinates: Coordinates) -> Self {
        Self::new(coordinates)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackPoint {
    #[serde(flatten)]
    pub geo: GeoPoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<PointId>,
    #[serde(default)]
    pub anchor: bool,
    /// Minimum map zoom at which the anchor becomes visible and interactive.
    #[serde(default)]
    pub zoom_threshold: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl TrackPoint {
    pub fn new(coordinates: Coordinates) -> Self {
        GeoPoint::new(coordinates).into()
    }

    /// A point flagged as an always-visible anchor.
    pub fn anchor_at(coordinates: Coordinates) -> Self {
        let mut point = Self::new(coordinates);
        point.mark_anchor();
        point
    }

    pub fn coordinates(&self) -> Coordinates {
        self.geo.coordinates
    }

    pub fn set_coordinates(&mut self, coordinates: Coordinates) {
        self.geo.coordinates = coordinates;
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.geo.time
    }

    pub fn distance_to(&self, other: &TrackPoint) -> f64 {
        self.geo.coordinates.distance_to(&other.geo.coordinates)
    }

    /// Returns the point identity, assigning a fresh one on first use.
    pub fn ensure_id(&mut self) -> PointId {
        *self.id.get_or_insert_with(PointId::new)
    }

    pub fn mark_anchor(&mut self) {
        self.anchor = true;
        self.zoom_threshold = 0.0;
    }

    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.geo.time = Some(time);
        self
    }

    pub fn with_elevation(mut self, elevation: f64) -> Self {
        self.geo.elevation = Some(elevation);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

impl From<GeoPoint> for TrackPoint {
    fn from(geo: GeoPoint) -> Self {
        Self {
            geo,
            id: None,
            anchor: false,
            zoom_threshold: 0.0,
            notes: None,
        }
    }
}

/// Total great-circle length of a point sequence in kilometers.
pub fn path_length_km(points: &[TrackPoint]) -> f64 {
    points
        .windows(2)
        .map(|pair| pair[0].distance_to(&pair[1]))
        .sum::<f64>()
        / 1000.0
}
