//! Map viewport and selection collaborators.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::Coordinates;

const TILE_SIZE_PX: f64 = 256.0;
const MAX_MERCATOR_LAT: f64 = 85.051_128_78;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

impl ScreenPoint {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &ScreenPoint) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Web-mercator viewport: a center, a zoom level and a pixel size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub center: Coordinates,
    pub zoom: f64,
    pub width_px: f64,
    pub height_px: f64,
}

impl Viewport {
    pub fn new(center: Coordinates, zoom: f64, width_px: f64, height_px: f64) -> Self {
        Self {
            center,
            zoom,
            width_px,
            height_px,
        }
    }

    fn world_size(&self) -> f64 {
        TILE_SIZE_PX * 2f64.powf(self.zoom)
    }

    fn to_world(&self, coordinates: Coordinates) -> (f64, f64) {
        let size = self.world_size();
        let lat = coordinates.lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT).to_radians();
        let x = (coordinates.lon + 180.0) / 360.0 * size;
        let y = (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) / 2.0 * size;
        (x, y)
    }

    /// Pixel position of `coordinates` relative to the viewport's top-left corner.
    pub fn project(&self, coordinates: Coordinates) -> ScreenPoint {
        let (x, y) = self.to_world(coordinates);
        let (cx, cy) = self.to_world(self.center);
        ScreenPoint::new(x - cx + self.width_px / 2.0, y - cy + self.height_px / 2.0)
    }

    pub fn unproject(&self, point: ScreenPoint) -> Coordinates {
        let size = self.world_size();
        let (cx, cy) = self.to_world(self.center);
        let x = point.x - self.width_px / 2.0 + cx;
        let y = point.y - self.height_px / 2.0 + cy;
        let lon = x / size * 360.0 - 180.0;
        let n = PI * (1.0 - 2.0 * y / size);
        let lat = n.sinh().atan().to_degrees();
        Coordinates::new(lat, lon)
    }

    /// Great-circle length of the viewport diagonal in meters.
    pub fn diagonal_distance(&self) -> f64 {
        let top_left = self.unproject(ScreenPoint::new(0.0, 0.0));
        let bottom_right = self.unproject(ScreenPoint::new(self.width_px, self.height_px));
        top_left.distance_to(&bottom_right)
    }
}

/// Which segments currently accept editing gestures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentSelection {
    #[default]
    All,
    Track(usize),
    Segment { track: usize, segment: usize },
    Nothing,
}

impl SegmentSelection {
    pub fn is_eligible(&self, track: usize, segment: usize) -> bool {
        match *self {
            Self::All => true,
            Self::Track(t) => t == track,
            Self::Segment { track: t, segment: s } => t == track && s == segment,
            Self::Nothing => false,
        }
    }
}
