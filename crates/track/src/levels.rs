//! Anchor zoom levels for freshly imported segments.

use geo::{Coord, LineString, SimplifyIdx};

use crate::TrackPoint;

pub const MAX_ANCHOR_ZOOM: u8 = 20;

const EARTH_CIRCUMFERENCE_M: f64 = 40_075_016.686;
const METERS_PER_DEGREE: f64 = 111_320.0;
const TILE_SIZE_PX: f64 = 256.0;

/// Simplification tolerance, in degrees, equivalent to one screen pixel at
/// `zoom` around `latitude`.
fn tolerance_degrees(zoom: u8, latitude: f64) -> f64 {
    let meters_per_pixel =
        EARTH_CIRCUMFERENCE_M * latitude.to_radians().cos().abs() / (TILE_SIZE_PX * 2f64.powi(zoom as i32));
    meters_per_pixel / METERS_PER_DEGREE
}

/// Flags as anchors the points that survive simplification at some zoom
/// level, recording the lowest such level. Segments that already carry
/// anchors are left untouched. Returns whether anything changed.
pub fn assign_anchor_levels(points: &mut [TrackPoint]) -> bool {
    if points.is_empty() || points.iter().any(|p| p.anchor) {
        return false;
    }

    let mean_lat = points.iter().map(|p| p.geo.coordinates.lat).sum::<f64>() / points.len() as f64;
    let line: LineString<f64> = points
        .iter()
        .map(|p| Coord {
            x: p.geo.coordinates.lon,
            y: p.geo.coordinates.lat,
        })
        .collect();

    let mut levels: Vec<Option<u8>> = vec![None; points.len()];
    for zoom in 0..=MAX_ANCHOR_ZOOM {
        let kept = line.simplify_idx(&tolerance_degrees(zoom, mean_lat));
        for index in kept {
            levels[index].get_or_insert(zoom);
        }
    }

    let last = points.len() - 1;
    levels[0] = Some(0);
    levels[last] = Some(0);

    for (point, level) in points.iter_mut().zip(levels) {
        if let Some(zoom) = level {
            point.anchor = true;
            point.zoom_threshold = f64::from(zoom);
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Coordinates;

    #[test]
    fn test_endpoints_are_always_visible() {
        let mut points: Vec<TrackPoint> = (0..10)
            .map(|i| TrackPoint::new(Coordinates::new(45.0, 6.0 + i as f64 * 0.0001)))
            .collect();
        assert!(assign_anchor_levels(&mut points));

        assert!(points[0].anchor);
        assert_eq!(points[0].zoom_threshold, 0.0);
        assert!(points[9].anchor);
        assert_eq!(points[9].zoom_threshold, 0.0);
        // Collinear interior points never survive simplification.
        assert!(!points[5].anchor);
    }

    #[test]
    fn test_sharp_corner_is_visible_early() {
        let mut points = vec![
            TrackPoint::new(Coordinates::new(45.0, 6.0)),
            TrackPoint::new(Coordinates::new(45.0, 6.00001)),
            TrackPoint::new(Coordinates::new(45.2, 6.2)),
            TrackPoint::new(Coordinates::new(45.0, 6.4)),
        ];
        assign_anchor_levels(&mut points);
        assert!(points[2].anchor);
        assert!(points[2].zoom_threshold <= 5.0);
        assert!(points[1].zoom_threshold > points[2].zoom_threshold || !points[1].anchor);
    }

    #[test]
    fn test_existing_anchors_are_preserved() {
        let mut points = vec![
            TrackPoint::anchor_at(Coordinates::new(45.0, 6.0)),
            TrackPoint::new(Coordinates::new(45.1, 6.0)),
        ];
        assert!(!assign_anchor_levels(&mut points));
        assert!(!points[1].anchor);
    }
}
