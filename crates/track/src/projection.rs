//! Closest-point queries against a polyline of track points.
//!
//! Projections are computed in a local equirectangular frame around each edge
//! (longitude scaled by the cosine of the edge's mean latitude), which is
//! accurate at the edge lengths GPS tracks and routed paths use. Distances
//! are reported as great-circle meters.

use crate::{Coordinates, TrackPoint};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosestPoint {
    /// Projection of the query onto the closest edge.
    pub point: Coordinates,
    /// Index of the closest edge's lower endpoint.
    pub index: usize,
    /// Position of the projection along the edge, in `[0, 1]`.
    pub ratio: f64,
    /// True when the edge vertex nearest to the query is the lower endpoint,
    /// i.e. that vertex lies before the projected position.
    pub before: bool,
    /// Distance in meters between the query and the projection.
    pub distance: f64,
}

impl ClosestPoint {
    /// Index of the existing vertex nearest to the query on the closest edge.
    pub fn vertex(&self) -> usize {
        if self.before {
            self.index
        } else {
            self.index + 1
        }
    }
}

/// Projects `query` onto the segment `a`-`b`, clamped to the segment.
/// Returns the projected coordinates and the ratio along the segment.
pub fn project_on_edge(a: Coordinates, b: Coordinates, query: Coordinates) -> (Coordinates, f64) {
    let scale = ((a.lat + b.lat) / 2.0).to_radians().cos();
    let (ax, ay) = (a.lon * scale, a.lat);
    let (bx, by) = (b.lon * scale, b.lat);
    let (qx, qy) = (query.lon * scale, query.lat);

    let (dx, dy) = (bx - ax, by - ay);
    let len2 = dx * dx + dy * dy;
    if len2 == 0.0 {
        return (a, 0.0);
    }

    let ratio = (((qx - ax) * dx + (qy - ay) * dy) / len2).clamp(0.0, 1.0);
    let projected = Coordinates::new(a.lat + (b.lat - a.lat) * ratio, a.lon + (b.lon - a.lon) * ratio);
    (projected, ratio)
}

/// Finds the point of `points` closest to `query`.
///
/// Edges are scanned in order and the first minimal distance wins. A single
/// point polyline yields that point.
pub fn closest_point_on_polyline(points: &[TrackPoint], query: Coordinates) -> Option<ClosestPoint> {
    let first = points.first()?;
    if points.len() == 1 {
        return Some(ClosestPoint {
            point: first.coordinates(),
            index: 0,
            ratio: 0.0,
            before: true,
            distance: first.coordinates().distance_to(&query),
        });
    }

    let mut best: Option<ClosestPoint> = None;
    for (index, edge) in points.windows(2).enumerate() {
        let (a, b) = (edge[0].coordinates(), edge[1].coordinates());
        let (projected, ratio) = project_on_edge(a, b, query);
        let distance = projected.distance_to(&query);
        if best.map_or(true, |b| distance < b.distance) {
            best = Some(ClosestPoint {
                point: projected,
                index,
                ratio,
                before: a.distance_to(&query) <= b.distance_to(&query),
                distance,
            });
        }
    }
    best
}
