use tracing::debug;
use track::{Coordinates, GeoPoint, RoutingError, RoutingService};

/// Offline router joining waypoints with straight legs.
///
/// Each leg is densified so that consecutive points are at most `spacing_m`
/// apart. Junction points between legs appear once.
pub struct StraightLineRouter {
    spacing_m: f64,
}

impl StraightLineRouter {
    pub fn new(spacing_m: f64) -> Self {
        Self { spacing_m }
    }

    fn leg(&self, from: Coordinates, to: Coordinates, out: &mut Vec<GeoPoint>) {
        let distance = from.distance_to(&to);
        let steps = if self.spacing_m > 0.0 && distance.is_finite() {
            (distance / self.spacing_m).ceil().max(1.0) as usize
        } else {
            1
        };
        for step in 1..steps {
            let ratio = step as f64 / steps as f64;
            out.push(GeoPoint::new(Coordinates::new(
                from.lat + (to.lat - from.lat) * ratio,
                from.lon + (to.lon - from.lon) * ratio,
            )));
        }
        out.push(GeoPoint::new(to));
    }
}

impl Default for StraightLineRouter {
    fn default() -> Self {
        Self::new(50.0)
    }
}

#[async_trait::async_trait]
impl RoutingService for StraightLineRouter {
    fn name(&self) -> &str {
        "straight-line"
    }

    async fn route(&self, waypoints: &[Coordinates]) -> Result<Vec<GeoPoint>, RoutingError> {
        let Some(first) = waypoints.first() else {
            return Err(RoutingError::Other("no waypoints".to_string()));
        };
        let mut points = vec![GeoPoint::new(*first)];
        for pair in waypoints.windows(2) {
            self.leg(pair[0], pair[1], &mut points);
        }
        debug!(waypoints = waypoints.len(), points = points.len(), "straight-line route");
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_route_hits_every_waypoint() {
        let router = StraightLineRouter::new(100.0);
        let a = Coordinates::new(46.0, 7.0);
        let b = Coordinates::new(46.005, 7.0);
        let c = Coordinates::new(46.005, 7.004);

        let points = router.route(&[a, b, c]).await.unwrap();
        assert_eq!(points.first().unwrap().coordinates, a);
        assert_eq!(points.last().unwrap().coordinates, c);
        assert_eq!(points.iter().filter(|p| p.coordinates == b).count(), 1);

        for pair in points.windows(2) {
            let gap = pair[0].coordinates.distance_to(&pair[1].coordinates);
            assert!(gap <= 100.0 + 1e-6, "gap {gap}");
            assert!(gap > 0.0);
        }
    }

    #[tokio::test]
    async fn test_zero_spacing_keeps_waypoints_only() {
        let router = StraightLineRouter::new(0.0);
        let waypoints = [Coordinates::new(46.0, 7.0), Coordinates::new(46.1, 7.1)];
        let points = router.route(&waypoints).await.unwrap();
        assert_eq!(points.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_waypoints() {
        let err = StraightLineRouter::default().route(&[]).await.unwrap_err();
        assert!(matches!(err, RoutingError::Other(_)));
    }
}
