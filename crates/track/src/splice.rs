//! Routing splice engine.
//!
//! A splice is planned synchronously against the current file, routed
//! asynchronously without touching the file, and applied in one
//! `replace_track_points` call once the fence admits it. A failed route
//! leaves nothing to undo.

use chrono::{DateTime, Utc};
use std::ops::Range;
use tracing::{debug, info, warn};

use crate::projection::closest_point_on_polyline;
use crate::timing::{explicit_mode_applies, project_speed, ReplacedSpan};
use crate::{
    path_length_km, AnchorPosition, AnchorTimingStore, Coordinates, RoutingError, RoutingService,
    SegmentStatistics, SpliceFence, SpliceTicket, TimingMode, TrackError, TrackFile, TrackPoint,
};

/// One anchor taking part in a splice, with the coordinates it should end up at.
#[derive(Debug, Clone, PartialEq)]
pub struct SpliceAnchor {
    pub position: AnchorPosition,
    pub point: TrackPoint,
    pub target: Coordinates,
}

impl SpliceAnchor {
    /// An anchor that stays where it is.
    pub fn fixed(position: AnchorPosition, point: TrackPoint) -> Self {
        let target = point.coordinates();
        Self {
            position,
            point,
            target,
        }
    }

    pub fn moved(position: AnchorPosition, point: TrackPoint, target: Coordinates) -> Self {
        Self {
            position,
            point,
            target,
        }
    }

    pub fn is_fixed(&self) -> bool {
        self.point.coordinates() == self.target
    }
}

/// Everything needed to route a splice, captured when it was planned.
#[derive(Debug, Clone)]
pub struct RoutePlan {
    pub ticket: SpliceTicket,
    pub anchors: Vec<SpliceAnchor>,
    pub range: Range<usize>,
    stats: SegmentStatistics,
    end_time: Option<DateTime<Utc>>,
}

impl RoutePlan {
    pub fn track(&self) -> usize {
        self.ticket.track
    }

    pub fn segment(&self) -> usize {
        self.ticket.segment
    }

    pub fn waypoints(&self) -> Vec<Coordinates> {
        self.anchors.iter().map(|a| a.target).collect()
    }

    /// Whether routing this plan needs the routing service.
    pub fn needs_network(&self) -> bool {
        self.anchors.len() > 1
    }
}

/// A routed splice ready to be applied.
#[derive(Debug, Clone, PartialEq)]
pub struct NewGeometry {
    pub ticket: SpliceTicket,
    pub range: Range<usize>,
    pub points: Vec<TrackPoint>,
    pub timing: TimingMode,
}

#[derive(Debug, Clone, Default)]
pub struct SpliceEngine {
    fence: SpliceFence,
    min_moving_speed_kmh: f64,
}

impl SpliceEngine {
    pub fn new(min_moving_speed_kmh: f64) -> Self {
        Self {
            fence: SpliceFence::new(),
            min_moving_speed_kmh,
        }
    }

    /// Captures a splice over 1 to 3 ordered anchors of one segment. Pending
    /// timing intents are merged into the anchor points.
    pub fn plan(
        &mut self,
        file: &TrackFile,
        timings: &AnchorTimingStore,
        track: usize,
        segment: usize,
        mut anchors: Vec<SpliceAnchor>,
    ) -> Result<RoutePlan, TrackError> {
        let points = &file.segment(track, segment)?.points;
        let (Some(first), Some(last)) = (anchors.first(), anchors.last()) else {
            return Err(TrackError::NoEligibleTarget);
        };
        let range = first.position.replace_start()..last.position.replace_end();
        let ordered = anchors.windows(2).all(|w| w[0].position < w[1].position);
        if anchors.len() > 3 || !ordered || range.start > range.end || range.end > points.len() {
            return Err(TrackError::InvalidRange {
                track,
                segment,
                start: range.start,
                end: range.end,
                len: points.len(),
            });
        }

        let end_time = points.get(last.position.index).and_then(|p| p.time());
        for anchor in &mut anchors {
            timings.merge_into(&mut anchor.point);
        }

        let ticket = self.fence.issue(file, track, segment);
        debug!(
            ticket = ticket.id,
            track,
            segment,
            anchors = anchors.len(),
            start = range.start,
            end = range.end,
            "splice planned"
        );
        Ok(RoutePlan {
            ticket,
            anchors,
            range,
            stats: SegmentStatistics::compute(points, self.min_moving_speed_kmh),
            end_time,
        })
    }

    /// Routes a plan and stitches the response between its anchors.
    pub async fn route(plan: &RoutePlan, service: &dyn RoutingService) -> Result<NewGeometry, TrackError> {
        if let [single] = plan.anchors.as_slice() {
            let mut point = single.point.clone();
            point.set_coordinates(single.target);
            point.geo.elevation = None;
            point.geo.heading = None;
            point.mark_anchor();
            return Ok(NewGeometry {
                ticket: plan.ticket,
                range: plan.range.clone(),
                points: vec![point],
                timing: TimingMode::Explicit,
            });
        }

        let waypoints = plan.waypoints();
        let response = match service.route(&waypoints).await {
            Ok(response) if !response.is_empty() => response,
            Ok(_) => return Err(RoutingError::Other("empty route".to_string()).into()),
            Err(err) => {
                warn!(service = service.name(), ticket = plan.ticket.id, %err, "routing failed");
                return Err(err.into());
            }
        };
        let points = stitch(&plan.anchors, response.into_iter().map(TrackPoint::from).collect());
        let timing = reconcile_timing(plan, &points);

        debug!(
            ticket = plan.ticket.id,
            points = points.len(),
            ?timing,
            "splice routed"
        );
        Ok(NewGeometry {
            ticket: plan.ticket,
            range: plan.range.clone(),
            points,
            timing,
        })
    }

    /// Applies a routed splice if its ticket is still admitted.
    pub fn apply(&self, file: &mut TrackFile, geometry: NewGeometry) -> Result<(), TrackError> {
        self.fence.admit(file, &geometry.ticket)?;
        let ticket = geometry.ticket;
        let inserted = geometry.points.len();
        file.replace_track_points(
            ticket.track,
            ticket.segment,
            geometry.range,
            geometry.points,
            geometry.timing.fallback(),
        )?;
        info!(
            ticket = ticket.id,
            track = ticket.track,
            segment = ticket.segment,
            inserted,
            "splice applied"
        );
        Ok(())
    }
}

fn restamp(point: &mut TrackPoint, original: &TrackPoint) {
    point.id = original.id;
    if original.time().is_some() {
        point.geo.time = original.time();
    }
    if original.notes.is_some() {
        point.notes = original.notes.clone();
    }
}

/// Places the anchors into the routed path. Fixed boundary anchors are kept
/// verbatim around the response; a moved boundary anchor becomes the
/// response's boundary point. Interior anchors snap to the closest routed
/// vertex.
fn stitch(anchors: &[SpliceAnchor], mut points: Vec<TrackPoint>) -> Vec<TrackPoint> {
    let (Some(first), Some(last)) = (anchors.first(), anchors.last()) else {
        return points;
    };

    if first.is_fixed() {
        points.insert(0, first.point.clone());
    } else {
        restamp(&mut points[0], &first.point);
    }
    if last.is_fixed() {
        points.push(last.point.clone());
    } else if let Some(end) = points.last_mut() {
        restamp(end, &last.point);
    }
    if let Some(end) = points.last_mut() {
        end.mark_anchor();
    }
    points[0].mark_anchor();

    if anchors.len() == 3 {
        let interior = &anchors[1];
        let upper = points.len().saturating_sub(1).max(1);
        let candidates = &points[1..upper];
        match closest_point_on_polyline(candidates, interior.target) {
            Some(closest) => {
                let point = &mut points[closest.vertex() + 1];
                restamp(point, &interior.point);
                point.mark_anchor();
            }
            None => {
                let mut point = interior.point.clone();
                point.set_coordinates(interior.target);
                point.mark_anchor();
                points.insert(1, point);
            }
        }
    }
    points
}

fn reconcile_timing(plan: &RoutePlan, points: &[TrackPoint]) -> TimingMode {
    let anchor_times: Vec<_> = plan.anchors.iter().map(|a| a.point.time()).collect();
    if explicit_mode_applies(&anchor_times) {
        return TimingMode::Explicit;
    }

    let first = &plan.anchors[0];
    let last = &plan.anchors[plan.anchors.len() - 1];
    TimingMode::SpeedProjection(project_speed(
        &plan.stats,
        ReplacedSpan {
            start: first.position.index,
            end: last.position.index,
            replacing_distance: path_length_km(points),
            start_time: points.first().and_then(|p| p.time()),
            end_time: plan.end_time,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GeoPoint, Segment, Track};

    fn anchor(lat: f64, lon: f64) -> TrackPoint {
        TrackPoint::anchor_at(Coordinates::new(lat, lon))
    }

    fn routed(coords: &[(f64, f64)]) -> Vec<TrackPoint> {
        coords
            .iter()
            .map(|&(lat, lon)| TrackPoint::from(GeoPoint::new(Coordinates::new(lat, lon))))
            .collect()
    }

    #[test]
    fn test_fixed_boundaries_wrap_the_response() {
        let a = anchor(0.0, 0.0);
        let c = anchor(0.0, 0.02);
        let anchors = vec![
            SpliceAnchor::fixed(AnchorPosition::at(0), a.clone()),
            SpliceAnchor::fixed(AnchorPosition::at(4), c.clone()),
        ];
        let stitched = stitch(&anchors, routed(&[(0.00001, 0.0), (0.0, 0.01), (0.00001, 0.02)]));
        assert_eq!(stitched.len(), 5);
        assert_eq!(stitched[0], a);
        assert_eq!(stitched[4], c);
    }

    #[test]
    fn test_moved_boundary_takes_response_point() {
        let a = anchor(0.0, 0.0);
        let mut c = anchor(0.0, 0.02).with_notes("camp");
        let id = c.ensure_id();
        let anchors = vec![
            SpliceAnchor::fixed(AnchorPosition::at(0), a),
            SpliceAnchor::moved(AnchorPosition::at(4), c, Coordinates::new(0.01, 0.03)),
        ];
        let stitched = stitch(&anchors, routed(&[(0.0, 0.0), (0.005, 0.02), (0.01, 0.0299)]));
        let end = stitched.last().unwrap();
        assert_eq!(stitched.len(), 4);
        assert_eq!(end.coordinates(), Coordinates::new(0.01, 0.0299));
        assert_eq!(end.id, Some(id));
        assert_eq!(end.notes.as_deref(), Some("camp"));
        assert!(end.anchor);
    }

    #[test]
    fn test_interior_anchor_snaps_to_route() {
        let mut moved = TrackPoint::new(Coordinates::new(0.0, 0.01)).with_notes("pass");
        moved.mark_anchor();
        let anchors = vec![
            SpliceAnchor::fixed(AnchorPosition::at(0), anchor(0.0, 0.0)),
            SpliceAnchor::moved(AnchorPosition::at(5), moved, Coordinates::new(0.002, 0.011)),
            SpliceAnchor::fixed(AnchorPosition::at(9), anchor(0.0, 0.02)),
        ];
        let stitched = stitch(
            &anchors,
            routed(&[(0.0, 0.0), (0.001, 0.005), (0.002, 0.0108), (0.001, 0.015), (0.0, 0.02)]),
        );
        assert_eq!(stitched.len(), 7);
        assert!(stitched[3].anchor);
        assert_eq!(stitched[3].notes.as_deref(), Some("pass"));
        assert!(!stitched[2].anchor);
    }

    struct Fixed(Vec<GeoPoint>);

    #[async_trait::async_trait]
    impl RoutingService for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn route(&self, _waypoints: &[Coordinates]) -> Result<Vec<GeoPoint>, RoutingError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_single_anchor_needs_no_network() {
        let mut point = anchor(1.0, 1.0).with_notes("only");
        point.ensure_id();
        let file = TrackFile::new("single")
            .with_tracks(vec![Track::new(vec![Segment::new(vec![point.clone()])])]);
        let mut engine = SpliceEngine::new(0.5);
        let plan = engine
            .plan(
                &file,
                &AnchorTimingStore::new(),
                0,
                0,
                vec![SpliceAnchor::moved(AnchorPosition::at(0), point.clone(), Coordinates::new(2.0, 2.0))],
            )
            .unwrap();
        assert!(!plan.needs_network());

        let geometry = SpliceEngine::route(&plan, &Fixed(Vec::new())).await.unwrap();
        assert_eq!(geometry.range, 0..1);
        assert_eq!(geometry.points[0].coordinates(), Coordinates::new(2.0, 2.0));
        assert_eq!(geometry.points[0].id, point.id);
        assert_eq!(geometry.points[0].notes.as_deref(), Some("only"));
    }

    #[tokio::test]
    async fn test_empty_response_is_an_error() {
        let points = vec![anchor(0.0, 0.0), anchor(0.0, 0.01)];
        let file = TrackFile::new("empty").with_tracks(vec![Track::new(vec![Segment::new(points.clone())])]);
        let mut engine = SpliceEngine::new(0.5);
        let plan = engine
            .plan(
                &file,
                &AnchorTimingStore::new(),
                0,
                0,
                vec![
                    SpliceAnchor::fixed(AnchorPosition::at(0), points[0].clone()),
                    SpliceAnchor::moved(AnchorPosition::at(1), points[1].clone(), Coordinates::new(0.0, 0.02)),
                ],
            )
            .unwrap();
        let err = SpliceEngine::route(&plan, &Fixed(Vec::new())).await.unwrap_err();
        assert!(matches!(err, TrackError::Routing(RoutingError::Other(_))));
    }

    #[test]
    fn test_plan_rejects_unordered_anchors() {
        let points = vec![anchor(0.0, 0.0), anchor(0.0, 0.01)];
        let file = TrackFile::new("order").with_tracks(vec![Track::new(vec![Segment::new(points.clone())])]);
        let mut engine = SpliceEngine::new(0.5);
        let result = engine.plan(
            &file,
            &AnchorTimingStore::new(),
            0,
            0,
            vec![
                SpliceAnchor::fixed(AnchorPosition::at(1), points[1].clone()),
                SpliceAnchor::fixed(AnchorPosition::at(0), points[0].clone()),
            ],
        );
        assert!(matches!(result, Err(TrackError::InvalidRange { .. })));
    }
}
