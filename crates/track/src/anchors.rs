//! Anchor registry: the anchors of the edited file as a view over flagged
//! track points, their visibility, and the temporary preview anchor.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

use crate::projection::closest_point_on_polyline;
use crate::{
    ClosestPoint, Coordinates, PointId, ScreenPoint, SegmentSelection, TrackError, TrackFile, TrackPoint,
    Viewport,
};

/// Where an anchor sits relative to an existing point of its segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Offset {
    /// A new point inserted immediately before the point.
    Before,
    /// The point itself.
    At,
    /// A new point inserted immediately after the point.
    After,
}

/// Ordered position of an anchor inside a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AnchorPosition {
    pub index: usize,
    pub offset: Offset,
}

impl AnchorPosition {
    pub const fn at(index: usize) -> Self {
        Self {
            index,
            offset: Offset::At,
        }
    }

    pub const fn before(index: usize) -> Self {
        Self {
            index,
            offset: Offset::Before,
        }
    }

    pub const fn after(index: usize) -> Self {
        Self {
            index,
            offset: Offset::After,
        }
    }

    /// First point index a splice starting at this anchor replaces.
    pub fn replace_start(&self) -> usize {
        match self.offset {
            Offset::After => self.index + 1,
            Offset::Before | Offset::At => self.index,
        }
    }

    /// Exclusive end of a splice ending at this anchor.
    pub fn replace_end(&self) -> usize {
        match self.offset {
            Offset::Before => self.index,
            Offset::At | Offset::After => self.index + 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Anchor {
    pub track: usize,
    pub segment: usize,
    pub index: usize,
    pub point: TrackPoint,
    /// The map is zoomed in at least to the anchor's threshold.
    pub in_zoom: bool,
    /// In zoom and close enough to the viewport to be displayed.
    pub shown: bool,
}

impl Anchor {
    pub fn position(&self) -> AnchorPosition {
        AnchorPosition::at(self.index)
    }

    pub fn coordinates(&self) -> Coordinates {
        self.point.coordinates()
    }

    fn key(&self) -> (usize, usize, usize) {
        (self.track, self.segment, self.index)
    }
}

/// Preview anchor following the pointer over an eligible segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemporaryAnchor {
    pub coordinates: Coordinates,
    pub track: usize,
    pub segment: usize,
}

/// A point to insert when the temporary anchor is promoted.
#[derive(Debug, Clone, PartialEq)]
pub struct Promotion {
    pub track: usize,
    pub segment: usize,
    pub insert_at: usize,
    pub point: TrackPoint,
}

/// Where a released temporary anchor lands.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub track: usize,
    pub segment: usize,
    pub position: AnchorPosition,
    pub point: TrackPoint,
}

/// Closest point over every eligible segment holding at least `min_points`
/// points. Segments are scanned in file order and the first minimum wins.
pub fn closest_eligible(
    file: &TrackFile,
    selection: &SegmentSelection,
    query: Coordinates,
    min_points: usize,
) -> Option<(usize, usize, ClosestPoint)> {
    let mut best: Option<(usize, usize, ClosestPoint)> = None;
    file.for_each_segment(|segment, track, index| {
        if segment.len() < min_points.max(1) || !selection.is_eligible(track, index) {
            return;
        }
        if let Some(closest) = closest_point_on_polyline(&segment.points, query) {
            if best.as_ref().map_or(true, |(_, _, b)| closest.distance < b.distance) {
                best = Some((track, index, closest));
            }
        }
    });
    best
}

#[derive(Debug, Clone, Default)]
pub struct AnchorRegistry {
    anchors: Vec<Anchor>,
    temporary: Option<TemporaryAnchor>,
}

impl AnchorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-reads the anchors from the file. Visibility is recomputed when a
    /// viewport is known, otherwise every anchor counts as shown.
    pub fn rebuild(&mut self, file: &TrackFile, viewport: Option<&Viewport>) {
        self.anchors.clear();
        file.for_each_segment(|segment, track, segment_index| {
            for index in segment.anchor_indices() {
                self.anchors.push(Anchor {
                    track,
                    segment: segment_index,
                    index,
                    point: segment.points[index].clone(),
                    in_zoom: true,
                    shown: true,
                });
            }
        });
        if let Some(viewport) = viewport {
            self.update_visibility(viewport);
        }
        debug!(anchors = self.anchors.len(), "anchor registry rebuilt");
    }

    pub fn update_visibility(&mut self, viewport: &Viewport) {
        let diagonal = viewport.diagonal_distance();
        for anchor in &mut self.anchors {
            anchor.in_zoom = anchor.point.zoom_threshold <= viewport.zoom;
            anchor.shown = anchor.in_zoom && viewport.center.distance_to(&anchor.coordinates()) < diagonal;
        }
    }

    pub fn anchors(&self) -> &[Anchor] {
        &self.anchors
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn shown(&self) -> impl Iterator<Item = &Anchor> {
        self.anchors.iter().filter(|a| a.shown)
    }

    pub fn segment_anchors(&self, track: usize, segment: usize) -> impl Iterator<Item = &Anchor> {
        self.anchors
            .iter()
            .filter(move |a| a.track == track && a.segment == segment)
    }

    pub fn get(&self, track: usize, segment: usize, index: usize) -> Option<&Anchor> {
        self.anchors
            .binary_search_by(|a| a.key().cmp(&(track, segment, index)))
            .ok()
            .map(|i| &self.anchors[i])
    }

    pub fn find_by_id(&self, id: &PointId) -> Option<&Anchor> {
        self.anchors.iter().find(|a| a.point.id.as_ref() == Some(id))
    }

    /// The last anchor of the file.
    pub fn last(&self) -> Option<&Anchor> {
        self.anchors.last()
    }

    /// Nearest in-zoom anchors of the same segment before and after
    /// `position`.
    pub fn neighbours(
        &self,
        track: usize,
        segment: usize,
        position: AnchorPosition,
    ) -> (Option<&Anchor>, Option<&Anchor>) {
        let mut previous = None;
        let mut next = None;
        for anchor in self.segment_anchors(track, segment).filter(|a| a.in_zoom) {
            match anchor.position().cmp(&position) {
                Ordering::Less => previous = Some(anchor),
                Ordering::Greater => {
                    next = Some(anchor);
                    break;
                }
                Ordering::Equal => {}
            }
        }
        (previous, next)
    }

    /// The shown anchor nearest to `pointer` within `radius_px`.
    pub fn hit_test(&self, viewport: &Viewport, pointer: ScreenPoint, radius_px: f64) -> Option<&Anchor> {
        self.shown()
            .map(|a| (a, viewport.project(a.coordinates()).distance_to(&pointer)))
            .filter(|(_, d)| *d <= radius_px)
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(a, _)| a)
    }

    pub fn temporary(&self) -> Option<&TemporaryAnchor> {
        self.temporary.as_ref()
    }

    pub fn hide_temporary_anchor(&mut self) {
        self.temporary = None;
    }

    /// Shows the preview anchor on the eligible segment closest to the
    /// pointer. Returns whether the preview was placed; a drag in progress
    /// keeps the current preview untouched.
    #[allow(clippy::too_many_arguments)]
    pub fn show_temporary_anchor(
        &mut self,
        file: &TrackFile,
        selection: &SegmentSelection,
        viewport: &Viewport,
        pointer: ScreenPoint,
        proximity_px: f64,
        hide_radius_px: f64,
        dragging: bool,
    ) -> bool {
        if dragging {
            return false;
        }
        if self.hit_test(viewport, pointer, proximity_px).is_some() {
            self.temporary = None;
            return false;
        }
        let query = viewport.unproject(pointer);
        let Some((track, segment, closest)) = closest_eligible(file, selection, query, 1) else {
            self.temporary = None;
            return false;
        };
        if viewport.project(closest.point).distance_to(&pointer) > hide_radius_px {
            self.temporary = None;
            return false;
        }
        self.temporary = Some(TemporaryAnchor {
            coordinates: closest.point,
            track,
            segment,
        });
        true
    }

    /// Hides the preview once the pointer leaves it or reaches a shown anchor.
    pub fn update_temporary_anchor(
        &mut self,
        viewport: &Viewport,
        pointer: ScreenPoint,
        proximity_px: f64,
        hide_radius_px: f64,
    ) {
        let Some(temporary) = self.temporary else {
            return;
        };
        let away = viewport.project(temporary.coordinates).distance_to(&pointer) > hide_radius_px;
        if away || self.hit_test(viewport, pointer, proximity_px).is_some() {
            self.temporary = None;
        }
    }

    /// Turns the preview into a new anchor point on the closest edge of an
    /// eligible segment, interpolating elevation and time along the edge.
    pub fn promote_temporary_anchor(
        &mut self,
        file: &TrackFile,
        selection: &SegmentSelection,
    ) -> Result<Promotion, TrackError> {
        let temporary = self.temporary.take().ok_or(TrackError::NoEligibleTarget)?;
        let (track, segment, closest) =
            closest_eligible(file, selection, temporary.coordinates, 2).ok_or(TrackError::NoEligibleTarget)?;
        let points = &file.segment(track, segment)?.points;
        let (left, right) = (&points[closest.index], &points[closest.index + 1]);
        // Landing on an existing anchor would only duplicate it.
        let landed = if closest.ratio <= 0.0 {
            Some(left)
        } else if closest.ratio >= 1.0 {
            Some(right)
        } else {
            None
        };
        if landed.is_some_and(|p| p.anchor) {
            debug!(track, segment, edge = closest.index, "preview lies on an anchor");
            return Err(TrackError::NoEligibleTarget);
        }

        let edge = left.distance_to(right);
        let ratio = if edge > 0.0 {
            (left.coordinates().distance_to(&closest.point) / edge).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let mut point = TrackPoint::new(closest.point);
        if let (Some(a), Some(b)) = (left.geo.elevation, right.geo.elevation) {
            point.geo.elevation = Some(a + (b - a) * ratio);
        }
        if let (Some(a), Some(b)) = (left.time(), right.time()) {
            let offset = ((b - a).num_milliseconds() as f64 * ratio).round() as i64;
            point.geo.time = Some(a + chrono::Duration::milliseconds(offset));
        }
        point.ensure_id();
        point.mark_anchor();

        debug!(track, segment, edge = closest.index, ratio, "temporary anchor promoted");
        Ok(Promotion {
            track,
            segment,
            insert_at: closest.index + 1,
            point,
        })
    }

    /// Resolves where a dragged preview becomes a permanent anchor: the
    /// nearest vertex itself, or a copy next to it when that vertex already
    /// is an anchor.
    pub fn place_dragged_temporary(
        &mut self,
        file: &TrackFile,
        selection: &SegmentSelection,
    ) -> Result<Placement, TrackError> {
        let temporary = self.temporary.take().ok_or(TrackError::NoEligibleTarget)?;
        let (track, segment, closest) =
            closest_eligible(file, selection, temporary.coordinates, 1).ok_or(TrackError::NoEligibleTarget)?;
        let vertex = closest.vertex();
        let existing = &file.segment(track, segment)?.points[vertex];

        let mut point = existing.clone();
        let position = if existing.anchor {
            point.id = Some(PointId::new());
            if closest.before {
                AnchorPosition::after(vertex)
            } else {
                AnchorPosition::before(vertex)
            }
        } else {
            point.ensure_id();
            AnchorPosition::at(vertex)
        };
        point.mark_anchor();

        Ok(Placement {
            track,
            segment,
            position,
            point,
        })
    }
}
