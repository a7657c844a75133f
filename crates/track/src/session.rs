//! Editing session for one edited file.
//!
//! The session owns the anchor registry, the timing store, the gesture
//! machine and the splice engine, and routes every mutation through its
//! `TrackStore`. It is created when a file is selected for editing and
//! dropped on deselection.

use chrono::{DateTime, Utc};
use std::ops::Range;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::levels::assign_anchor_levels;
use crate::{
    Anchor, AnchorPosition, AnchorRegistry, AnchorTimingStore, ClickIntent, Coordinates, DragSubject,
    EditorConfig, GestureMachine, MemoryStore, NewGeometry, PointId, RoutePlan, RoutingService,
    ScreenPoint, Segment, SegmentSelection, SegmentStatistics, SpliceAnchor, SpliceEngine, TimingFallback,
    Track, TrackError, TrackFile, TrackPoint, TrackStore, Viewport,
};

/// Result of a user gesture.
#[derive(Debug)]
pub enum EditOutcome {
    Applied,
    /// Nothing to do, e.g. a click that ended a drag.
    Ignored,
    /// The model is unchanged. A dragged marker must be redrawn at
    /// `revert_to`.
    Failed {
        revert_to: Option<Coordinates>,
        error: TrackError,
    },
}

impl EditOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

pub struct EditingSession<S: TrackStore = MemoryStore> {
    store: S,
    config: EditorConfig,
    selection: SegmentSelection,
    viewport: Option<Viewport>,
    registry: AnchorRegistry,
    timings: AnchorTimingStore,
    gestures: GestureMachine,
    engine: SpliceEngine,
}

impl<S: TrackStore> EditingSession<S> {
    pub fn new(store: S, config: EditorConfig) -> Self {
        let mut session = Self {
            gestures: GestureMachine::new(config.click_guard()),
            engine: SpliceEngine::new(config.min_moving_speed_kmh),
            store,
            config,
            selection: SegmentSelection::All,
            viewport: None,
            registry: AnchorRegistry::new(),
            timings: AnchorTimingStore::new(),
        };
        session.refresh();
        session
    }

    pub fn with_selection(mut self, selection: SegmentSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn file(&self) -> &TrackFile {
        self.store.file()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn registry(&self) -> &AnchorRegistry {
        &self.registry
    }

    pub fn timings(&self) -> &AnchorTimingStore {
        &self.timings
    }

    pub fn gestures(&self) -> &GestureMachine {
        &self.gestures
    }

    pub fn set_selection(&mut self, selection: SegmentSelection) {
        self.selection = selection;
        self.registry.hide_temporary_anchor();
        self.gestures.preview_hidden();
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = Some(viewport);
        self.registry.update_visibility(&viewport);
    }

    /// Re-reads the anchors after the file changed.
    pub fn refresh(&mut self) {
        self.registry.rebuild(self.store.file(), self.viewport.as_ref());
    }

    /// Flags anchors with zoom levels on every segment that has none.
    /// Returns the number of segments changed.
    pub fn assign_levels(&mut self) -> Result<usize, TrackError> {
        let mut changed = 0;
        self.store.apply_to_file(&mut |file| {
            changed = 0;
            for track in &mut file.tracks {
                for segment in &mut track.segments {
                    if assign_anchor_levels(&mut segment.points) {
                        changed += 1;
                    }
                }
            }
            Ok(())
        })?;
        self.refresh();
        info!(segments = changed, "anchor levels assigned");
        Ok(changed)
    }

    fn anchor_point(&self, track: usize, segment: usize, index: usize) -> Result<TrackPoint, TrackError> {
        self.store
            .file()
            .point(track, segment, index)
            .filter(|p| p.anchor)
            .cloned()
            .ok_or(TrackError::AnchorNotFound { track, segment, index })
    }

    fn locate(&self, id: &PointId) -> Option<(usize, usize, usize)> {
        let mut found = None;
        self.store.file().for_each_segment(|segment, track, segment_index| {
            if found.is_none() {
                if let Some(index) = segment.points.iter().position(|p| p.id.as_ref() == Some(id)) {
                    found = Some((track, segment_index, index));
                }
            }
        });
        found
    }

    fn replace(
        &mut self,
        track: usize,
        segment: usize,
        range: Range<usize>,
        points: Vec<TrackPoint>,
        fallback: TimingFallback,
    ) -> Result<(), TrackError> {
        self.store.apply_to_file(&mut |file| {
            file.replace_track_points(track, segment, range.clone(), points.clone(), fallback)
        })?;
        self.refresh();
        Ok(())
    }

    /// The moved anchor between its in-zoom neighbours, which stay fixed.
    fn splice_anchors(
        &self,
        track: usize,
        segment: usize,
        position: AnchorPosition,
        point: TrackPoint,
        target: Coordinates,
    ) -> Vec<SpliceAnchor> {
        let (previous, next) = self.registry.neighbours(track, segment, position);
        let fixed = |anchor: &Anchor| SpliceAnchor::fixed(anchor.position(), anchor.point.clone());

        let mut anchors = Vec::with_capacity(3);
        anchors.extend(previous.map(fixed));
        anchors.push(SpliceAnchor::moved(position, point, target));
        anchors.extend(next.map(fixed));
        anchors
    }

    // Splices

    pub fn plan_move(
        &mut self,
        track: usize,
        segment: usize,
        index: usize,
        target: Coordinates,
    ) -> Result<RoutePlan, TrackError> {
        let point = self.anchor_point(track, segment, index)?;
        let anchors = self.splice_anchors(track, segment, AnchorPosition::at(index), point, target);
        self.engine
            .plan(self.store.file(), &self.timings, track, segment, anchors)
    }

    /// Applies a routed splice. Stale results are rejected as superseded.
    pub fn commit(&mut self, geometry: NewGeometry) -> Result<(), TrackError> {
        let engine = &self.engine;
        self.store
            .apply_to_file(&mut |file| engine.apply(file, geometry.clone()))?;
        self.refresh();
        Ok(())
    }

    pub async fn execute(&mut self, plan: RoutePlan, service: &dyn RoutingService) -> Result<(), TrackError> {
        let geometry = SpliceEngine::route(&plan, service).await?;
        self.commit(geometry)
    }

    pub async fn move_anchor(
        &mut self,
        track: usize,
        segment: usize,
        index: usize,
        target: Coordinates,
        service: &dyn RoutingService,
    ) -> Result<(), TrackError> {
        let plan = self.plan_move(track, segment, index, target)?;
        self.execute(plan, service).await
    }

    /// Removes an anchor. Between two neighbours the gap is re-routed; at a
    /// segment boundary the track is trimmed to the remaining neighbour.
    pub async fn delete_anchor(
        &mut self,
        track: usize,
        segment: usize,
        index: usize,
        service: &dyn RoutingService,
    ) -> Result<(), TrackError> {
        let point = self.anchor_point(track, segment, index)?;
        let (previous, next) = self.registry.neighbours(track, segment, AnchorPosition::at(index));
        let (previous, next) = (previous.cloned(), next.cloned());
        let len = self.store.file().segment(track, segment)?.len();

        match (previous, next) {
            (Some(previous), Some(next)) => {
                let anchors = vec![
                    SpliceAnchor::fixed(previous.position(), previous.point),
                    SpliceAnchor::fixed(next.position(), next.point),
                ];
                let plan = self
                    .engine
                    .plan(self.store.file(), &self.timings, track, segment, anchors)?;
                self.execute(plan, service).await?;
            }
            (previous, next) => {
                let range = match (previous, next) {
                    (Some(previous), None) => previous.index + 1..len,
                    (None, Some(next)) => 0..next.index,
                    _ => 0..len,
                };
                self.replace(track, segment, range, Vec::new(), TimingFallback::none())?;
            }
        }

        if let Some(id) = point.id {
            self.timings.remove_timing(&id);
        }
        debug!(track, segment, index, "anchor deleted");
        Ok(())
    }

    /// Adds an anchor after the last anchor of the eligible segments, creating
    /// the track and segment when the file has none.
    pub async fn append_anchor(
        &mut self,
        coordinates: Coordinates,
        service: &dyn RoutingService,
    ) -> Result<(), TrackError> {
        let last = self
            .registry
            .anchors()
            .iter()
            .rev()
            .find(|a| self.selection.is_eligible(a.track, a.segment))
            .cloned();

        let mut point = TrackPoint::anchor_at(coordinates);
        point.ensure_id();

        let Some(last) = last else {
            self.store.apply_to_file(&mut |file| {
                if file.tracks.is_empty() {
                    file.replace_tracks(0..0, vec![Track::new(vec![Segment::default()])])?;
                }
                let track = file.tracks.len() - 1;
                if file.tracks[track].segments.is_empty() {
                    file.replace_segments(track, 0..0, vec![Segment::default()])?;
                }
                let segment = file.tracks[track].segments.len() - 1;
                let len = file.segment(track, segment)?.len();
                file.replace_track_points(track, segment, len..len, vec![point.clone()], TimingFallback::none())
            })?;
            self.refresh();
            return Ok(());
        };

        let len = self.store.file().segment(last.track, last.segment)?.len();
        let anchors = vec![
            SpliceAnchor::fixed(last.position(), last.point.clone()),
            SpliceAnchor::fixed(AnchorPosition::after(len - 1), point),
        ];
        let plan = self
            .engine
            .plan(self.store.file(), &self.timings, last.track, last.segment, anchors)?;
        self.execute(plan, service).await
    }

    // Temporary anchor

    /// The pointer is over a segment line.
    pub fn hover_segment(&mut self, pointer: ScreenPoint) -> bool {
        let Some(viewport) = self.viewport else {
            return false;
        };
        if self.gestures.is_dragging() {
            return false;
        }
        let shown = self.registry.show_temporary_anchor(
            self.store.file(),
            &self.selection,
            &viewport,
            pointer,
            self.config.anchor_proximity_px,
            self.config.temporary_hide_radius_px,
            false,
        );
        self.sync_preview();
        shown
    }

    /// The pointer moved anywhere on the map.
    pub fn pointer_moved(&mut self, pointer: ScreenPoint) {
        let Some(viewport) = self.viewport else {
            return;
        };
        if self.gestures.is_dragging() {
            return;
        }
        self.registry.update_temporary_anchor(
            &viewport,
            pointer,
            self.config.anchor_proximity_px,
            self.config.temporary_hide_radius_px,
        );
        self.sync_preview();
    }

    fn sync_preview(&mut self) {
        if self.registry.temporary().is_some() {
            self.gestures.preview_shown();
        } else {
            self.gestures.preview_hidden();
        }
    }

    /// Inserts the preview as a new anchor on the closest edge and selects
    /// it for timing.
    pub fn promote_temporary_anchor(&mut self) -> Result<PointId, TrackError> {
        let promotion = self
            .registry
            .promote_temporary_anchor(self.store.file(), &self.selection)?;
        self.gestures.preview_hidden();

        let mut point = promotion.point;
        let id = point.ensure_id();
        let coordinates = point.coordinates();
        let at = promotion.insert_at;
        self.replace(promotion.track, promotion.segment, at..at, vec![point], TimingFallback::none())?;

        self.timings.set_timing(id, coordinates, None, None);
        self.timings.set_active(Some(id));
        info!(%id, track = promotion.track, segment = promotion.segment, index = at, "anchor inserted");
        Ok(id)
    }

    /// Turns a dragged preview into an anchor next to the nearest vertex and
    /// routes it to `target`.
    pub async fn place_dragged_temporary(
        &mut self,
        target: Coordinates,
        service: &dyn RoutingService,
    ) -> Result<(), TrackError> {
        let placement = self
            .registry
            .place_dragged_temporary(self.store.file(), &self.selection)?;
        if let Some(id) = placement.point.id {
            self.timings
                .set_timing(id, placement.point.coordinates(), None, None);
            self.timings.set_active(Some(id));
        }
        let anchors = self.splice_anchors(
            placement.track,
            placement.segment,
            placement.position,
            placement.point,
            target,
        );
        let plan = self
            .engine
            .plan(self.store.file(), &self.timings, placement.track, placement.segment, anchors)?;
        self.execute(plan, service).await
    }

    // Timing

    /// Assigns the anchor an identity if needed and makes its timing entry
    /// the active one.
    pub fn select_anchor(&mut self, track: usize, segment: usize, index: usize) -> Result<PointId, TrackError> {
        let mut point = self.anchor_point(track, segment, index)?;
        let id = match point.id {
            Some(id) => id,
            None => {
                let id = point.ensure_id();
                self.replace(track, segment, index..index + 1, vec![point.clone()], TimingFallback::none())?;
                id
            }
        };
        self.timings.set_timing(id, point.coordinates(), None, None);
        self.timings.set_active(Some(id));
        Ok(id)
    }

    pub fn set_anchor_timing(
        &mut self,
        id: PointId,
        timestamp: Option<DateTime<Utc>>,
        notes: Option<String>,
    ) -> Result<(), TrackError> {
        let (track, segment, index) = self.locate(&id).ok_or(TrackError::NoEligibleTarget)?;
        let coordinates = self.anchor_point(track, segment, index)?.coordinates();
        self.timings.set_timing(id, coordinates, timestamp, notes);
        Ok(())
    }

    /// Writes the stored timestamp and notes into the anchor point without
    /// touching the geometry.
    pub fn apply_anchor_timing(&mut self, id: &PointId) -> Result<(), TrackError> {
        let (track, segment, index) = self.locate(id).ok_or(TrackError::NoEligibleTarget)?;
        let mut point = self.anchor_point(track, segment, index)?;
        self.timings.merge_into(&mut point);
        self.replace(track, segment, index..index + 1, vec![point], TimingFallback::none())
    }

    // Loops

    /// The segment can be rotated to start at this anchor when it is a loop.
    pub fn can_change_start(&self, track: usize, segment: usize, index: usize) -> bool {
        let Ok(segment) = self.store.file().segment(track, segment) else {
            return false;
        };
        let (Some(first), Some(last)) = (segment.first(), segment.last()) else {
            return false;
        };
        index != 0
            && index < segment.len()
            && segment.points[index].anchor
            && first.distance_to(last) <= self.config.loop_close_distance_m
    }

    /// Rotates a loop so it starts at the anchor. The former leading points
    /// move after the end, re-timed at the segment's moving speed.
    pub fn start_loop_at_anchor(&mut self, track: usize, segment: usize, index: usize) -> Result<(), TrackError> {
        if !self.can_change_start(track, segment, index) {
            return Err(TrackError::AnchorNotFound { track, segment, index });
        }
        let points = &self.store.file().segment(track, segment)?.points;
        let len = points.len();
        let leading = points[..index].to_vec();
        let stats = SegmentStatistics::compute(points, self.config.min_moving_speed_kmh);
        let speed = (stats.global.speed_moving > 0.0).then_some(stats.global.speed_moving);

        self.store.apply_to_file(&mut |file| {
            file.replace_track_points(track, segment, len..len, leading.clone(), TimingFallback::new(speed, None))?;
            file.crop(track, segment, index..index + len)
        })?;
        self.refresh();
        info!(track, segment, index, "loop start changed");
        Ok(())
    }

    // Gestures

    pub fn start_anchor_drag(&mut self, track: usize, segment: usize, index: usize, now: Instant) -> bool {
        let Ok(point) = self.anchor_point(track, segment, index) else {
            return false;
        };
        self.gestures.start_drag(
            DragSubject::Anchor {
                track,
                segment,
                index,
                id: point.id,
                origin: point.coordinates(),
            },
            now,
        )
    }

    pub fn start_temporary_drag(&mut self, now: Instant) -> bool {
        let Some(temporary) = self.registry.temporary() else {
            return false;
        };
        let origin = temporary.coordinates;
        self.gestures
            .start_drag(DragSubject::Temporary { origin }, now)
    }

    pub fn drag_moved(&mut self, now: Instant) {
        self.gestures.drag_moved(now);
    }

    /// Ends a drag at `target` and routes the result.
    pub async fn release_drag(
        &mut self,
        target: Coordinates,
        now: Instant,
        service: &dyn RoutingService,
    ) -> EditOutcome {
        let Some(subject) = self.gestures.release(now) else {
            return EditOutcome::Ignored;
        };
        let result = match subject {
            DragSubject::Anchor {
                track,
                segment,
                index,
                ..
            } => self.move_anchor(track, segment, index, target, service).await,
            DragSubject::Temporary { .. } => self.place_dragged_temporary(target, service).await,
        };
        self.settle(result)
    }

    /// A click on an anchor selects it for timing, or deletes it with shift.
    pub async fn click_anchor(
        &mut self,
        track: usize,
        segment: usize,
        index: usize,
        shift: bool,
        now: Instant,
        service: &dyn RoutingService,
    ) -> EditOutcome {
        if self.gestures.classify_click(now) == ClickIntent::DragArtifact {
            return EditOutcome::Ignored;
        }
        let result = if shift {
            self.delete_anchor(track, segment, index, service).await
        } else {
            self.select_anchor(track, segment, index).map(|_| ())
        };
        self.settle(result)
    }

    pub fn click_temporary(&mut self, now: Instant) -> EditOutcome {
        if self.gestures.classify_click(now) == ClickIntent::DragArtifact {
            return EditOutcome::Ignored;
        }
        let result = self.promote_temporary_anchor().map(|_| ());
        self.settle(result)
    }

    fn settle(&mut self, result: Result<(), TrackError>) -> EditOutcome {
        let revert_to = self.gestures.route_finished(result.is_ok());
        match result {
            Ok(()) => EditOutcome::Applied,
            Err(error) if error.is_silent() => {
                debug!(%error, "gesture ignored");
                EditOutcome::Failed { revert_to, error }
            }
            Err(error) => {
                warn!(%error, "edit failed");
                EditOutcome::Failed { revert_to, error }
            }
        }
    }
}
