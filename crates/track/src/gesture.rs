use std::time::{Duration, Instant};
use tracing::debug;

use crate::{Coordinates, PointId};

/// What the pointer is dragging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DragSubject {
    Anchor {
        track: usize,
        segment: usize,
        index: usize,
        id: Option<PointId>,
        origin: Coordinates,
    },
    Temporary {
        origin: Coordinates,
    },
}

impl DragSubject {
    /// Where the marker was before the drag started.
    pub fn origin(&self) -> Coordinates {
        match *self {
            Self::Anchor { origin, .. } | Self::Temporary { origin } => origin,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureState {
    Idle,
    PreviewingTemporary,
    Dragging(DragSubject),
    AwaitingRoute(DragSubject),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickIntent {
    /// A semantic click.
    Click,
    /// The tail of a drag, to be ignored.
    DragArtifact,
}

#[derive(Debug, Clone)]
pub struct GestureMachine {
    state: GestureState,
    guard: Duration,
    last_drag_event: Option<Instant>,
}

impl GestureMachine {
    pub fn new(guard: Duration) -> Self {
        Self {
            state: GestureState::Idle,
            guard,
            last_drag_event: None,
        }
    }

    pub fn state(&self) -> GestureState {
        self.state
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.state, GestureState::Dragging(_))
    }

    pub fn preview_shown(&mut self) {
        if self.state == GestureState::Idle {
            self.state = GestureState::PreviewingTemporary;
        }
    }

    pub fn preview_hidden(&mut self) {
        if self.state == GestureState::PreviewingTemporary {
            self.state = GestureState::Idle;
        }
    }

    /// Drags may start from idle or from the preview. Returns false when a
    /// drag or a route is already in progress.
    pub fn start_drag(&mut self, subject: DragSubject, now: Instant) -> bool {
        match self.state {
            GestureState::Idle | GestureState::PreviewingTemporary => {
                self.state = GestureState::Dragging(subject);
                self.last_drag_event = Some(now);
                true
            }
            _ => false,
        }
    }

    pub fn drag_moved(&mut self, now: Instant) {
        if self.is_dragging() {
            self.last_drag_event = Some(now);
        }
    }

    /// Ends the drag; the subject now waits for its route.
    pub fn release(&mut self, now: Instant) -> Option<DragSubject> {
        let GestureState::Dragging(subject) = self.state else {
            return None;
        };
        self.state = GestureState::AwaitingRoute(subject);
        self.last_drag_event = Some(now);
        debug!(?subject, "drag released");
        Some(subject)
    }

    /// Settles a pending route. On failure, returns the coordinates the
    /// dragged marker must be redrawn at.
    pub fn route_finished(&mut self, succeeded: bool) -> Option<Coordinates> {
        let GestureState::AwaitingRoute(subject) = self.state else {
            return None;
        };
        self.state = GestureState::Idle;
        (!succeeded).then(|| subject.origin())
    }

    /// A click within the guard window of the last drag event belongs to the
    /// drag.
    pub fn classify_click(&self, now: Instant) -> ClickIntent {
        match self.last_drag_event {
            Some(at) if now.saturating_duration_since(at) < self.guard => ClickIntent::DragArtifact,
            _ => ClickIntent::Click,
        }
    }
}

impl Default for GestureMachine {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}
