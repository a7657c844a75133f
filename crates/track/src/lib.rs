use thiserror::Error;

mod point;
pub use point::*;
mod model;
pub use model::*;
pub mod projection;
pub use projection::{closest_point_on_polyline, ClosestPoint};
pub mod levels;
pub mod stats;
pub use stats::SegmentStatistics;
pub mod timing;
pub use timing::{AnchorTiming, AnchorTimingStore, TimingMode};
pub mod routing;
pub use routing::{RoutingError, RoutingService, WaypointRole};
pub mod viewport;
pub use viewport::{ScreenPoint, SegmentSelection, Viewport};
pub mod anchors;
pub use anchors::{Anchor, AnchorPosition, AnchorRegistry, Offset};
mod fence;
pub use fence::{SpliceFence, SpliceTicket};
pub mod splice;
pub use splice::{NewGeometry, RoutePlan, SpliceAnchor, SpliceEngine};
pub mod gesture;
pub use gesture::{ClickIntent, DragSubject, GestureMachine, GestureState};
mod store;
pub use store::{MemoryStore, TrackStore};
pub mod session;
pub use session::{EditOutcome, EditingSession};
pub mod playback;
pub use playback::{interpolate, InterpolatedPosition, Playback, PlaybackData, TimeRange, TimedPoint};
pub mod config;
pub use config::EditorConfig;

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("invalid range {start}..{end} in track {track} segment {segment} ({len} points)")]
    InvalidRange {
        track: usize,
        segment: usize,
        start: usize,
        end: usize,
        len: usize,
    },
    #[error("track not found: {0}")]
    TrackNotFound(usize),
    #[error("segment not found: track {track}, segment {segment}")]
    SegmentNotFound { track: usize, segment: usize },
    #[error("no eligible segment for this gesture")]
    NoEligibleTarget,
    #[error("anchor not found: track {track}, segment {segment}, point {index}")]
    AnchorNotFound {
        track: usize,
        segment: usize,
        index: usize,
    },
    #[error("splice superseded: ticket {0} no longer matches the track state")]
    Superseded(u64),
    #[error(transparent)]
    Routing(#[from] RoutingError),
}

impl TrackError {
    /// Errors the UI swallows instead of surfacing to the user.
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::NoEligibleTarget | Self::Superseded(_))
    }
}
