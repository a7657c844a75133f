use std::collections::HashMap;
use tracing::warn;

use crate::{TrackError, TrackFile};

/// Identifies one planned splice and the state it was planned against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpliceTicket {
    pub id: u64,
    pub track: usize,
    pub segment: usize,
    pub base_revision: u64,
}

/// Issues splice tickets and admits a routed result only when nothing
/// happened to its segment since it was planned.
#[derive(Debug, Clone, Default)]
pub struct SpliceFence {
    next_id: u64,
    latest: HashMap<(usize, usize), u64>,
}

impl SpliceFence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&mut self, file: &TrackFile, track: usize, segment: usize) -> SpliceTicket {
        self.next_id += 1;
        self.latest.insert((track, segment), self.next_id);
        SpliceTicket {
            id: self.next_id,
            track,
            segment,
            base_revision: file.revision(),
        }
    }

    /// A ticket is admitted when it is the newest one issued for its segment
    /// and the file has not been mutated since it was issued.
    pub fn admit(&self, file: &TrackFile, ticket: &SpliceTicket) -> Result<(), TrackError> {
        let newest = self.latest.get(&(ticket.track, ticket.segment)).copied();
        if newest != Some(ticket.id) {
            warn!(ticket = ticket.id, ?newest, "splice superseded by a newer request");
            return Err(TrackError::Superseded(ticket.id));
        }
        if file.revision() != ticket.base_revision {
            warn!(
                ticket = ticket.id,
                base = ticket.base_revision,
                current = file.revision(),
                "splice planned against a stale revision"
            );
            return Err(TrackError::Superseded(ticket.id));
        }
        Ok(())
    }
}
