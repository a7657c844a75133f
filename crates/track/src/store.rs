use tracing::debug;

use crate::{TrackError, TrackFile};

/// Owner of the edited file. Every mutation goes through `apply_to_file`,
/// which is one transaction: a failing mutator leaves the file unchanged.
pub trait TrackStore {
    fn file(&self) -> &TrackFile;

    fn apply_to_file(
        &mut self,
        mutator: &mut dyn FnMut(&mut TrackFile) -> Result<(), TrackError>,
    ) -> Result<(), TrackError>;
}

/// In-memory store. Only the current state and a commit count are kept.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    file: TrackFile,
    commits: usize,
}

impl MemoryStore {
    pub fn new(file: TrackFile) -> Self {
        Self {
            file,
            commits: 0,
        }
    }

    /// Number of committed transactions.
    pub fn commits(&self) -> usize {
        self.commits
    }

    pub fn into_file(self) -> TrackFile {
        self.file
    }
}

impl TrackStore for MemoryStore {
    fn file(&self) -> &TrackFile {
        &self.file
    }

    fn apply_to_file(
        &mut self,
        mutator: &mut dyn FnMut(&mut TrackFile) -> Result<(), TrackError>,
    ) -> Result<(), TrackError> {
        let mut draft = self.file.clone();
        mutator(&mut draft)?;
        self.file = draft;
        self.commits += 1;
        debug!(commits = self.commits, revision = self.file.revision(), "transaction committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Coordinates, Segment, TimingFallback, Track, TrackPoint};

    #[test]
    fn test_failed_transaction_rolls_back() {
        let file = TrackFile::new("store").with_tracks(vec![Track::new(vec![Segment::new(vec![
            TrackPoint::new(Coordinates::new(0.0, 0.0)),
            TrackPoint::new(Coordinates::new(0.0, 1.0)),
        ])])]);
        let mut store = MemoryStore::new(file.clone());

        let result = store.apply_to_file(&mut |file| {
            file.replace_track_points(0, 0, 0..1, Vec::new(), TimingFallback::none())?;
            file.replace_track_points(0, 0, 5..6, Vec::new(), TimingFallback::none())
        });
        assert!(matches!(result, Err(TrackError::InvalidRange { .. })));
        assert_eq!(store.file(), &file);
        assert_eq!(store.commits(), 0);

        store
            .apply_to_file(&mut |file| file.crop(0, 0, 1..2))
            .unwrap();
        assert_eq!(store.commits(), 1);
        assert_eq!(store.file().segment(0, 0).unwrap().len(), 1);
        assert_ne!(store.file(), &file);
    }

    #[test]
    fn test_commits_keep_only_current_state() {
        let points = (0..4)
            .map(|i| TrackPoint::new(Coordinates::new(0.0, i as f64)))
            .collect();
        let mut store = MemoryStore::new(TrackFile::new("store").with_tracks(vec![Track::new(vec![Segment::new(points)])]));

        for _ in 0..3 {
            store
                .apply_to_file(&mut |file| file.replace_track_points(0, 0, 0..1, Vec::new(), TimingFallback::none()))
                .unwrap();
        }
        assert_eq!(store.commits(), 3);
        assert_eq!(store.file().revision(), 3);
        let file = store.into_file();
        assert_eq!(file.segment(0, 0).unwrap().points[0].coordinates(), Coordinates::new(0.0, 3.0));
    }
}
