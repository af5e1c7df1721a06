use std::fs;
use std::path::Path;
use std::time::SystemTime;

/// A source is stale when it changed after the last successful compile began,
/// or when nothing has been compiled yet.
pub fn is_stale(modified: SystemTime, recorded: Option<SystemTime>) -> bool {
    recorded.map_or(true, |recorded| modified > recorded)
}

/// Modification time of `path`, or `None` if it cannot be read.
pub fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

/// Remembers the source timestamp of the last successful compile.
#[derive(Clone, Copy, Debug, Default)]
pub struct StalenessTracker {
    recorded: Option<SystemTime>,
}

impl StalenessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Option<SystemTime> {
        self.recorded
    }

    pub fn is_stale(&self, modified: SystemTime) -> bool {
        is_stale(modified, self.recorded)
    }

    pub fn record(&mut self, modified: SystemTime) {
        self.recorded = Some(modified);
    }

    /// Forces the next check to report stale.
    pub fn invalidate(&mut self) {
        self.recorded = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn nothing_recorded_is_always_stale() {
        assert!(is_stale(SystemTime::UNIX_EPOCH, None));
    }

    #[test]
    fn only_strictly_newer_sources_are_stale() {
        let recorded = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        assert!(!is_stale(recorded, Some(recorded)));
        assert!(!is_stale(recorded - Duration::from_secs(1), Some(recorded)));
        assert!(is_stale(recorded + Duration::from_millis(1), Some(recorded)));
    }

    #[test]
    fn tracker_invalidation_forces_recompile() {
        let stamp = SystemTime::UNIX_EPOCH + Duration::from_secs(5);
        let mut tracker = StalenessTracker::new();
        tracker.record(stamp);
        assert!(!tracker.is_stale(stamp));
        tracker.invalidate();
        assert!(tracker.is_stale(stamp));
    }

    #[test]
    fn missing_file_has_no_timestamp() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(modified_time(&dir.path().join("absent.glsl")).is_none());
    }
}
