//! Per-folder debounce bookkeeping for raw filesystem events.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;

/// Pending-change table: folder -> time of its most recent raw event.
///
/// A folder settles once `window` elapses with no further raw event. Every
/// new event restarts the folder's window.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a raw event for `folder` observed at `now`.
    ///
    /// Returns `true` if this opened a new pending change.
    pub fn record(&mut self, folder: &Path, now: Instant) -> bool {
        match self.pending.get_mut(folder) {
            Some(last) => {
                *last = now;
                false
            }
            None => {
                self.pending.insert(folder.to_path_buf(), now);
                true
            }
        }
    }

    /// Remove and return every folder whose last event is older than the window.
    ///
    /// The result is sorted so settle order does not depend on hashing.
    pub fn settle(&mut self, now: Instant) -> Vec<PathBuf> {
        let window = self.window;
        let mut settled: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, last)| now.saturating_duration_since(**last) >= window)
            .map(|(folder, _)| folder.clone())
            .collect();
        for folder in &settled {
            self.pending.remove(folder);
        }
        settled.sort();
        settled
    }

    pub fn is_pending(&self, folder: &Path) -> bool {
        self.pending.contains_key(folder)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(500);

    #[test]
    fn burst_settles_once() {
        let mut d = Debouncer::new(WINDOW);
        let t0 = Instant::now();
        let folder = Path::new("/photos");

        assert!(d.record(folder, t0));
        for i in 1..50 {
            assert!(!d.record(folder, t0 + Duration::from_millis(i * 5)));
        }
        let last = t0 + Duration::from_millis(49 * 5);

        assert!(d.settle(last + Duration::from_millis(499)).is_empty());
        assert_eq!(d.settle(last + WINDOW), vec![PathBuf::from("/photos")]);
        assert!(d.settle(last + WINDOW * 4).is_empty());
        assert_eq!(d.pending_len(), 0);
    }

    #[test]
    fn new_event_restarts_window() {
        let mut d = Debouncer::new(WINDOW);
        let t0 = Instant::now();
        let folder = Path::new("/photos");
        d.record(folder, t0);
        d.record(folder, t0 + Duration::from_millis(400));
        assert!(d.settle(t0 + Duration::from_millis(600)).is_empty());
        assert!(d.is_pending(folder));
        assert_eq!(d.settle(t0 + Duration::from_millis(900)).len(), 1);
    }

    #[test]
    fn folders_settle_independently() {
        let mut d = Debouncer::new(WINDOW);
        let t0 = Instant::now();
        d.record(Path::new("/b"), t0);
        d.record(Path::new("/a"), t0);
        d.record(Path::new("/c"), t0 + Duration::from_millis(300));

        let settled = d.settle(t0 + WINDOW);
        assert_eq!(settled, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert!(d.is_pending(Path::new("/c")));

        d.clear();
        assert_eq!(d.pending_len(), 0);
    }
}
