//! Last-activity tracking for sandbox reclamation.

use std::collections::HashMap;

use dashmap::DashMap;

/// Process-wide map of identity -> last-active timestamp (epoch millis).
///
/// Multiple concurrent sessions for the same identity all refresh the same
/// record; there is no per-session granularity. State is in-memory only and
/// lost on restart, which is fine: activity is re-marked on the next session.
#[derive(Default)]
pub struct ActivityTracker {
    last_active: DashMap<String, i64>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record activity for an identity, now.
    pub fn mark_active(&self, identity: &str) {
        self.last_active
            .insert(identity.to_string(), chrono::Utc::now().timestamp_millis());
    }

    /// Point-in-time detached copy, safe to iterate while sessions keep
    /// updating the live map.
    pub fn snapshot(&self) -> HashMap<String, i64> {
        self.last_active
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Drop an identity's record once its sandbox has been reclaimed.
    pub fn remove(&self, identity: &str) {
        self.last_active.remove(identity);
    }

    pub fn len(&self) -> usize {
        self.last_active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_and_snapshot() {
        let tracker = ActivityTracker::new();
        tracker.mark_active("a");
        tracker.mark_active("b");

        let snap = tracker.snapshot();
        assert_eq!(snap.len(), 2);
        assert!(snap.contains_key("a"));
        assert!(snap.contains_key("b"));
    }

    #[test]
    fn snapshot_is_detached() {
        let tracker = ActivityTracker::new();
        tracker.mark_active("a");

        let snap = tracker.snapshot();
        tracker.remove("a");
        tracker.mark_active("c");

        // the copy is unaffected by later mutation
        assert_eq!(snap.len(), 1);
        assert!(snap.contains_key("a"));
    }

    #[test]
    fn remark_updates_single_record() {
        let tracker = ActivityTracker::new();
        tracker.mark_active("a");
        let first = *tracker.snapshot().get("a").unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        tracker.mark_active("a");
        let second = *tracker.snapshot().get("a").unwrap();

        assert_eq!(tracker.len(), 1);
        assert!(second >= first);
    }

    #[test]
    fn remove_missing_is_noop() {
        let tracker = ActivityTracker::new();
        tracker.remove("nope");
        assert!(tracker.is_empty());
    }
}
