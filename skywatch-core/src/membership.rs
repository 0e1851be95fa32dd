//! Alert-window membership and arrival detection.
//!
//! Per-id state is {Absent, Present}. Each completed tick replaces the
//! membership set with the ids currently in the alert window; ids not in the
//! previous set are arrivals. An id that drops out for one tick and returns
//! starts a new visit and arrives again.
//!
//! Callers must not advance the tracker on a failed fetch, or an outage
//! would read as every track leaving.

use std::collections::HashSet;

use crate::types::RangedTrack;

/// Ids in `current` that are not in `previous`, keeping `current`'s order.
pub fn entering<'a>(previous: &HashSet<String>, current: &'a [RangedTrack]) -> Vec<&'a RangedTrack> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut out = Vec::new();
    for r in current {
        if !previous.contains(r.id()) && seen.insert(r.id()) {
            out.push(r);
        }
    }
    out
}

/// Owns the set of ids inside the alert radius as of the last completed tick.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    members: HashSet<String>,
    ticks: u64,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance one tick with the alert window, nearest first.
    ///
    /// Returns the newly entered tracks in the same order. The membership set
    /// is replaced unconditionally, including with an empty window.
    pub fn advance(&mut self, alert_window: &[RangedTrack]) -> Vec<RangedTrack> {
        let arrivals: Vec<RangedTrack> = entering(&self.members, alert_window)
            .into_iter()
            .cloned()
            .collect();

        let departed = self
            .members
            .iter()
            .filter(|id| !alert_window.iter().any(|r| r.id() == id.as_str()))
            .count();

        self.members = alert_window.iter().map(|r| r.id().to_string()).collect();
        self.ticks += 1;

        tracing::debug!(
            tick = self.ticks,
            members = self.members.len(),
            arrived = arrivals.len(),
            departed,
            "alert window advanced"
        );

        arrivals
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    pub fn members(&self) -> &HashSet<String> {
        &self.members
    }

    /// Completed ticks seen so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Track;

    fn window(ids: &[&str]) -> Vec<RangedTrack> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| RangedTrack {
                distance_m: i as f64 * 100.0,
                track: Track::bare(*id),
            })
            .collect()
    }

    fn ids(tracks: &[RangedTrack]) -> Vec<&str> {
        tracks.iter().map(|r| r.id()).collect()
    }

    #[test]
    fn test_first_tick_all_enter() {
        let mut ct = ChangeTracker::new();
        let arrivals = ct.advance(&window(&["a", "b"]));
        assert_eq!(ids(&arrivals), vec!["a", "b"]);
        assert!(ct.contains("a"));
    }

    #[test]
    fn test_set_difference_not_superset() {
        let mut ct = ChangeTracker::new();
        ct.advance(&window(&["a", "b", "c"]));
        // B is neither superset nor subset of A
        let arrivals = ct.advance(&window(&["c", "d", "e"]));
        assert_eq!(ids(&arrivals), vec!["d", "e"]);
        assert!(!ct.contains("a"));
    }

    #[test]
    fn test_steady_state_no_arrivals() {
        let mut ct = ChangeTracker::new();
        ct.advance(&window(&["a"]));
        assert!(ct.advance(&window(&["a"])).is_empty());
        assert!(ct.advance(&window(&["a"])).is_empty());
        assert_eq!(ct.ticks(), 3);
    }

    #[test]
    fn test_visit_reentry() {
        let mut ct = ChangeTracker::new();
        let mut count = 0;
        count += ct.advance(&window(&["a"])).len();
        count += ct.advance(&window(&[])).len();
        count += ct.advance(&window(&["a"])).len();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_empty_tick_resets_members() {
        let mut ct = ChangeTracker::new();
        ct.advance(&window(&["a", "b"]));
        ct.advance(&[]);
        assert!(ct.members().is_empty());
    }

    #[test]
    fn test_entering_preserves_order_and_dedups() {
        let previous: HashSet<String> = ["b".to_string()].into_iter().collect();
        let current = window(&["c", "b", "a", "c"]);
        let out: Vec<&str> = entering(&previous, &current).iter().map(|r| r.id()).collect();
        assert_eq!(out, vec!["c", "a"]);
    }
}
