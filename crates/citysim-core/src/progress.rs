//! Weighted multi-tracker progress aggregation.
//!
//! Each unit of work of an analysis registers a tracker with a relative
//! weight and reports a 0-100 value on it. The project-visible progress is the
//! weighted mean of all trackers, floored to a whole percent.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Tracker {
    weight: u32,
    value: u8,
}

/// Mapping from tracker id to (weight, current value)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressTracker {
    trackers: BTreeMap<String, Tracker>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tracker, or change the weight of an existing one
    ///
    /// Re-registering keeps the value already reported.
    pub fn add_tracker(&mut self, tracker_id: impl Into<String>, weight: u32) {
        self.trackers
            .entry(tracker_id.into())
            .and_modify(|t| t.weight = weight)
            .or_insert(Tracker { weight, value: 0 });
    }

    /// Report a new value on a tracker and return the recomputed aggregate
    ///
    /// Returns None when the tracker was never registered.
    pub fn update(&mut self, tracker_id: &str, value: u8) -> Option<u8> {
        let tracker = self.trackers.get_mut(tracker_id)?;
        tracker.value = value.min(100);
        Some(self.aggregate())
    }

    pub fn contains(&self, tracker_id: &str) -> bool {
        self.trackers.contains_key(tracker_id)
    }

    /// Current 0-100 aggregate over all trackers
    pub fn aggregate(&self) -> u8 {
        weighted_progress(self.trackers.values().map(|t| (t.weight, t.value)))
    }
}

/// Weighted mean of (weight, value) pairs, floored, 0 when the total weight is 0
pub fn weighted_progress(trackers: impl IntoIterator<Item = (u32, u8)>) -> u8 {
    let (weighted, total) = trackers.into_iter().fold((0u64, 0u64), |(sum, total), (w, v)| {
        (sum + u64::from(w) * u64::from(v.min(100)), total + u64::from(w))
    });

    if total == 0 {
        return 0;
    }

    (weighted / total) as u8
}
