//! Pending timers for world placements and the placement delete queue

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::ids::{FeatureId, GameTime, LocationId};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingTimer {
    pub location: LocationId,
    pub due: GameTime,
    /// Presentation re-applied while the placement waits
    pub features: Vec<FeatureId>,
}

#[derive(Debug, Default)]
pub(crate) struct TimerState {
    pending: HashMap<LocationId, PendingTimer>,
    delete_queue: HashSet<LocationId>,
}

impl TimerState {
    /// Insert or replace the timer for its location. Returns true if the
    /// location had no timer before.
    pub fn set(&mut self, timer: PendingTimer) -> bool {
        self.pending.insert(timer.location, timer).is_none()
    }

    pub fn remove(&mut self, location: LocationId) -> Option<PendingTimer> {
        self.pending.remove(&location)
    }

    pub fn get(&self, location: LocationId) -> Option<&PendingTimer> {
        self.pending.get(&location)
    }

    pub fn queue_delete(&mut self, location: LocationId) {
        self.pending.remove(&location);
        self.delete_queue.insert(location);
    }

    pub fn take_deletes(&mut self) -> Vec<LocationId> {
        self.delete_queue.drain().collect()
    }

    pub fn locations(&self) -> Vec<LocationId> {
        self.pending.keys().copied().collect()
    }

    /// Remove and return every timer due at or before `now`, earliest first
    pub fn pop_due(&mut self, now: GameTime) -> Vec<PendingTimer> {
        let due: Vec<LocationId> = self
            .pending
            .values()
            .filter(|t| t.due <= now)
            .map(|t| t.location)
            .collect();
        let mut timers: Vec<PendingTimer> = due.iter().filter_map(|loc| self.pending.remove(loc)).collect();
        timers.sort_by(|a, b| a.due.total_cmp(&b.due).then(a.location.cmp(&b.location)));
        timers
    }

    pub fn waiting(&self) -> impl Iterator<Item = &PendingTimer> {
        self.pending.values()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.delete_queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.delete_queue.clear();
    }
}
