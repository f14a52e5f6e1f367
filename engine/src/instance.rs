//! Instance - one progressing record for a counted stack at a location
//!
//! Progress inside the current stage is a line in game time:
//! `elapsed(t) = (t - start) * slope + snapshot`. Re-parameterizing the line
//! always snapshots `elapsed` at the change time so progress is continuous.

use serde::{Deserialize, Serialize};

use crate::catalog::{StageCatalog, StageSlot};
use crate::ids::{GameTime, ItemId, StageNo};

// ============================================================================
// Time modulation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DelayLine {
    pub start: GameTime,
    pub slope: f64,
    pub snapshot: GameTime,
    /// Catalyst responsible for the current slope, if any.
    pub catalyst: Option<ItemId>,
}

impl DelayLine {
    /// Unmodulated progress starting at `at`
    pub fn neutral(at: GameTime) -> Self {
        Self {
            start: at,
            slope: 1.0,
            snapshot: 0.0,
            catalyst: None,
        }
    }

    pub fn elapsed(&self, t: GameTime) -> GameTime {
        (t - self.start) * self.slope + self.snapshot
    }

    /// Change slope and catalyst at `t`, keeping `elapsed(t)` unchanged.
    pub fn set(&mut self, t: GameTime, slope: f64, catalyst: Option<ItemId>) {
        self.snapshot = self.elapsed(t);
        self.start = t;
        self.slope = slope;
        self.catalyst = catalyst;
    }

    /// Restart the line at `t` with a fixed elapsed value.
    pub fn rebase(&mut self, t: GameTime, elapsed: GameTime) {
        self.start = t;
        self.snapshot = elapsed;
    }

    pub fn is_neutral(&self) -> bool {
        self.catalyst.is_none() && self.slope == 1.0
    }

    /// Time at which `elapsed` reaches `target`, or `None` when frozen.
    pub fn hitting_time(&self, target: GameTime, epsilon: f64) -> Option<GameTime> {
        if self.slope.abs() < epsilon {
            return None;
        }
        Some(self.start + (target - self.snapshot) / self.slope)
    }
}

// ============================================================================
// Instance
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformState {
    pub catalyst: ItemId,
    pub started: GameTime,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceFlags {
    pub fake: bool,
    pub decayed: bool,
    pub transforming: bool,
    pub favorited: bool,
    pub equipped: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub slot: StageSlot,
    pub count: u32,
    pub start_time: GameTime,
    pub delay: DelayLine,
    pub transform: Option<TransformState>,
    /// Host form materialized for a fake stage.
    pub fake_item: Option<ItemId>,
    pub favorited: bool,
    pub equipped: bool,
}

impl Instance {
    pub fn new(slot: StageSlot, count: u32, start_time: GameTime) -> Self {
        Self {
            slot,
            count,
            start_time,
            delay: DelayLine::neutral(start_time),
            transform: None,
            fake_item: None,
            favorited: false,
            equipped: false,
        }
    }

    pub fn elapsed(&self, t: GameTime) -> GameTime {
        self.delay.elapsed(t)
    }

    pub fn stage_no(&self) -> Option<StageNo> {
        self.slot.regular()
    }

    pub fn is_decayed(&self) -> bool {
        self.slot == StageSlot::Decayed
    }

    pub fn is_transforming(&self) -> bool {
        self.transform.is_some()
    }

    pub fn flags(&self) -> InstanceFlags {
        InstanceFlags {
            fake: self.fake_item.is_some(),
            decayed: self.is_decayed(),
            transforming: self.is_transforming(),
            favorited: self.favorited,
            equipped: self.equipped,
        }
    }

    /// Item form this instance currently appears as
    pub fn item(&self, catalog: &StageCatalog) -> Option<ItemId> {
        self.fake_item
            .or_else(|| catalog.stage(self.slot).map(|s| s.item))
    }

    /// Move the stage baseline to `at`, as happens on every boundary crossing.
    pub(crate) fn rebaseline(&mut self, slot: StageSlot, at: GameTime, elapsed: GameTime) {
        self.slot = slot;
        self.start_time = at;
        self.delay.rebase(at, elapsed);
    }

    /// Whether `other` can be folded into this instance at time `t`.
    pub fn mergeable_with(&self, other: &Instance, t: GameTime, tolerance: GameTime) -> bool {
        self.slot == other.slot
            && self.fake_item == other.fake_item
            && self.favorited == other.favorited
            && self.equipped == other.equipped
            && self.delay.catalyst == other.delay.catalyst
            && self.delay.slope == other.delay.slope
            && self.transform.map(|s| s.catalyst) == other.transform.map(|s| s.catalyst)
            && (self.elapsed(t) - other.elapsed(t)).abs() <= tolerance
    }

    /// Split `n` units off into a new instance with identical progress
    pub fn split_off(&mut self, n: u32) -> Instance {
        let n = n.min(self.count);
        self.count -= n;
        let mut piece = self.clone();
        piece.count = n;
        piece
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_delay_is_continuous() {
        let mut line = DelayLine::neutral(0.0);
        let before = line.elapsed(5.0);
        line.set(5.0, 0.25, Some(ItemId(7)));
        assert!((line.elapsed(5.0) - before).abs() < 1e-9);
        assert!((line.elapsed(9.0) - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_hitting_time() {
        let mut line = DelayLine::neutral(2.0);
        assert_eq!(line.hitting_time(3.0, 1e-6), Some(5.0));
        line.set(3.0, -0.5, None);
        // elapsed(3) = 1, walking back to 0 takes 2h
        assert_eq!(line.hitting_time(0.0, 1e-6), Some(5.0));
        line.set(4.0, 0.0, None);
        assert_eq!(line.hitting_time(10.0, 1e-6), None);
    }

    #[test]
    fn test_split_preserves_progress() {
        let mut inst = Instance::new(StageSlot::Regular(0), 5, 1.0);
        let piece = inst.split_off(2);
        assert_eq!(inst.count, 3);
        assert_eq!(piece.count, 2);
        assert_eq!(piece.elapsed(4.0), inst.elapsed(4.0));
    }

    #[test]
    fn test_mergeable_within_tolerance() {
        let a = Instance::new(StageSlot::Regular(0), 1, 1.0);
        let b = Instance::new(StageSlot::Regular(0), 1, 1.01);
        let c = Instance::new(StageSlot::Regular(0), 1, 1.5);
        assert!(a.mergeable_with(&b, 2.0, 0.015));
        assert!(!a.mergeable_with(&c, 2.0, 0.015));
    }
}
