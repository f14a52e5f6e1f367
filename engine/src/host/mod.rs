//! Host collaborator interfaces
//!
//! The engine never talks to the game directly. Everything it needs from
//! the outside world (clock, inventories, placements, presentation) goes
//! through `Host`, and background work goes through `AsyncExecutor`.
//!
//! Host callbacks are invoked from the foreground thread, the scheduler
//! thread and executor threads, sometimes while engine locks are held. They
//! must not call back into the coordinator.

pub mod memory;

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::catalog::{FormTemplate, StageSlot};
use crate::ids::{AreaId, FeatureId, GameTime, ItemId, LocationId, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InventoryEntry {
    pub count: u32,
    /// Quest items are never removed by queued transfers.
    pub quest: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocationKind {
    Container,
    Placement {
        item: ItemId,
        count: u32,
        position: Position,
        area: AreaId,
        enabled: bool,
        /// Whether the ownership/visibility policy still wants this
        /// placement advanced in the background.
        eligible: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationHandle {
    pub id: LocationId,
    pub kind: LocationKind,
}

impl LocationHandle {
    pub fn is_placement(&self) -> bool {
        matches!(self.kind, LocationKind::Placement { .. })
    }

    pub fn placement_count(&self) -> Option<u32> {
        match self.kind {
            LocationKind::Placement { count, .. } => Some(count),
            LocationKind::Container => None,
        }
    }

    pub fn position(&self) -> Option<Position> {
        match self.kind {
            LocationKind::Placement { position, .. } => Some(position),
            LocationKind::Container => None,
        }
    }

    /// Placement that should keep a pending timer
    pub fn schedulable(&self) -> bool {
        matches!(
            self.kind,
            LocationKind::Placement { enabled: true, eligible: true, .. }
        )
    }
}

/// An item of interest found in a world area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AreaItem {
    pub object: LocationId,
    pub item: ItemId,
    pub position: Position,
}

/// Notification that instances changed stage, for presentation layers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageChangeEvent {
    pub location: LocationId,
    pub catalog: String,
    pub from: StageSlot,
    pub to: StageSlot,
    pub count: u32,
    pub old_item: Option<ItemId>,
    pub new_item: Option<ItemId>,
    pub at: GameTime,
}

pub trait Host: Send + Sync + 'static {
    /// Monotonic in-world clock, in hours
    fn now(&self) -> GameTime;

    fn resolve_location(&self, id: LocationId) -> Option<LocationHandle>;

    /// Whether the host's item registry knows `item`
    fn item_exists(&self, _item: ItemId) -> bool {
        true
    }

    fn inventory(&self, owner: LocationId) -> HashMap<ItemId, InventoryEntry>;

    /// Create a new placement of `count` x `item` next to `near`
    fn create_placement(&self, item: ItemId, count: u32, near: LocationId) -> Option<LocationId>;

    /// Fire-and-forget presentation update (tint, effect, sound)
    fn apply_presentation(&self, location: LocationId, features: &[FeatureId]);

    /// Items from `wanted` present in an area, with their positions
    fn items_in_area(&self, area: AreaId, wanted: &HashSet<ItemId>) -> Vec<AreaItem>;

    /// Inventory mutations issued by the transfer queue. These must not be
    /// echoed back to the engine as ownership updates.
    fn add_item(&self, owner: LocationId, item: ItemId, count: u32);

    fn remove_item(&self, owner: LocationId, item: ItemId, count: u32);

    fn refresh_inventory(&self, _owner: LocationId) {}

    /// Materialize a temporary form for a fake stage
    fn materialize_fake(&self, _template: &FormTemplate) -> Option<ItemId> {
        None
    }

    fn stage_changed(&self, _event: &StageChangeEvent) {}
}

// ============================================================================
// Executors
// ============================================================================

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub trait AsyncExecutor: Send + Sync + 'static {
    fn schedule(&self, job: Job);
}

/// Runs jobs on the global rayon pool
#[derive(Debug, Default, Clone, Copy)]
pub struct RayonExecutor;

impl AsyncExecutor for RayonExecutor {
    fn schedule(&self, job: Job) {
        rayon::spawn(job);
    }
}

/// Runs jobs immediately on the calling thread
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl AsyncExecutor for InlineExecutor {
    fn schedule(&self, job: Job) {
        job();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    #[test]
    fn test_inline_executor_runs_immediately() {
        let hits = Arc::new(AtomicU32::new(0));
        let h = Arc::clone(&hits);
        InlineExecutor.schedule(Box::new(move || {
            h.fetch_add(1, Ordering::Relaxed);
        }));
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_rayon_executor_runs_job() {
        let (tx, rx) = mpsc::channel();
        RayonExecutor.schedule(Box::new(move || {
            let _ = tx.send(7);
        }));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(7));
    }
}
