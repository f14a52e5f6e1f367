//! Proximity index - which catalysts lie near pending world placements
//!
//! Each refresh request takes a new generation number. The cheap half of a
//! rebuild (collecting candidate catalysts and locations) runs on the
//! caller; the expensive half (walking areas for catalyst positions) runs on
//! the async executor. A finished rebuild is published only if no newer
//! generation has been requested in the meantime, so a slow rebuild can
//! never replace fresher data. Readers get an owned `Arc` snapshot and never
//! wait on a rebuild.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::host::{AsyncExecutor, Host, LocationKind};
use crate::ids::{ItemId, LocationId, Position};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearbyCatalyst {
    pub object: LocationId,
    pub position: Position,
}

/// Immutable once published.
#[derive(Debug, Clone, Default)]
pub struct ProximitySnapshot {
    pub generation: u64,
    entries: HashMap<ItemId, Vec<NearbyCatalyst>>,
}

impl ProximitySnapshot {
    pub fn empty(generation: u64) -> Self {
        Self {
            generation,
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, catalyst: ItemId, entry: NearbyCatalyst) {
        self.entries.entry(catalyst).or_default().push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, catalyst: ItemId) -> &[NearbyCatalyst] {
        self.entries.get(&catalyst).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Any instance of `catalyst` within `radius` of `position`
    pub fn any_within(&self, catalyst: ItemId, position: Position, radius: f32) -> bool {
        self.get(catalyst)
            .iter()
            .any(|c| c.position.within(&position, radius))
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProximityRequest {
    pub locations: Vec<LocationId>,
    pub catalysts: HashSet<ItemId>,
}

impl ProximityRequest {
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty() || self.catalysts.is_empty()
    }
}

pub struct ProximityIndex {
    requested: AtomicU64,
    current: ArcSwap<ProximitySnapshot>,
    publish_lock: Mutex<()>,
}

impl ProximityIndex {
    pub fn new() -> Self {
        Self {
            requested: AtomicU64::new(0),
            current: ArcSwap::from_pointee(ProximitySnapshot::empty(0)),
            publish_lock: Mutex::new(()),
        }
    }

    /// Reserve the next generation number
    pub fn next_generation(&self) -> u64 {
        self.requested.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn latest_requested(&self) -> u64 {
        self.requested.load(Ordering::SeqCst)
    }

    /// Current published snapshot
    pub fn snapshot(&self) -> Arc<ProximitySnapshot> {
        self.current.load_full()
    }

    /// Replace the snapshot unless a newer generation has been requested or
    /// is already published. Returns whether it was published.
    pub fn publish(&self, snapshot: ProximitySnapshot) -> bool {
        let _guard = self.publish_lock.lock();
        let latest = self.latest_requested();
        let current = self.current.load().generation;
        if snapshot.generation < latest || snapshot.generation < current {
            debug!(
                generation = snapshot.generation,
                latest, "discarding stale proximity snapshot"
            );
            return false;
        }
        self.current.store(Arc::new(snapshot));
        true
    }

    /// Start a rebuild for `request`. Returns the generation assigned to it.
    pub fn request_refresh(
        self: &Arc<Self>,
        request: ProximityRequest,
        host: Arc<dyn Host>,
        executor: &dyn AsyncExecutor,
    ) -> u64 {
        let generation = self.next_generation();

        // Short-circuit: nothing to look for, or already superseded
        if request.is_empty() || self.latest_requested() != generation {
            self.publish(ProximitySnapshot::empty(generation));
            return generation;
        }

        let index = Arc::clone(self);
        executor.schedule(Box::new(move || {
            if index.latest_requested() != generation {
                debug!(generation, "proximity rebuild superseded before start");
                return;
            }
            let snapshot = build_snapshot(generation, &request, host.as_ref());
            index.publish(snapshot);
        }));
        generation
    }
}

impl Default for ProximityIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Expensive phase: resolve locations to areas and record catalyst positions
fn build_snapshot(generation: u64, request: &ProximityRequest, host: &dyn Host) -> ProximitySnapshot {
    let areas: BTreeSet<_> = request
        .locations
        .iter()
        .filter_map(|loc| host.resolve_location(*loc))
        .filter_map(|h| match h.kind {
            LocationKind::Placement { area, .. } => Some(area),
            LocationKind::Container => None,
        })
        .collect();

    let mut snapshot = ProximitySnapshot::empty(generation);
    for area in areas {
        for found in host.items_in_area(area, &request.catalysts) {
            snapshot.insert(
                found.item,
                NearbyCatalyst {
                    object: found.object,
                    position: found.position,
                },
            );
        }
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::MemoryHost;
    use crate::host::{InlineExecutor, Job};
    use crate::ids::AreaId;

    /// Holds jobs until released, to simulate a slow rebuild
    #[derive(Default)]
    struct DeferredExecutor {
        jobs: Mutex<Vec<Job>>,
    }

    impl DeferredExecutor {
        fn run_all(&self) {
            let jobs: Vec<Job> = self.jobs.lock().drain(..).collect();
            for job in jobs {
                job();
            }
        }
    }

    impl AsyncExecutor for DeferredExecutor {
        fn schedule(&self, job: Job) {
            self.jobs.lock().push(job);
        }
    }

    fn world() -> Arc<MemoryHost> {
        let host = Arc::new(MemoryHost::new());
        host.add_placement(LocationId(1), ItemId(10), 1, Position::default(), AreaId(3));
        host.add_placement(LocationId(2), ItemId(50), 1, Position::new(5.0, 0.0, 0.0), AreaId(3));
        host
    }

    fn request() -> ProximityRequest {
        ProximityRequest {
            locations: vec![LocationId(1)],
            catalysts: [ItemId(50)].into_iter().collect(),
        }
    }

    #[test]
    fn test_rebuild_publishes_positions() {
        let index = Arc::new(ProximityIndex::new());
        let generation = index.request_refresh(request(), world(), &InlineExecutor);
        let snap = index.snapshot();
        assert_eq!(snap.generation, generation);
        assert!(snap.any_within(ItemId(50), Position::default(), 10.0));
        assert_eq!(snap.get(ItemId(50))[0].object, LocationId(2));
    }

    #[test]
    fn test_stale_publish_is_noop() {
        let index = ProximityIndex::new();
        let old = index.next_generation();
        let new = index.next_generation();
        assert!(!index.publish(ProximitySnapshot::empty(old)));
        assert!(index.publish(ProximitySnapshot::empty(new)));
        assert_eq!(index.snapshot().generation, new);
    }

    #[test]
    fn test_slow_rebuild_cannot_overwrite_newer() {
        let index = Arc::new(ProximityIndex::new());
        let host = world();
        let slow = DeferredExecutor::default();

        let first = index.request_refresh(request(), host.clone(), &slow);
        let second = index.request_refresh(request(), host.clone(), &InlineExecutor);
        assert!(second > first);
        assert_eq!(index.snapshot().generation, second);

        // The slow job finishes late and must be discarded
        slow.run_all();
        assert_eq!(index.snapshot().generation, second);
        assert!(!index.snapshot().is_empty());
    }

    #[test]
    fn test_empty_request_short_circuits() {
        let index = Arc::new(ProximityIndex::new());
        let slow = DeferredExecutor::default();
        let generation = index.request_refresh(ProximityRequest::default(), world(), &slow);
        assert!(slow.jobs.lock().is_empty());
        assert_eq!(index.snapshot().generation, generation);
        assert!(index.snapshot().is_empty());
    }
}
