//! Coordinator - owns every catalog and instance and mediates all access
//!
//! Two ordered locks guard the engine state:
//!
//! * rank 1, `population`: catalogs, instance stores, indices, dirty set
//! * rank 2, `timers`: pending placement timers and the delete queue
//!
//! `timers` may be taken while `population` is held, never the other way
//! round. Host callbacks run without either lock where practical; the
//! proximity snapshot and transfer queue have their own narrow locks.

mod index;
mod resolve;
mod tick;
mod timers;

pub use index::IndexReport;
pub use tick::TickReport;
pub use timers::PendingTimer;

pub(crate) use index::Population;
pub(crate) use resolve::{DefinitionTable, Resolution};
pub(crate) use tick::placement_timer;
pub(crate) use timers::TimerState;

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogDefinition, StageSlot};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::host::{AsyncExecutor, Host, StageChangeEvent};
use crate::ids::{CatalogId, GameTime, ItemId, LocationId};
use crate::instance::{Instance, InstanceFlags};
use crate::lock_order::OrderedRwLock;
use crate::proximity::ProximityIndex;
use crate::scheduler::{PeriodicScheduler, Scheduled, TickOutcome};
use crate::systems::next_due;
use crate::transfer::TransferQueue;

const POPULATION_RANK: u8 = 1;
const TIMERS_RANK: u8 = 2;

// ============================================================================
// Call shapes
// ============================================================================

/// An ownership change reported by the host. `None` endpoints are the
/// untracked outside (created, consumed, bought, sold).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateRequest {
    pub from: Option<LocationId>,
    pub to: Option<LocationId>,
    pub item: ItemId,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdateOutcome {
    pub catalog: Option<CatalogId>,
    /// Units carried over with their progress
    pub moved: u32,
    /// Units with no tracked source, registered fresh at the target
    pub registered: u32,
    /// Units that left tracking
    pub discarded: u32,
    pub over_capacity: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegisterOutcome {
    pub catalog: CatalogId,
    pub merged: bool,
    /// Soft limit exceeded; the registration still happened.
    pub over_capacity: bool,
}

// ============================================================================
// Debug views
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceView {
    pub slot: StageSlot,
    pub item: Option<ItemId>,
    pub count: u32,
    pub start_time: GameTime,
    pub elapsed: GameTime,
    pub slope: f64,
    pub catalyst: Option<ItemId>,
    pub flags: InstanceFlags,
    pub next_due: Option<GameTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogView {
    pub catalog: CatalogId,
    pub key: String,
    pub instances: Vec<InstanceView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationSnapshot {
    pub location: LocationId,
    pub at: GameTime,
    pub catalogs: Vec<CatalogView>,
    pub timer: Option<PendingTimer>,
    pub dirty: bool,
}

impl LocationSnapshot {
    pub fn total_count(&self) -> u32 {
        self.catalogs
            .iter()
            .flat_map(|c| c.instances.iter())
            .fold(0u32, |acc, i| acc.saturating_add(i.count))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStats {
    pub definitions: usize,
    pub catalogs: usize,
    pub unhealthy: Vec<String>,
    pub locations: usize,
    pub instances: usize,
    pub pending_timers: usize,
    pub dirty_locations: usize,
    pub queued_transfers: usize,
    pub proximity_generation: u64,
    pub over_capacity: bool,
    pub scheduler_running: bool,
}

// ============================================================================
// Coordinator
// ============================================================================

pub struct Coordinator {
    pub(crate) host: Arc<dyn Host>,
    executor: Arc<dyn AsyncExecutor>,
    pub(crate) config: EngineConfig,
    excluded: HashSet<LocationId>,
    pub(crate) definitions: DefinitionTable,
    pub(crate) population: OrderedRwLock<Population>,
    pub(crate) timers: OrderedRwLock<TimerState>,
    proximity: Arc<ProximityIndex>,
    transfers: Arc<TransferQueue>,
    instances: Arc<AtomicUsize>,
    scheduler: Mutex<PeriodicScheduler>,
    this: Weak<Coordinator>,
}

impl Coordinator {
    pub fn new(
        config: EngineConfig,
        definitions: Vec<CatalogDefinition>,
        host: Arc<dyn Host>,
        executor: Arc<dyn AsyncExecutor>,
    ) -> Arc<Self> {
        let instances = Arc::new(AtomicUsize::new(0));
        let interval = Duration::from_millis(config.scheduler.interval_ms.max(1));
        info!(
            definitions = definitions.len(),
            interval_ms = interval.as_millis() as u64,
            "coordinator created"
        );
        Arc::new_cyclic(|this| Self {
            host,
            executor,
            excluded: config.excluded_locations.iter().copied().collect(),
            definitions: DefinitionTable::new(definitions),
            population: OrderedRwLock::new(
                POPULATION_RANK,
                "population",
                Population::new(Arc::clone(&instances)),
            ),
            timers: OrderedRwLock::new(TIMERS_RANK, "timers", TimerState::default()),
            proximity: Arc::new(ProximityIndex::new()),
            transfers: Arc::new(TransferQueue::new(config.transfer.max_tasks_per_tick)),
            instances,
            scheduler: Mutex::new(PeriodicScheduler::new(interval)),
            this: this.clone(),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn proximity(&self) -> &Arc<ProximityIndex> {
        &self.proximity
    }

    pub fn transfers(&self) -> &TransferQueue {
        &self.transfers
    }

    /// Approximate instance count, kept in step with every mutation
    pub fn instance_count(&self) -> usize {
        self.instances.load(Ordering::Relaxed)
    }

    pub fn is_over_capacity(&self) -> bool {
        self.instance_count() >= self.config.capacity.max_instances
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.read().len()
    }

    pub fn timer(&self, location: LocationId) -> Option<PendingTimer> {
        self.timers.read().get(location).cloned()
    }

    fn tracked_endpoint(&self, location: Option<LocationId>) -> Option<LocationId> {
        location.filter(|l| !self.excluded.contains(l))
    }

    /// Resolve under the read lock; if the catalog still has to be built,
    /// build it with no lock held and install it under a short write lock.
    /// Callers re-resolve under their own write lock afterwards.
    fn prepare(&self, location: LocationId, item: ItemId) {
        let first = self.population.read().resolve(&self.definitions, location, item);
        if let Resolution::Create(def) = first {
            let built = self.definitions.build(def, self.host.as_ref());
            self.population.write().install(def, built);
        }
    }

    // ========================================================================
    // Register
    // ========================================================================

    /// Start tracking `count` units of `item` at `location`, with progress
    /// starting at `time`.
    pub fn register(
        &self,
        item: ItemId,
        count: u32,
        location: LocationId,
        time: GameTime,
    ) -> Result<RegisterOutcome, EngineError> {
        if count == 0 {
            return Err(EngineError::ZeroCount);
        }
        self.prepare(location, item);
        let handle = self.host.resolve_location(location);
        let now = self.host.now();
        let progression = &self.config.progression;

        let outcome = {
            let mut pop = self.population.write();
            let id = match pop.resolve(&self.definitions, location, item) {
                Resolution::Found(id) => id,
                Resolution::Unhealthy(key) => return Err(EngineError::UnhealthyCatalog(key)),
                Resolution::Create(_) | Resolution::Unknown => {
                    debug!(item = %item, "register: item not tracked");
                    return Err(EngineError::UnknownItem(item));
                }
            };
            let over_capacity = self.is_over_capacity();
            let merged = pop
                .mutate_at(id, location, |catalog, store| {
                    let slot = catalog.slot_of(item)?;
                    Some(store.insert(
                        location,
                        Instance::new(slot, count, time),
                        now,
                        progression.merge_tolerance,
                    ))
                })
                .flatten()
                .ok_or(EngineError::UnknownItem(item))?;

            match handle {
                Some(h) if h.schedulable() => {
                    if let Some(timer) = tick::placement_timer(&pop, location, progression) {
                        self.timers.write().set(timer);
                    }
                }
                Some(h) if h.is_placement() => {}
                _ => {
                    pop.dirty.insert(location);
                }
            }
            RegisterOutcome {
                catalog: id,
                merged,
                over_capacity,
            }
        };

        if outcome.over_capacity {
            warn!(
                instances = self.instance_count(),
                limit = self.config.capacity.max_instances,
                "instance capacity exceeded"
            );
        }
        self.ensure_scheduler();
        Ok(outcome)
    }

    // ========================================================================
    // Update
    // ========================================================================

    /// Apply an ownership change. Misses (untracked item, unknown location,
    /// unhealthy catalog) are logged no-ops.
    pub fn update(&self, request: UpdateRequest) -> UpdateOutcome {
        let mut outcome = UpdateOutcome::default();
        let from = self.tracked_endpoint(request.from);
        let to = self.tracked_endpoint(request.to);
        let item = request.item;
        if request.count == 0 || (from.is_none() && to.is_none()) {
            debug!(item = %item, "update skipped: nothing to move");
            return outcome;
        }

        let from_handle = from.and_then(|l| self.host.resolve_location(l));
        let to_handle = to.and_then(|l| self.host.resolve_location(l));

        // The placement itself holds the authoritative count
        let count = to_handle
            .and_then(|h| h.placement_count())
            .unwrap_or(request.count);

        let from_emptied = match (from, from_handle) {
            (Some(_), None) => true,
            (Some(_), Some(h)) => h.is_placement() && (h.placement_count() == Some(0) || !h.schedulable()),
            _ => false,
        };
        if let (true, Some(f)) = (from_emptied, from) {
            self.timers.write().queue_delete(f);
        }

        let is_catalyst = self.definitions.is_catalyst(item);
        if is_catalyst {
            let mut pop = self.population.write();
            for (loc, handle) in [(from, from_handle), (to, to_handle)] {
                if let (Some(loc), Some(h)) = (loc, handle) {
                    if !h.is_placement() {
                        pop.dirty.insert(loc);
                    }
                }
            }
        }
        if !self.definitions.tracks(item) {
            if !is_catalyst {
                debug!(item = %item, "update skipped: item not tracked");
            }
            self.ensure_scheduler();
            return outcome;
        }

        let Some(anchor) = from.or(to) else {
            return outcome;
        };
        self.prepare(anchor, item);
        let now = self.host.now();
        let progression = &self.config.progression;
        let tolerance = progression.merge_tolerance;

        {
            let mut pop = self.population.write();
            let id = match pop.resolve(&self.definitions, anchor, item) {
                Resolution::Found(id) => id,
                Resolution::Unhealthy(key) => {
                    debug!(item = %item, catalog = %key, "update skipped: catalog unhealthy");
                    return outcome;
                }
                Resolution::Create(_) | Resolution::Unknown => {
                    debug!(item = %item, "update skipped: no catalog");
                    return outcome;
                }
            };
            outcome.catalog = Some(id);

            let taken = match from {
                Some(f) => pop
                    .mutate_at(id, f, |catalog, store| store.take(f, item, count, catalog, now))
                    .unwrap_or_default(),
                None => Vec::new(),
            };
            outcome.moved = taken.iter().map(|i| i.count).sum();

            match to {
                Some(t) => {
                    for piece in taken {
                        pop.mutate_at(id, t, |_, store| store.insert(t, piece, now, tolerance));
                    }
                    let residual = count.saturating_sub(outcome.moved);
                    if residual > 0 {
                        outcome.over_capacity = self.is_over_capacity();
                        outcome.registered = pop
                            .mutate_at(id, t, |catalog, store| {
                                let slot = catalog.slot_of(item)?;
                                store.insert(t, Instance::new(slot, residual, now), now, tolerance);
                                Some(residual)
                            })
                            .flatten()
                            .unwrap_or(0);
                    }

                    match to_handle {
                        Some(h) if h.schedulable() => match tick::placement_timer(&pop, t, progression) {
                            Some(timer) => {
                                self.timers.write().set(timer);
                            }
                            None => {
                                self.timers.write().remove(t);
                            }
                        },
                        Some(h) if h.is_placement() => {}
                        _ => {
                            pop.dirty.insert(t);
                        }
                    }
                }
                None => outcome.discarded = outcome.moved,
            }

            // A partially emptied placement keeps its timer in step
            if let (Some(f), Some(h), false) = (from, from_handle, from_emptied) {
                if h.is_placement() {
                    match tick::placement_timer(&pop, f, progression) {
                        Some(timer) => {
                            self.timers.write().set(timer);
                        }
                        None => {
                            self.timers.write().remove(f);
                        }
                    }
                }
            }
        }

        if outcome.over_capacity {
            warn!(
                instances = self.instance_count(),
                limit = self.config.capacity.max_instances,
                "instance capacity exceeded"
            );
        }
        self.ensure_scheduler();
        outcome
    }

    // ========================================================================
    // Debug snapshots
    // ========================================================================

    pub fn snapshot_location(&self, location: LocationId) -> LocationSnapshot {
        let at = self.host.now();
        let progression = &self.config.progression;
        let pop = self.population.read();
        let catalogs = pop
            .catalogs_at(location)
            .into_iter()
            .filter_map(|id| {
                let entry = pop.entry(id)?;
                let instances = entry
                    .store
                    .at(location)
                    .iter()
                    .map(|inst| InstanceView {
                        slot: inst.slot,
                        item: inst.item(&entry.catalog),
                        count: inst.count,
                        start_time: inst.start_time,
                        elapsed: inst.elapsed(at),
                        slope: inst.delay.slope,
                        catalyst: inst.delay.catalyst,
                        flags: inst.flags(),
                        next_due: next_due(inst, &entry.catalog, progression),
                    })
                    .collect();
                Some(CatalogView {
                    catalog: id,
                    key: entry.catalog.key.clone(),
                    instances,
                })
            })
            .collect();
        let dirty = pop.dirty.contains(&location);
        let timer = self.timers.read().get(location).cloned();
        LocationSnapshot {
            location,
            at,
            catalogs,
            timer,
            dirty,
        }
    }

    pub fn stats(&self) -> EngineStats {
        let (catalogs, unhealthy, locations, dirty_locations) = {
            let pop = self.population.read();
            let unhealthy: Vec<String> = pop.unhealthy().map(|(key, _)| key.to_string()).collect();
            (pop.catalog_count(), unhealthy, pop.location_count(), pop.dirty.len())
        };
        EngineStats {
            definitions: self.definitions.len(),
            catalogs,
            unhealthy,
            locations,
            instances: self.instance_count(),
            pending_timers: self.pending_timers(),
            dirty_locations,
            queued_transfers: self.transfers.total_pending(),
            proximity_generation: self.proximity.snapshot().generation,
            over_capacity: self.is_over_capacity(),
            scheduler_running: self.scheduler_running(),
        }
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    pub fn rebuild_indices(&self) {
        self.population.write().rebuild_indices();
        info!("indices rebuilt");
    }

    pub fn verify_indices(&self) -> IndexReport {
        self.population.read().verify_indices()
    }

    /// Recount instances from the stores and resync the counter
    pub fn recount(&self) -> usize {
        self.population.read().recount()
    }

    /// Drop every catalog, instance, timer and queued transfer. Catalogs are
    /// rebuilt lazily from their definitions afterwards.
    pub fn reset(&self) {
        self.population.write().clear();
        self.timers.write().clear();
        self.transfers.clear();
        info!("engine reset");
    }

    // ========================================================================
    // Scheduler lifecycle
    // ========================================================================

    pub fn start_scheduler(&self) -> bool {
        self.scheduler.lock().start(self.this.clone())
    }

    pub fn scheduler_running(&self) -> bool {
        self.scheduler.lock().is_running()
    }

    pub fn shutdown(&self) {
        self.scheduler.lock().stop();
        info!("coordinator shut down");
    }

    pub(crate) fn ensure_scheduler(&self) {
        if !self.config.scheduler.auto_start || !self.work_pending() {
            return;
        }
        let mut scheduler = self.scheduler.lock();
        if !scheduler.is_running() {
            scheduler.start(self.this.clone());
        }
    }

    fn work_pending(&self) -> bool {
        let dirty = !self.population.read().dirty.is_empty();
        dirty || !self.timers.read().is_empty() || self.transfers.total_pending() > 0
    }

    pub(crate) fn notify(&self, events: &[StageChangeEvent]) {
        for event in events {
            self.host.stage_changed(event);
        }
    }
}

impl Scheduled for Coordinator {
    fn run_tick(&self) -> TickOutcome {
        if self.tick().is_idle() {
            TickOutcome::Idle
        } else {
            TickOutcome::Busy
        }
    }

    fn has_work(&self) -> bool {
        self.work_pending()
    }
}
