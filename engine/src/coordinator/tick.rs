//! Tick - one background pass over pending placements and dirty containers
//!
//! Order of work:
//! 1. drop timers for deleted or ineligible placements, forget deleted ones
//! 2. request a proximity refresh for every pending placement
//! 3. advance due placements against the latest published snapshot
//! 4. re-apply presentation for placements still waiting
//! 5. re-sync dirty containers from an inventory snapshot
//! 6. prune decayed instances past retention
//! 7. hand queued transfers to the executor

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use super::index::Population;
use super::timers::PendingTimer;
use super::Coordinator;
use crate::catalog::StageCatalog;
use crate::config::ProgressionConfig;
use crate::host::{LocationKind, StageChangeEvent};
use crate::ids::{CatalogId, FeatureId, GameTime, ItemId, LocationId};
use crate::instance::Instance;
use crate::proximity::{ProximityRequest, ProximitySnapshot};
use crate::systems::{
    advance_instance, apply_modulation, is_expired, locations_to_prune, next_due, resolve_in_inventory,
    resolve_in_world, StageChange,
};
use crate::transfer::TransferTask;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    pub now: GameTime,
    pub changes: Vec<StageChangeEvent>,
    /// Due placements advanced this tick
    pub processed: usize,
    /// Waiting placements whose presentation was re-applied
    pub refreshed: usize,
    /// Dirty containers re-synced
    pub synced: usize,
    /// Instances dropped (deleted placements, retention)
    pub removed: usize,
    pub pending_timers: usize,
    pub dirty_remaining: usize,
    pub queued_transfers: usize,
    pub proximity_generation: u64,
}

impl TickReport {
    /// Nothing left for the scheduler to do
    pub fn is_idle(&self) -> bool {
        self.pending_timers == 0 && self.dirty_remaining == 0 && self.queued_transfers == 0
    }
}

fn to_event(location: LocationId, catalog: &StageCatalog, change: StageChange) -> StageChangeEvent {
    StageChangeEvent {
        location,
        catalog: catalog.key.clone(),
        from: change.from,
        to: change.to,
        count: change.count,
        old_item: change.old_item,
        new_item: change.new_item,
        at: change.at,
    }
}

/// Earliest due time over every instance at a placement, with the
/// presentation of the first instance's stage.
pub(crate) fn placement_timer(
    pop: &Population,
    location: LocationId,
    config: &ProgressionConfig,
) -> Option<PendingTimer> {
    let mut due: Option<GameTime> = None;
    let mut features: Option<Vec<FeatureId>> = None;
    for id in pop.catalogs_at(location) {
        let Some(entry) = pop.entry(id) else { continue };
        for inst in entry.store.at(location) {
            if features.is_none() {
                features = entry.catalog.stage(inst.slot).map(|s| s.features.clone());
            }
            if let Some(t) = next_due(inst, &entry.catalog, config) {
                due = Some(due.map_or(t, |d| d.min(t)));
            }
        }
    }
    due.map(|due| PendingTimer {
        location,
        due,
        features: features.unwrap_or_default(),
    })
}

impl Coordinator {
    pub fn tick(&self) -> TickReport {
        let now = self.host.now();
        let mut report = TickReport {
            now,
            ..TickReport::default()
        };

        // Deleted placements lose their instances; ineligible ones only
        // lose their timer
        let gone = {
            let mut timers = self.timers.write();
            let mut gone = timers.take_deletes();
            for location in timers.locations() {
                match self.host.resolve_location(location) {
                    None => {
                        timers.remove(location);
                        gone.push(location);
                    }
                    Some(h) if !h.schedulable() => {
                        timers.remove(location);
                    }
                    Some(_) => {}
                }
            }
            gone
        };
        if !gone.is_empty() {
            let mut pop = self.population.write();
            for location in gone {
                report.removed += pop.remove_location(location);
            }
        }

        let pending = self.timers.read().locations();
        report.proximity_generation = self.request_proximity_refresh(pending);
        let snapshot = self.proximity().snapshot();

        let due = self.timers.write().pop_due(now);
        for timer in due {
            report.processed += 1;
            report.changes.extend(self.advance_placement(timer.location, now, &snapshot));
        }

        let waiting: Vec<(LocationId, Vec<FeatureId>)> = self
            .timers
            .read()
            .waiting()
            .map(|t| (t.location, t.features.clone()))
            .collect();
        for (location, features) in waiting {
            self.host.apply_presentation(location, &features);
            report.refreshed += 1;
        }

        let dirty: Vec<LocationId> = std::mem::take(&mut self.population.write().dirty)
            .into_iter()
            .collect();
        for location in dirty {
            report.changes.extend(self.sync_container(location, now));
            report.synced += 1;
        }

        report.removed += self.prune_expired(now);
        self.schedule_transfers();
        self.notify(&report.changes);

        report.pending_timers = self.timers.read().len();
        report.dirty_remaining = self.population.read().dirty.len();
        report.queued_transfers = self.transfers().total_pending();
        debug!(
            now,
            processed = report.processed,
            synced = report.synced,
            changes = report.changes.len(),
            pending = report.pending_timers,
            "tick complete"
        );
        report
    }

    /// Ask for a proximity rebuild covering `locations` and the catalysts
    /// of every catalog present there. Returns the generation assigned.
    pub fn request_proximity_refresh(&self, locations: Vec<LocationId>) -> u64 {
        let catalysts: HashSet<ItemId> = {
            let pop = self.population.read();
            let found = locations
                .iter()
                .flat_map(|loc| pop.catalogs_at(*loc))
                .filter_map(|id| pop.entry(id))
                .flat_map(|e| e.catalog.settings.catalyst_ids())
                .collect();
            found
        };
        let request = ProximityRequest { locations, catalysts };
        self.proximity()
            .request_refresh(request, Arc::clone(&self.host), self.executor.as_ref())
    }

    /// Re-evaluate one location immediately, outside the timer schedule
    pub fn sync_location(&self, location: LocationId) -> Vec<StageChangeEvent> {
        let now = self.host.now();
        let events = match self.host.resolve_location(location) {
            Some(h) if h.is_placement() => {
                self.timers.write().remove(location);
                let snapshot = self.proximity().snapshot();
                self.advance_placement(location, now, &snapshot)
            }
            Some(_) => self.sync_container(location, now),
            None => {
                debug!(location = %location, "sync skipped: location not found");
                Vec::new()
            }
        };
        self.schedule_transfers();
        self.notify(&events);
        self.ensure_scheduler();
        events
    }

    // ========================================================================
    // Placements
    // ========================================================================

    fn advance_placement(
        &self,
        location: LocationId,
        now: GameTime,
        snapshot: &ProximitySnapshot,
    ) -> Vec<StageChangeEvent> {
        let Some(handle) = self.host.resolve_location(location) else {
            self.timers.write().queue_delete(location);
            return Vec::new();
        };
        let LocationKind::Placement {
            item: shown,
            count: shown_count,
            position,
            ..
        } = handle.kind
        else {
            return Vec::new();
        };
        if !handle.schedulable() {
            return Vec::new();
        }

        let progression = &self.config.progression;
        let radius = self.config.proximity.search_radius;
        let mut events = Vec::new();
        let mut pop = self.population.write();

        for id in pop.catalogs_at(location) {
            pop.mutate_at(id, location, |catalog, store| {
                let Some(list) = store.at_mut(location) else { return };
                for inst in list.iter_mut() {
                    let mut changes = advance_instance(inst, catalog, progression, now);
                    let modulation = resolve_in_world(catalog, inst, position, Some(snapshot), radius);
                    apply_modulation(inst, modulation, now, progression);
                    if self.materialize_fake(catalog, inst) {
                        if let Some(last) = changes.last_mut() {
                            last.new_item = inst.item(catalog);
                        }
                    }
                    events.extend(changes.into_iter().map(|c| to_event(location, catalog, c)));
                }
                store.merge_location(location, now, progression.merge_tolerance);
            });
        }

        self.reconcile_placement(&mut pop, location, shown, shown_count, now);

        let features = match placement_timer(&pop, location, progression) {
            Some(timer) => {
                let features = timer.features.clone();
                self.timers.write().set(timer);
                Some(features)
            }
            None => None,
        };
        drop(pop);

        if !events.is_empty() {
            self.host.apply_presentation(location, &features.unwrap_or_default());
        }
        events
    }

    /// A placement shows a single item. When its instances have diverged,
    /// the largest group stays and every other group is split onto a new
    /// placement next to it.
    fn reconcile_placement(
        &self,
        pop: &mut Population,
        location: LocationId,
        shown: ItemId,
        shown_count: u32,
        now: GameTime,
    ) {
        let mut groups: BTreeMap<ItemId, (u32, CatalogId)> = BTreeMap::new();
        for id in pop.catalogs_at(location) {
            let Some(entry) = pop.entry(id) else { continue };
            for inst in entry.store.at(location) {
                if let Some(item) = inst.item(&entry.catalog) {
                    groups.entry(item).or_insert((0, id)).0 += inst.count;
                }
            }
        }
        let Some((&primary, &(primary_count, _))) = groups
            .iter()
            .max_by_key(|(item, (count, _))| (*count, **item == shown))
        else {
            return;
        };

        if primary != shown || primary_count != shown_count {
            self.host.remove_item(location, shown, shown_count);
            self.host.add_item(location, primary, primary_count);
        }

        let tolerance = self.config.progression.merge_tolerance;
        for (item, (count, id)) in groups {
            if item == primary {
                continue;
            }
            let Some(split) = self.host.create_placement(item, count, location) else {
                debug!(location = %location, item = %item, "could not split diverged placement");
                continue;
            };
            let pieces = pop
                .mutate_at(id, location, |catalog, store| store.take(location, item, count, catalog, now))
                .unwrap_or_default();
            for piece in pieces {
                pop.mutate_at(id, split, |_, store| store.insert(split, piece, now, tolerance));
            }
            if let Some(timer) = placement_timer(pop, split, &self.config.progression) {
                self.timers.write().set(timer);
            }
        }
    }

    // ========================================================================
    // Containers
    // ========================================================================

    fn sync_container(&self, location: LocationId, now: GameTime) -> Vec<StageChangeEvent> {
        let inventory = self.host.inventory(location);
        let progression = &self.config.progression;
        let mut events = Vec::new();
        let mut swaps = Vec::new();

        {
            let mut pop = self.population.write();
            for id in pop.catalogs_at(location) {
                pop.mutate_at(id, location, |catalog, store| {
                    let Some(list) = store.at_mut(location) else { return };
                    for inst in list.iter_mut() {
                        let mut changes = advance_instance(inst, catalog, progression, now);
                        let modulation = resolve_in_inventory(catalog, inst, location, &inventory);
                        apply_modulation(inst, modulation, now, progression);

                        let shown_before = if changes.is_empty() { inst.item(catalog) } else { None };
                        if self.materialize_fake(catalog, inst) {
                            match changes.last_mut() {
                                Some(last) => last.new_item = inst.item(catalog),
                                None => {
                                    // Registered straight into a fake stage
                                    if let (Some(old), Some(new)) = (shown_before, inst.item(catalog)) {
                                        swaps.push(TransferTask::swap(old, new, inst.count));
                                    }
                                }
                            }
                        }
                        for change in &changes {
                            if let (Some(old), Some(new)) = (change.old_item, change.new_item) {
                                if old != new {
                                    swaps.push(TransferTask::swap(old, new, change.count));
                                }
                            }
                        }
                        events.extend(changes.into_iter().map(|c| to_event(location, catalog, c)));
                    }
                    store.merge_location(location, now, progression.merge_tolerance);
                });
            }
            pop.dirty.remove(&location);
        }

        for task in swaps {
            self.transfers().enqueue(location, task);
        }
        events
    }

    // ========================================================================
    // Housekeeping
    // ========================================================================

    fn prune_expired(&self, now: GameTime) -> usize {
        let retention = self.config.progression.retention;
        let mut pop = self.population.write();
        let targets: Vec<(CatalogId, LocationId)> = pop
            .healthy()
            .flat_map(|(id, entry)| {
                locations_to_prune(&entry.store, now, retention)
                    .into_iter()
                    .map(move |loc| (id, loc))
            })
            .collect();
        let mut removed = 0;
        for (id, location) in targets {
            removed += pop
                .mutate_at(id, location, |_, store| {
                    store.prune_location(location, |i| is_expired(i, now, retention))
                })
                .unwrap_or(0);
        }
        if removed > 0 {
            debug!(removed, "pruned expired instances");
        }
        removed
    }

    fn schedule_transfers(&self) {
        if self.transfers().total_pending() == 0 {
            return;
        }
        let transfers = Arc::clone(&self.transfers);
        let host = Arc::clone(&self.host);
        self.executor.schedule(Box::new(move || {
            let report = transfers.drain(host.as_ref());
            debug!(
                applied = report.applied,
                dropped = report.dropped,
                remaining = report.remaining,
                "transfer batch drained"
            );
        }));
    }

    /// Give an instance in a fake stage its temporary host form
    fn materialize_fake(&self, catalog: &StageCatalog, inst: &mut Instance) -> bool {
        let Some(no) = inst.stage_no() else { return false };
        if inst.fake_item.is_some() || !catalog.is_fake(no) {
            return false;
        }
        let Some(template) = catalog.form_template(no) else {
            return false;
        };
        match self.host.materialize_fake(&template) {
            Some(form) => {
                inst.fake_item = Some(form);
                true
            }
            None => {
                debug!(catalog = %catalog.key, stage = no, "host did not materialize fake form");
                false
            }
        }
    }
}
