//! Population - every catalog, its instance store, and the derived indices
//!
//! The location index (`location -> catalogs`) and stage index
//! (`item -> catalog -> instances showing it`) are caches over the stores.
//! All structural mutation goes through `mutate_at`, which diffs the
//! location's item tally before and after and patches both indices and the
//! shared instance counter, so the caches cannot drift from the stores.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::catalog::StageCatalog;
use crate::error::CatalogError;
use crate::ids::{CatalogId, ItemId, LocationId};
use crate::store::CatalogStore;

pub(crate) struct CatalogEntry {
    pub catalog: Arc<StageCatalog>,
    pub store: CatalogStore,
}

pub(crate) enum CatalogSlot {
    Healthy(CatalogEntry),
    Unhealthy { key: String, error: CatalogError },
}

impl CatalogSlot {
    pub fn key(&self) -> &str {
        match self {
            CatalogSlot::Healthy(entry) => &entry.catalog.key,
            CatalogSlot::Unhealthy { key, .. } => key,
        }
    }
}

/// Result of comparing the live indices with a fresh rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub location_mismatches: Vec<LocationId>,
    pub stage_mismatches: Vec<ItemId>,
    pub counter: usize,
    pub counted: usize,
}

impl IndexReport {
    pub fn is_consistent(&self) -> bool {
        self.location_mismatches.is_empty() && self.stage_mismatches.is_empty() && self.counter == self.counted
    }
}

type LocationIndex = HashMap<LocationId, BTreeSet<CatalogId>>;
type StageIndex = HashMap<ItemId, BTreeMap<CatalogId, u32>>;

pub(crate) struct Population {
    catalogs: Vec<CatalogSlot>,
    /// Definition index -> catalog built from it
    built: HashMap<usize, CatalogId>,
    location_index: LocationIndex,
    stage_index: StageIndex,
    pub dirty: BTreeSet<LocationId>,
    counter: Arc<AtomicUsize>,
}

impl Population {
    pub fn new(counter: Arc<AtomicUsize>) -> Self {
        Self {
            catalogs: Vec::new(),
            built: HashMap::new(),
            location_index: HashMap::new(),
            stage_index: HashMap::new(),
            dirty: BTreeSet::new(),
            counter,
        }
    }

    // ========================================================================
    // Catalogs
    // ========================================================================

    pub fn built_from(&self, definition: usize) -> Option<CatalogId> {
        self.built.get(&definition).copied()
    }

    /// Record the outcome of building a definition. If another caller got
    /// there first, its catalog is kept.
    pub fn install(&mut self, definition: usize, built: Result<StageCatalog, (String, CatalogError)>) -> CatalogId {
        if let Some(id) = self.built.get(&definition) {
            return *id;
        }
        let id = CatalogId(self.catalogs.len() as u32);
        let slot = match built {
            Ok(catalog) => CatalogSlot::Healthy(CatalogEntry {
                catalog: Arc::new(catalog),
                store: CatalogStore::new(),
            }),
            Err((key, error)) => CatalogSlot::Unhealthy { key, error },
        };
        self.catalogs.push(slot);
        self.built.insert(definition, id);
        id
    }

    pub fn slot(&self, id: CatalogId) -> Option<&CatalogSlot> {
        self.catalogs.get(id.0 as usize)
    }

    pub fn entry(&self, id: CatalogId) -> Option<&CatalogEntry> {
        match self.slot(id)? {
            CatalogSlot::Healthy(entry) => Some(entry),
            CatalogSlot::Unhealthy { .. } => None,
        }
    }

    pub fn healthy(&self) -> impl Iterator<Item = (CatalogId, &CatalogEntry)> {
        self.catalogs
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| match slot {
                CatalogSlot::Healthy(entry) => Some((CatalogId(i as u32), entry)),
                CatalogSlot::Unhealthy { .. } => None,
            })
    }

    pub fn unhealthy(&self) -> impl Iterator<Item = (&str, &CatalogError)> {
        self.catalogs.iter().filter_map(|slot| match slot {
            CatalogSlot::Unhealthy { key, error } => Some((key.as_str(), error)),
            CatalogSlot::Healthy(_) => None,
        })
    }

    pub fn catalog_count(&self) -> usize {
        self.catalogs.len()
    }

    // ========================================================================
    // Indices
    // ========================================================================

    pub fn catalogs_at(&self, location: LocationId) -> Vec<CatalogId> {
        self.location_index
            .get(&location)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn location_catalogs(&self, location: LocationId) -> Option<&BTreeSet<CatalogId>> {
        self.location_index.get(&location)
    }

    /// Catalogs with at least one instance showing `item`
    pub fn catalogs_showing(&self, item: ItemId) -> Option<&BTreeMap<CatalogId, u32>> {
        self.stage_index.get(&item)
    }

    pub fn locations(&self) -> impl Iterator<Item = &LocationId> {
        self.location_index.keys()
    }

    pub fn location_count(&self) -> usize {
        self.location_index.len()
    }

    /// Run `f` against one catalog's store, scoped to `location`, and patch
    /// the indices and counter from the before/after tally. `f` must only
    /// touch `location`. Returns `None` for unknown or unhealthy catalogs.
    pub fn mutate_at<R>(
        &mut self,
        id: CatalogId,
        location: LocationId,
        f: impl FnOnce(&StageCatalog, &mut CatalogStore) -> R,
    ) -> Option<R> {
        let Population {
            catalogs,
            location_index,
            stage_index,
            counter,
            ..
        } = self;
        let CatalogSlot::Healthy(entry) = catalogs.get_mut(id.0 as usize)? else {
            return None;
        };

        let before = entry.store.item_tally(location, &entry.catalog);
        let before_len = entry.store.at(location).len();
        let result = f(entry.catalog.as_ref(), &mut entry.store);
        let after = entry.store.item_tally(location, &entry.catalog);
        let after_len = entry.store.at(location).len();

        patch_stage_index(stage_index, id, &before, &after);
        if entry.store.has_location(location) {
            location_index.entry(location).or_default().insert(id);
        } else if let Some(set) = location_index.get_mut(&location) {
            set.remove(&id);
            if set.is_empty() {
                location_index.remove(&location);
            }
        }
        if after_len >= before_len {
            counter.fetch_add(after_len - before_len, Ordering::Relaxed);
        } else {
            counter.fetch_sub(before_len - after_len, Ordering::Relaxed);
        }
        Some(result)
    }

    /// Drop every instance at `location` across all catalogs
    pub fn remove_location(&mut self, location: LocationId) -> usize {
        let mut removed = 0;
        for id in self.catalogs_at(location) {
            removed += self
                .mutate_at(id, location, |_, store| store.remove_location(location).len())
                .unwrap_or(0);
        }
        self.dirty.remove(&location);
        removed
    }

    /// Count instances directly from the stores and resync the counter
    pub fn recount(&self) -> usize {
        let total = self.healthy().map(|(_, e)| e.store.instance_count()).sum();
        self.counter.store(total, Ordering::Relaxed);
        total
    }

    fn fresh_indices(&self) -> (LocationIndex, StageIndex) {
        let mut locations: LocationIndex = HashMap::new();
        let mut stages: StageIndex = HashMap::new();
        for (id, entry) in self.healthy() {
            for (loc, list) in entry.store.locations() {
                if list.is_empty() {
                    continue;
                }
                locations.entry(*loc).or_default().insert(id);
                for inst in list {
                    if let Some(item) = inst.item(&entry.catalog) {
                        *stages.entry(item).or_default().entry(id).or_insert(0) += 1;
                    }
                }
            }
        }
        (locations, stages)
    }

    pub fn rebuild_indices(&mut self) {
        let (locations, stages) = self.fresh_indices();
        self.location_index = locations;
        self.stage_index = stages;
        self.recount();
    }

    pub fn verify_indices(&self) -> IndexReport {
        let (locations, stages) = self.fresh_indices();

        let mut location_mismatches: Vec<LocationId> = locations
            .keys()
            .chain(self.location_index.keys())
            .filter(|loc| locations.get(*loc) != self.location_index.get(*loc))
            .copied()
            .collect();
        location_mismatches.sort();
        location_mismatches.dedup();

        let mut stage_mismatches: Vec<ItemId> = stages
            .keys()
            .chain(self.stage_index.keys())
            .filter(|item| stages.get(*item) != self.stage_index.get(*item))
            .copied()
            .collect();
        stage_mismatches.sort();
        stage_mismatches.dedup();

        IndexReport {
            location_mismatches,
            stage_mismatches,
            counter: self.counter.load(Ordering::Relaxed),
            counted: self.healthy().map(|(_, e)| e.store.instance_count()).sum(),
        }
    }

    /// Forget every catalog and instance
    pub fn clear(&mut self) {
        self.catalogs.clear();
        self.built.clear();
        self.location_index.clear();
        self.stage_index.clear();
        self.dirty.clear();
        self.counter.store(0, Ordering::Relaxed);
    }
}

fn patch_stage_index(
    index: &mut StageIndex,
    id: CatalogId,
    before: &HashMap<ItemId, u32>,
    after: &HashMap<ItemId, u32>,
) {
    for (item, n) in before {
        let Some(per_catalog) = index.get_mut(item) else { continue };
        if let Some(count) = per_catalog.get_mut(&id) {
            *count = count.saturating_sub(*n);
            if *count == 0 {
                per_catalog.remove(&id);
            }
        }
        if per_catalog.is_empty() {
            index.remove(item);
        }
    }
    for (item, n) in after {
        *index.entry(*item).or_default().entry(id).or_insert(0) += n;
    }
}
