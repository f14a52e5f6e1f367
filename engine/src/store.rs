//! Per-catalog instance store
//!
//! Maps each location to the instances of one catalog held there. This is
//! the authoritative data; the coordinator's location and stage indices are
//! derived from it.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use crate::catalog::{StageCatalog, StageSlot};
use crate::ids::{GameTime, ItemId, LocationId};
use crate::instance::Instance;

#[derive(Debug, Clone, Default)]
pub struct CatalogStore {
    locations: BTreeMap<LocationId, Vec<Instance>>,
}

impl CatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(&self, location: LocationId) -> &[Instance] {
        self.locations
            .get(&location)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn at_mut(&mut self, location: LocationId) -> Option<&mut Vec<Instance>> {
        self.locations.get_mut(&location)
    }

    pub fn has_location(&self, location: LocationId) -> bool {
        self.locations
            .get(&location)
            .map(|v| !v.is_empty())
            .unwrap_or(false)
    }

    pub fn locations(&self) -> impl Iterator<Item = (&LocationId, &Vec<Instance>)> {
        self.locations.iter()
    }

    pub fn location_ids(&self) -> Vec<LocationId> {
        self.locations.keys().copied().collect()
    }

    pub fn instance_count(&self) -> usize {
        self.locations.values().map(Vec::len).sum()
    }

    /// Insert an instance, folding it into a near-identical one if present
    /// and the combined count still fits. Returns true when merged.
    pub fn insert(&mut self, location: LocationId, instance: Instance, now: GameTime, tolerance: GameTime) -> bool {
        if instance.count == 0 {
            return false;
        }
        let list = self.locations.entry(location).or_default();
        if let Some(existing) = list
            .iter_mut()
            .find(|e| e.mergeable_with(&instance, now, tolerance) && e.count.checked_add(instance.count).is_some())
        {
            existing.count += instance.count;
            return true;
        }
        list.push(instance);
        false
    }

    /// Remove up to `count` units appearing as `item`, most progressed first.
    /// Returns the split-off pieces; their counts sum to the amount taken.
    pub fn take(
        &mut self,
        location: LocationId,
        item: ItemId,
        count: u32,
        catalog: &StageCatalog,
        now: GameTime,
    ) -> Vec<Instance> {
        let Some(list) = self.locations.get_mut(&location) else {
            return Vec::new();
        };

        let mut order: Vec<usize> = (0..list.len())
            .filter(|&i| list[i].item(catalog) == Some(item))
            .collect();
        order.sort_by(|&a, &b| progress_order(&list[b], &list[a], now));

        let mut remaining = count;
        let mut taken = Vec::new();
        for i in order {
            if remaining == 0 {
                break;
            }
            let piece = list[i].split_off(remaining);
            remaining -= piece.count;
            if piece.count > 0 {
                taken.push(piece);
            }
        }
        list.retain(|i| i.count > 0);
        if list.is_empty() {
            self.locations.remove(&location);
        }
        taken
    }

    /// Fold near-identical instances at a location together
    pub fn merge_location(&mut self, location: LocationId, now: GameTime, tolerance: GameTime) -> usize {
        let Some(list) = self.locations.get_mut(&location) else {
            return 0;
        };
        let mut merged: Vec<Instance> = Vec::with_capacity(list.len());
        let mut folds = 0;
        for inst in list.drain(..) {
            match merged
                .iter_mut()
                .find(|m| m.mergeable_with(&inst, now, tolerance) && m.count.checked_add(inst.count).is_some())
            {
                Some(m) => {
                    m.count += inst.count;
                    folds += 1;
                }
                None => merged.push(inst),
            }
        }
        *list = merged;
        folds
    }

    /// Drop zero-count instances and instances matching `expired`, then
    /// forget empty locations. Returns the number of instances removed.
    pub fn prune_where(&mut self, mut expired: impl FnMut(&Instance) -> bool) -> usize {
        let mut removed = 0;
        self.locations.retain(|_, list| {
            let before = list.len();
            list.retain(|i| i.count > 0 && !expired(i));
            removed += before - list.len();
            !list.is_empty()
        });
        removed
    }

    /// Same as `prune_where` restricted to one location
    pub fn prune_location(&mut self, location: LocationId, mut expired: impl FnMut(&Instance) -> bool) -> usize {
        let Some(list) = self.locations.get_mut(&location) else {
            return 0;
        };
        let before = list.len();
        list.retain(|i| i.count > 0 && !expired(i));
        let removed = before - list.len();
        if list.is_empty() {
            self.locations.remove(&location);
        }
        removed
    }

    pub fn remove_location(&mut self, location: LocationId) -> Vec<Instance> {
        self.locations.remove(&location).unwrap_or_default()
    }

    /// Total count appearing as `item` at a location
    pub fn count_of(&self, location: LocationId, item: ItemId, catalog: &StageCatalog) -> u32 {
        self.at(location)
            .iter()
            .filter(|i| i.item(catalog) == Some(item))
            .fold(0u32, |acc, i| acc.saturating_add(i.count))
    }

    /// Number of instances per item at a location, for index maintenance
    pub fn item_tally(&self, location: LocationId, catalog: &StageCatalog) -> HashMap<ItemId, u32> {
        let mut tally = HashMap::new();
        for inst in self.at(location) {
            if let Some(item) = inst.item(catalog) {
                *tally.entry(item).or_insert(0) += 1;
            }
        }
        tally
    }
}

/// Orders by stage then by elapsed progress; terminal stages sort last
/// in the forward direction.
fn progress_order(a: &Instance, b: &Instance, now: GameTime) -> Ordering {
    let rank = |i: &Instance| match i.slot {
        StageSlot::Regular(no) => no as i64,
        StageSlot::Decayed | StageSlot::Transformed(_) => i64::MAX,
    };
    rank(a)
        .cmp(&rank(b))
        .then_with(|| a.elapsed(now).total_cmp(&b.elapsed(now)))
}
