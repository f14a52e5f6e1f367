//! In-memory host
//!
//! A self-contained world of containers and placements with a manually
//! driven clock. Used by the bench binary and the test suites.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use super::{AreaItem, Host, InventoryEntry, LocationHandle, LocationKind, StageChangeEvent};
use crate::catalog::FormTemplate;
use crate::ids::{AreaId, FeatureId, GameTime, ItemId, LocationId, Position};

#[derive(Debug, Clone)]
enum MemLocation {
    Container(HashMap<ItemId, InventoryEntry>),
    Placement {
        item: ItemId,
        count: u32,
        position: Position,
        area: AreaId,
        enabled: bool,
        eligible: bool,
    },
}

pub struct MemoryHost {
    clock: Mutex<GameTime>,
    locations: RwLock<HashMap<LocationId, MemLocation>>,
    next_location: AtomicU64,
    next_form: AtomicU64,
    presentations: Mutex<Vec<(LocationId, Vec<FeatureId>)>>,
    stage_changes: Mutex<Vec<StageChangeEvent>>,
    refreshes: Mutex<Vec<LocationId>>,
    retired: RwLock<HashSet<ItemId>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self {
            clock: Mutex::new(0.0),
            locations: RwLock::new(HashMap::new()),
            next_location: AtomicU64::new(1_000_000),
            next_form: AtomicU64::new(0xFF00_0000),
            presentations: Mutex::new(Vec::new()),
            stage_changes: Mutex::new(Vec::new()),
            refreshes: Mutex::new(Vec::new()),
            retired: RwLock::new(HashSet::new()),
        }
    }

    /// Remove an item id from the registry; every other id is known
    pub fn retire_item(&self, item: ItemId) {
        self.retired.write().insert(item);
    }

    pub fn set_time(&self, t: GameTime) {
        *self.clock.lock() = t;
    }

    pub fn advance(&self, hours: GameTime) -> GameTime {
        let mut clock = self.clock.lock();
        *clock += hours;
        *clock
    }

    pub fn add_container(&self, id: LocationId) {
        self.locations
            .write()
            .insert(id, MemLocation::Container(HashMap::new()));
    }

    pub fn add_placement(&self, id: LocationId, item: ItemId, count: u32, position: Position, area: AreaId) {
        self.locations.write().insert(
            id,
            MemLocation::Placement {
                item,
                count,
                position,
                area,
                enabled: true,
                eligible: true,
            },
        );
    }

    /// Put items into a container, creating it if needed
    pub fn put(&self, owner: LocationId, item: ItemId, count: u32, quest: bool) {
        let mut locations = self.locations.write();
        let entry = locations
            .entry(owner)
            .or_insert_with(|| MemLocation::Container(HashMap::new()));
        if let MemLocation::Container(items) = entry {
            let e = items.entry(item).or_default();
            e.count = e.count.saturating_add(count);
            e.quest |= quest;
        }
    }

    pub fn count_of(&self, owner: LocationId, item: ItemId) -> u32 {
        match self.locations.read().get(&owner) {
            Some(MemLocation::Container(items)) => items.get(&item).map(|e| e.count).unwrap_or(0),
            Some(MemLocation::Placement { item: i, count, .. }) if *i == item => *count,
            _ => 0,
        }
    }

    pub fn delete(&self, id: LocationId) {
        self.locations.write().remove(&id);
    }

    pub fn set_eligible(&self, id: LocationId, value: bool) {
        if let Some(MemLocation::Placement { eligible, .. }) = self.locations.write().get_mut(&id) {
            *eligible = value;
        }
    }

    pub fn presentations(&self) -> Vec<(LocationId, Vec<FeatureId>)> {
        self.presentations.lock().clone()
    }

    pub fn stage_changes(&self) -> Vec<StageChangeEvent> {
        self.stage_changes.lock().clone()
    }

    pub fn refreshes(&self) -> Vec<LocationId> {
        self.refreshes.lock().clone()
    }
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for MemoryHost {
    fn now(&self) -> GameTime {
        *self.clock.lock()
    }

    fn resolve_location(&self, id: LocationId) -> Option<LocationHandle> {
        let kind = match self.locations.read().get(&id)? {
            MemLocation::Container(_) => LocationKind::Container,
            MemLocation::Placement {
                item,
                count,
                position,
                area,
                enabled,
                eligible,
            } => LocationKind::Placement {
                item: *item,
                count: *count,
                position: *position,
                area: *area,
                enabled: *enabled,
                eligible: *eligible,
            },
        };
        Some(LocationHandle { id, kind })
    }

    fn item_exists(&self, item: ItemId) -> bool {
        !self.retired.read().contains(&item)
    }

    fn inventory(&self, owner: LocationId) -> HashMap<ItemId, InventoryEntry> {
        match self.locations.read().get(&owner) {
            Some(MemLocation::Container(items)) => items.clone(),
            _ => HashMap::new(),
        }
    }

    fn create_placement(&self, item: ItemId, count: u32, near: LocationId) -> Option<LocationId> {
        let (position, area) = match self.locations.read().get(&near)? {
            MemLocation::Placement { position, area, .. } => (*position, *area),
            MemLocation::Container(_) => (Position::default(), AreaId(0)),
        };
        let id = LocationId(self.next_location.fetch_add(1, Ordering::Relaxed));
        self.add_placement(id, item, count, position, area);
        Some(id)
    }

    fn apply_presentation(&self, location: LocationId, features: &[FeatureId]) {
        self.presentations.lock().push((location, features.to_vec()));
    }

    fn items_in_area(&self, area: AreaId, wanted: &HashSet<ItemId>) -> Vec<AreaItem> {
        self.locations
            .read()
            .iter()
            .filter_map(|(id, loc)| match loc {
                MemLocation::Placement {
                    item,
                    position,
                    area: a,
                    enabled: true,
                    ..
                } if *a == area && wanted.contains(item) => Some(AreaItem {
                    object: *id,
                    item: *item,
                    position: *position,
                }),
                _ => None,
            })
            .collect()
    }

    fn add_item(&self, owner: LocationId, item: ItemId, count: u32) {
        let mut locations = self.locations.write();
        match locations.get_mut(&owner) {
            Some(MemLocation::Container(items)) => {
                let e = items.entry(item).or_default();
                e.count = e.count.saturating_add(count);
            }
            Some(MemLocation::Placement { item: i, count: c, .. }) => {
                *i = item;
                *c = count;
            }
            None => {}
        }
    }

    fn remove_item(&self, owner: LocationId, item: ItemId, count: u32) {
        let mut locations = self.locations.write();
        match locations.get_mut(&owner) {
            Some(MemLocation::Container(items)) => {
                if let Some(e) = items.get_mut(&item) {
                    e.count = e.count.saturating_sub(count);
                    if e.count == 0 {
                        items.remove(&item);
                    }
                }
            }
            Some(MemLocation::Placement { item: i, count: c, .. }) if *i == item => {
                *c = c.saturating_sub(count);
            }
            _ => {}
        }
    }

    fn refresh_inventory(&self, owner: LocationId) {
        self.refreshes.lock().push(owner);
    }

    fn materialize_fake(&self, _template: &FormTemplate) -> Option<ItemId> {
        Some(ItemId(self.next_form.fetch_add(1, Ordering::Relaxed) as u32))
    }

    fn stage_changed(&self, event: &StageChangeEvent) {
        self.stage_changes.lock().push(event.clone());
    }
}
