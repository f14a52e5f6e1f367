//! Cleanup System
//!
//! Removes emptied instances and decayed instances past the retention
//! horizon.

use crate::ids::{GameTime, LocationId};
use crate::instance::Instance;
use crate::store::CatalogStore;

/// Decayed long enough ago to be forgotten
pub fn is_expired(inst: &Instance, now: GameTime, retention: GameTime) -> bool {
    inst.is_decayed() && now - inst.start_time > retention
}

/// Locations holding anything the next prune pass would remove
pub fn locations_to_prune(store: &CatalogStore, now: GameTime, retention: GameTime) -> Vec<LocationId> {
    store
        .locations()
        .filter(|(_, list)| {
            list.iter()
                .any(|i| i.count == 0 || is_expired(i, now, retention))
        })
        .map(|(loc, _)| *loc)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StageSlot;

    #[test]
    fn test_retention_horizon() {
        let mut store = CatalogStore::new();
        store.insert(LocationId(1), Instance::new(StageSlot::Decayed, 1, 10.0), 10.0, 0.0);
        store.insert(LocationId(2), Instance::new(StageSlot::Regular(0), 1, 0.0), 10.0, 0.0);

        assert!(locations_to_prune(&store, 50.0, 48.0).is_empty());
        assert_eq!(locations_to_prune(&store, 59.0, 48.0), vec![LocationId(1)]);

        let removed = store.prune_location(LocationId(1), |i| is_expired(i, 59.0, 48.0));
        assert_eq!(removed, 1);
        assert!(!store.has_location(LocationId(1)));
        assert!(store.has_location(LocationId(2)));
    }
}
