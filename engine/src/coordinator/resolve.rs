//! Catalog resolution
//!
//! Finds which catalog owns an item at a location. The definition table is
//! static for the life of the coordinator; catalogs themselves are built
//! lazily the first time one of their items is seen.

use std::collections::{HashMap, HashSet};
use tracing::warn;

use super::index::{CatalogSlot, Population};
use crate::catalog::{CatalogDefinition, StageCatalog};
use crate::error::CatalogError;
use crate::host::{Host, LocationKind};
use crate::ids::{CatalogId, ItemId, LocationId};

pub(crate) struct DefinitionTable {
    definitions: Vec<CatalogDefinition>,
    by_item: HashMap<ItemId, Vec<usize>>,
    by_key: HashMap<String, usize>,
    catalysts: HashSet<ItemId>,
}

impl DefinitionTable {
    pub fn new(definitions: Vec<CatalogDefinition>) -> Self {
        let mut by_item: HashMap<ItemId, Vec<usize>> = HashMap::new();
        let mut by_key = HashMap::new();
        let mut catalysts = HashSet::new();
        for (i, def) in definitions.iter().enumerate() {
            for item in def.item_ids() {
                let owners = by_item.entry(item).or_default();
                if !owners.contains(&i) {
                    owners.push(i);
                }
            }
            if by_key.insert(def.key.clone(), i).is_some() {
                warn!(key = %def.key, "duplicate catalog key, later definition wins for saves");
            }
            catalysts.extend(def.catalysts.iter().map(|c| c.catalyst));
        }
        Self {
            definitions,
            by_item,
            by_key,
            catalysts,
        }
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn get(&self, index: usize) -> Option<&CatalogDefinition> {
        self.definitions.get(index)
    }

    pub fn index_of_key(&self, key: &str) -> Option<usize> {
        self.by_key.get(key).copied()
    }

    pub fn owners_of(&self, item: ItemId) -> &[usize] {
        self.by_item.get(&item).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_catalyst(&self, item: ItemId) -> bool {
        self.catalysts.contains(&item)
    }

    pub fn tracks(&self, item: ItemId) -> bool {
        self.by_item.contains_key(&item)
    }

    /// Build a definition's catalog, checking its catalyst and container
    /// references against the host. Runs without any engine lock held.
    pub fn build(&self, index: usize, host: &dyn Host) -> Result<StageCatalog, (String, CatalogError)> {
        let Some(def) = self.definitions.get(index) else {
            return Err((
                format!("#{}", index),
                CatalogError::NoStages { key: format!("#{}", index) },
            ));
        };
        StageCatalog::build(def)
            .and_then(|catalog| check_references(def, host).map(|()| catalog))
            .map_err(|e| {
                warn!(key = %def.key, "catalog is unhealthy: {}", e);
                (def.key.clone(), e)
            })
    }
}

fn check_references(def: &CatalogDefinition, host: &dyn Host) -> Result<(), CatalogError> {
    if let Some(c) = def.catalysts.iter().find(|c| !host.item_exists(c.catalyst)) {
        return Err(CatalogError::UnresolvedCatalyst {
            key: def.key.clone(),
            catalyst: c.catalyst,
        });
    }
    let is_container = |id: &LocationId| {
        matches!(
            host.resolve_location(*id).map(|h| h.kind),
            Some(LocationKind::Container)
        )
    };
    let locations = def
        .containers
        .iter()
        .chain(def.catalysts.iter().flat_map(|c| c.owner_restriction.iter()));
    for location in locations {
        if !is_container(location) {
            return Err(CatalogError::UnresolvedContainer {
                key: def.key.clone(),
                location: *location,
            });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Resolution {
    Found(CatalogId),
    /// No catalog built yet for this definition
    Create(usize),
    Unhealthy(String),
    Unknown,
}

impl Population {
    /// Resolve the catalog that owns `item` at `location`.
    ///
    /// Preference order: the only catalog already at the location, then
    /// catalogs both at the location and showing the item (ties go to one
    /// holding that exact item there), then any healthy catalog whose
    /// definition contains the item, then a catalog still to be built.
    pub(crate) fn resolve(&self, defs: &DefinitionTable, location: LocationId, item: ItemId) -> Resolution {
        let knows = |id: CatalogId| {
            self.entry(id)
                .map(|e| e.catalog.slot_of(item).is_some() || holds_fake(e, location, item))
                .unwrap_or(false)
        };

        if let Some(present) = self.location_catalogs(location) {
            if present.len() == 1 {
                if let Some(&only) = present.iter().next() {
                    if knows(only) {
                        return Resolution::Found(only);
                    }
                }
            }

            if let Some(showing) = self.catalogs_showing(item) {
                let candidates: Vec<CatalogId> = present
                    .iter()
                    .filter(|id| showing.contains_key(*id))
                    .copied()
                    .collect();
                match candidates.as_slice() {
                    [] => {}
                    [one] => return Resolution::Found(*one),
                    many => {
                        let exact = many.iter().find(|id| {
                            self.entry(**id)
                                .map(|e| e.store.count_of(location, item, &e.catalog) > 0)
                                .unwrap_or(false)
                        });
                        return Resolution::Found(*exact.unwrap_or(&many[0]));
                    }
                }
            }
        }

        let mut unbuilt = None;
        let mut unhealthy = None;
        for &def in defs.owners_of(item) {
            match self.built_from(def) {
                Some(id) => match self.slot(id) {
                    Some(CatalogSlot::Healthy(_)) => return Resolution::Found(id),
                    Some(slot @ CatalogSlot::Unhealthy { .. }) => {
                        unhealthy.get_or_insert_with(|| slot.key().to_string());
                    }
                    None => {}
                },
                None => {
                    unbuilt.get_or_insert(def);
                }
            }
        }
        if let Some(def) = unbuilt {
            return Resolution::Create(def);
        }
        match unhealthy {
            Some(key) => Resolution::Unhealthy(key),
            None => Resolution::Unknown,
        }
    }
}

/// Fake forms are minted at runtime and only known through the instances
/// carrying them.
fn holds_fake(entry: &super::index::CatalogEntry, location: LocationId, item: ItemId) -> bool {
    entry.store.at(location).iter().any(|i| i.fake_item == Some(item))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::{apple, stage_def};
    use crate::catalog::{CatalystDefinition, CatalystEffect, StageSlot};
    use crate::host::memory::MemoryHost;
    use crate::ids::{AreaId, Position};
    use crate::instance::Instance;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    const LOC: LocationId = LocationId(7);

    fn pear() -> CatalogDefinition {
        let mut def = apple();
        def.key = "pear".into();
        def.base_item = ItemId(20);
        def.stages = vec![stage_def(0, 20, 1.0), stage_def(1, 21, 2.0)];
        def.decayed_item = ItemId(19);
        def
    }

    fn setup(defs: Vec<CatalogDefinition>) -> (DefinitionTable, Population) {
        (
            DefinitionTable::new(defs),
            Population::new(Arc::new(AtomicUsize::new(0))),
        )
    }

    fn install(defs: &DefinitionTable, pop: &mut Population, def: usize) -> CatalogId {
        pop.install(def, defs.build(def, &MemoryHost::new()))
    }

    #[test]
    fn test_unknown_item() {
        let (defs, pop) = setup(vec![apple()]);
        assert_eq!(pop.resolve(&defs, LOC, ItemId(999)), Resolution::Unknown);
    }

    #[test]
    fn test_create_then_found() {
        let (defs, mut pop) = setup(vec![apple()]);
        assert_eq!(pop.resolve(&defs, LOC, ItemId(11)), Resolution::Create(0));
        let id = install(&defs, &mut pop, 0);
        assert_eq!(pop.resolve(&defs, LOC, ItemId(11)), Resolution::Found(id));
    }

    #[test]
    fn test_unhealthy_definition() {
        let mut bad = apple();
        bad.stages = vec![stage_def(0, 10, 1.0), stage_def(2, 11, 1.0)];
        let (defs, mut pop) = setup(vec![bad]);
        install(&defs, &mut pop, 0);
        assert_eq!(pop.resolve(&defs, LOC, ItemId(10)), Resolution::Unhealthy("apple".into()));
    }

    #[test]
    fn test_unresolved_catalyst_is_unhealthy() {
        let mut def = apple();
        def.catalysts.push(CatalystDefinition {
            catalyst: ItemId(50),
            effect: CatalystEffect::Delay { rate: 0.5 },
            owner_restriction: Vec::new(),
            allowed_stages: Vec::new(),
        });
        let defs = DefinitionTable::new(vec![def]);
        let host = MemoryHost::new();
        assert!(defs.build(0, &host).is_ok());

        host.retire_item(ItemId(50));
        let err = defs.build(0, &host).unwrap_err();
        assert_eq!(
            err.1,
            CatalogError::UnresolvedCatalyst {
                key: "apple".into(),
                catalyst: ItemId(50)
            }
        );
    }

    #[test]
    fn test_unresolved_container_is_unhealthy() {
        let host = MemoryHost::new();
        host.add_container(LocationId(1));

        let mut whitelisted = apple();
        whitelisted.containers = vec![LocationId(1), LocationId(2)];
        let err = DefinitionTable::new(vec![whitelisted]).build(0, &host).unwrap_err();
        assert_eq!(
            err.1,
            CatalogError::UnresolvedContainer {
                key: "apple".into(),
                location: LocationId(2)
            }
        );

        // Owner restrictions must name containers, not placements
        host.add_placement(LocationId(3), ItemId(10), 1, Position::default(), AreaId(1));
        let mut restricted = apple();
        restricted.catalysts.push(CatalystDefinition {
            catalyst: ItemId(50),
            effect: CatalystEffect::Delay { rate: 0.5 },
            owner_restriction: vec![LocationId(3)],
            allowed_stages: Vec::new(),
        });
        let err = DefinitionTable::new(vec![restricted]).build(0, &host).unwrap_err();
        assert!(matches!(err.1, CatalogError::UnresolvedContainer { location: LocationId(3), .. }));

        host.add_container(LocationId(2));
        let mut ok = apple();
        ok.containers = vec![LocationId(1), LocationId(2)];
        assert!(DefinitionTable::new(vec![ok]).build(0, &host).is_ok());
    }

    #[test]
    fn test_shared_decay_form_prefers_exact_holder() {
        let (defs, mut pop) = setup(vec![apple(), pear()]);
        let a = install(&defs, &mut pop, 0);
        let p = install(&defs, &mut pop, 1);
        pop.mutate_at(a, LOC, |_, s| {
            s.insert(LOC, Instance::new(StageSlot::Regular(0), 1, 0.0), 0.0, 0.0);
        });
        pop.mutate_at(p, LOC, |_, s| {
            s.insert(LOC, Instance::new(StageSlot::Decayed, 1, 0.0), 0.0, 0.0);
        });
        // Both catalogs decay into item 19, only pear holds it here
        assert_eq!(pop.resolve(&defs, LOC, ItemId(19)), Resolution::Found(p));
        assert_eq!(pop.resolve(&defs, LOC, ItemId(10)), Resolution::Found(a));
    }

    #[test]
    fn test_unique_catalog_at_location_wins() {
        let (defs, mut pop) = setup(vec![apple(), pear()]);
        install(&defs, &mut pop, 0);
        let p = install(&defs, &mut pop, 1);
        pop.mutate_at(p, LOC, |_, s| {
            s.insert(LOC, Instance::new(StageSlot::Regular(0), 1, 0.0), 0.0, 0.0);
        });
        assert_eq!(pop.resolve(&defs, LOC, ItemId(19)), Resolution::Found(p));
    }
}
