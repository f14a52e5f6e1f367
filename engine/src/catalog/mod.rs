//! Stage catalogs
//!
//! A catalog is the immutable definition of one item family: its ordered
//! stages, the synthetic decayed and transformed stages, and the catalysts
//! that modulate progression. Catalogs are built once and shared by `Arc`.

mod definition;
pub mod kind;
pub mod stage;

#[cfg(test)]
pub(crate) use definition::fixtures;
pub use definition::{CatalogDefinition, CatalystDefinition, StageDefinition};
pub use kind::{FormTemplate, ItemKind, KindTraits};
pub use stage::{Stage, StageEffect, StageSlot};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::ids::{GameTime, ItemId, LocationId, StageNo};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CatalystEffect {
    /// Multiply progression speed; negative rates walk stages backward.
    Delay { rate: f64 },
    /// Redirect to `target` once the catalyst has been present for `duration`.
    Transform { target: ItemId, duration: GameTime },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalystRule {
    pub catalyst: ItemId,
    pub effect: CatalystEffect,
    pub owner_restriction: BTreeSet<LocationId>,
    pub allowed_stages: BTreeSet<StageNo>,
}

impl CatalystRule {
    pub fn applies_to(&self, stage: StageNo) -> bool {
        self.allowed_stages.contains(&stage)
    }

    /// Restricted rules only act inside their listed containers
    pub fn permitted_in(&self, location: LocationId) -> bool {
        self.owner_restriction.is_empty() || self.owner_restriction.contains(&location)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogSettings {
    pub transformers: Vec<CatalystRule>,
    pub delayers: Vec<CatalystRule>,
    pub containers: BTreeSet<LocationId>,
}

impl CatalogSettings {
    /// Transformers first, then delayers, each in declared order
    pub fn ordered_rules(&self) -> impl Iterator<Item = &CatalystRule> {
        self.transformers.iter().chain(self.delayers.iter())
    }

    pub fn rule(&self, catalyst: ItemId) -> Option<&CatalystRule> {
        self.ordered_rules().find(|r| r.catalyst == catalyst)
    }

    pub fn catalyst_ids(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.ordered_rules().map(|r| r.catalyst)
    }

    /// Containers outside a non-empty whitelist freeze progression
    pub fn container_allowed(&self, container: LocationId) -> bool {
        self.containers.is_empty() || self.containers.contains(&container)
    }
}

#[derive(Debug, Clone)]
pub struct StageCatalog {
    pub key: String,
    pub base_item: ItemId,
    pub kind: ItemKind,
    pub base_weight: f32,
    pub base_value: u32,
    stages: BTreeMap<StageNo, Stage>,
    fake_stages: BTreeSet<StageNo>,
    decayed: Stage,
    transformed: BTreeMap<ItemId, Stage>,
    pub settings: CatalogSettings,
}

impl StageCatalog {
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn regular(&self, no: StageNo) -> Option<&Stage> {
        self.stages.get(&no)
    }

    pub fn decayed(&self) -> &Stage {
        &self.decayed
    }

    pub fn transformed_stage(&self, catalyst: ItemId) -> Option<&Stage> {
        self.transformed.get(&catalyst)
    }

    pub fn stage(&self, slot: StageSlot) -> Option<&Stage> {
        match slot {
            StageSlot::Regular(no) => self.stages.get(&no),
            StageSlot::Decayed => Some(&self.decayed),
            StageSlot::Transformed(catalyst) => self.transformed.get(&catalyst),
        }
    }

    pub fn contains(&self, no: StageNo) -> bool {
        self.stages.contains_key(&no)
    }

    pub fn is_fake(&self, no: StageNo) -> bool {
        self.fake_stages.contains(&no)
    }

    /// Which slot an item id corresponds to. Regular stages win over the
    /// decayed form so an inert catalog resolves to its only stage.
    pub fn slot_of(&self, item: ItemId) -> Option<StageSlot> {
        if let Some(stage) = self.stages.values().find(|s| s.item == item) {
            return Some(StageSlot::Regular(stage.index));
        }
        if self.decayed.item == item {
            return Some(StageSlot::Decayed);
        }
        self.transformed
            .iter()
            .find(|(_, s)| s.item == item)
            .map(|(catalyst, _)| StageSlot::Transformed(*catalyst))
    }

    /// All item ids any instance of this catalog may carry
    pub fn stage_items(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.stages
            .values()
            .map(|s| s.item)
            .chain(std::iter::once(self.decayed.item))
            .chain(self.transformed.values().map(|s| s.item))
    }

    /// A single stage whose item is also the decayed form never advances.
    pub fn is_inert(&self) -> bool {
        self.stages.len() == 1
            && self
                .stages
                .values()
                .next()
                .map(|s| s.item == self.decayed.item)
                .unwrap_or(false)
    }

    pub fn form_template(&self, no: StageNo) -> Option<FormTemplate> {
        self.stages
            .get(&no)
            .map(|s| FormTemplate::for_stage(self.kind, self.base_item, self.base_weight, self.base_value, s))
    }
}
