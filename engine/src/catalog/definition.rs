//! Catalog definitions and integrity checks
//!
//! Definitions are the deserialized form of a preset; `StageCatalog::build`
//! turns one into an immutable catalog or reports why it is unhealthy.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::kind::ItemKind;
use super::stage::{Stage, StageEffect};
use super::{CatalogSettings, CatalystEffect, CatalystRule, StageCatalog};
use crate::error::CatalogError;
use crate::ids::{FeatureId, GameTime, ItemId, LocationId, StageNo};

fn default_true() -> bool {
    true
}

fn default_scale() -> f32 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDefinition {
    pub index: StageNo,
    pub item: ItemId,
    pub duration: GameTime,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "default_true")]
    pub crafting_allowed: bool,
    #[serde(default)]
    pub effects: Vec<StageEffect>,
    #[serde(default)]
    pub features: Vec<FeatureId>,
    #[serde(default = "default_scale")]
    pub value_scale: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalystDefinition {
    pub catalyst: ItemId,
    pub effect: CatalystEffect,
    /// Containers the catalyst is limited to. Empty = anywhere.
    #[serde(default)]
    pub owner_restriction: Vec<LocationId>,
    /// Stages the catalyst acts on. Empty = every regular stage.
    #[serde(default)]
    pub allowed_stages: Vec<StageNo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogDefinition {
    /// Stable external key, used to re-resolve saved records.
    pub key: String,
    pub base_item: ItemId,
    #[serde(default)]
    pub kind: ItemKind,
    #[serde(default)]
    pub base_weight: f32,
    #[serde(default)]
    pub base_value: u32,
    pub stages: Vec<StageDefinition>,
    #[serde(default)]
    pub fake_stages: Vec<StageNo>,
    pub decayed_item: ItemId,
    #[serde(default)]
    pub catalysts: Vec<CatalystDefinition>,
    /// Container whitelist. Empty = every container.
    #[serde(default)]
    pub containers: Vec<LocationId>,
}

impl CatalogDefinition {
    /// Every item id this definition can appear as
    pub fn item_ids(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.stages
            .iter()
            .map(|s| s.item)
            .chain(std::iter::once(self.decayed_item))
            .chain(self.catalysts.iter().filter_map(|c| match c.effect {
                CatalystEffect::Transform { target, .. } => Some(target),
                CatalystEffect::Delay { .. } => None,
            }))
    }
}

impl StageCatalog {
    /// Validate a definition and build the immutable catalog
    pub fn build(def: &CatalogDefinition) -> Result<StageCatalog, CatalogError> {
        let key = def.key.clone();
        if def.stages.is_empty() {
            return Err(CatalogError::NoStages { key });
        }

        let mut stages: BTreeMap<StageNo, Stage> = BTreeMap::new();
        let mut seen_items = HashSet::new();
        for s in &def.stages {
            if !(s.duration > 0.0) {
                return Err(CatalogError::ZeroDuration { key, stage: s.index });
            }
            if !seen_items.insert(s.item) {
                return Err(CatalogError::DuplicateStageItem { key, item: s.item });
            }
            stages.insert(
                s.index,
                Stage {
                    item: s.item,
                    duration: s.duration,
                    index: s.index,
                    display_name: s.display_name.clone(),
                    crafting_allowed: s.crafting_allowed,
                    effects: s.effects.clone(),
                    features: s.features.clone(),
                    value_scale: s.value_scale,
                },
            );
        }

        // Indices must be exactly [0, N-1]
        let n = def.stages.len() as StageNo;
        if let Some(missing) = (0..n).find(|i| !stages.contains_key(i)) {
            return Err(CatalogError::NonContiguous { key, missing });
        }

        let fake_stages: BTreeSet<StageNo> = def.fake_stages.iter().copied().collect();
        if let Some(&stage) = fake_stages.iter().find(|s| !stages.contains_key(s)) {
            return Err(CatalogError::UnknownFakeStage { key, stage });
        }

        let all_stages: BTreeSet<StageNo> = stages.keys().copied().collect();
        let mut transformers = Vec::new();
        let mut delayers = Vec::new();
        let mut transformed = BTreeMap::new();
        let mut seen_catalysts = HashSet::new();
        for c in &def.catalysts {
            if !seen_catalysts.insert(c.catalyst) {
                return Err(CatalogError::DuplicateCatalyst { key, catalyst: c.catalyst });
            }
            if let Some(&stage) = c.allowed_stages.iter().find(|s| !stages.contains_key(s)) {
                return Err(CatalogError::UnknownCatalystStage {
                    key,
                    catalyst: c.catalyst,
                    stage,
                });
            }
            let allowed_stages = if c.allowed_stages.is_empty() {
                all_stages.clone()
            } else {
                c.allowed_stages.iter().copied().collect()
            };
            let rule = CatalystRule {
                catalyst: c.catalyst,
                effect: c.effect,
                owner_restriction: c.owner_restriction.iter().copied().collect(),
                allowed_stages,
            };
            match c.effect {
                CatalystEffect::Transform { target, duration } => {
                    if !(duration > 0.0) {
                        return Err(CatalogError::ZeroTransformDuration {
                            key,
                            catalyst: c.catalyst,
                        });
                    }
                    transformed.insert(
                        c.catalyst,
                        Stage::terminal(target, n + 1 + transformed.len() as StageNo, format!("{} (transformed)", def.key)),
                    );
                    transformers.push(rule);
                }
                CatalystEffect::Delay { .. } => delayers.push(rule),
            }
        }

        Ok(StageCatalog {
            key: def.key.clone(),
            base_item: def.base_item,
            kind: def.kind,
            base_weight: def.base_weight,
            base_value: def.base_value,
            stages,
            fake_stages,
            decayed: Stage::terminal(def.decayed_item, n, format!("{} (decayed)", def.key)),
            transformed,
            settings: CatalogSettings {
                transformers,
                delayers,
                containers: def.containers.iter().copied().collect(),
            },
        })
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_build_healthy() {
        let catalog = StageCatalog::build(&apple()).unwrap();
        assert_eq!(catalog.stage_count(), 2);
        assert_eq!(catalog.decayed().item, ItemId(19));
        assert!(!catalog.is_inert());
    }

    #[test]
    fn test_non_contiguous_is_unhealthy() {
        let mut def = apple();
        def.stages[1].index = 2;
        assert_eq!(
            StageCatalog::build(&def).unwrap_err(),
            CatalogError::NonContiguous { key: "apple".into(), missing: 1 }
        );
    }

    #[test]
    fn test_zero_duration_is_unhealthy() {
        let mut def = apple();
        def.stages[0].duration = 0.0;
        assert!(matches!(
            StageCatalog::build(&def),
            Err(CatalogError::ZeroDuration { stage: 0, .. })
        ));
    }

    #[test]
    fn test_duplicate_stage_item_is_unhealthy() {
        let mut def = apple();
        def.stages[1].item = ItemId(10);
        assert!(matches!(
            StageCatalog::build(&def),
            Err(CatalogError::DuplicateStageItem { .. })
        ));
    }

    #[test]
    fn test_catalyst_unknown_stage_is_unhealthy() {
        let mut def = apple();
        def.catalysts.push(CatalystDefinition {
            catalyst: ItemId(50),
            effect: CatalystEffect::Delay { rate: 0.5 },
            owner_restriction: Vec::new(),
            allowed_stages: vec![7],
        });
        assert!(matches!(
            StageCatalog::build(&def),
            Err(CatalogError::UnknownCatalystStage { stage: 7, .. })
        ));
    }

    #[test]
    fn test_catalyst_order_splits_transformers_first() {
        let mut def = apple();
        def.catalysts = vec![
            CatalystDefinition {
                catalyst: ItemId(50),
                effect: CatalystEffect::Delay { rate: 0.5 },
                owner_restriction: Vec::new(),
                allowed_stages: Vec::new(),
            },
            CatalystDefinition {
                catalyst: ItemId(60),
                effect: CatalystEffect::Transform { target: ItemId(61), duration: 4.0 },
                owner_restriction: Vec::new(),
                allowed_stages: vec![0],
            },
        ];
        let catalog = StageCatalog::build(&def).unwrap();
        let order: Vec<ItemId> = catalog.settings.ordered_rules().map(|r| r.catalyst).collect();
        assert_eq!(order, vec![ItemId(60), ItemId(50)]);
        assert_eq!(catalog.settings.delayers[0].allowed_stages.len(), 2);
        assert_eq!(catalog.transformed_stage(ItemId(60)).unwrap().item, ItemId(61));
    }
}
