//! Item-kind capabilities
//!
//! The set of item kinds is closed, so each kind implements a small trait
//! and `ItemKind` dispatches to a static instance of it.

use serde::{Deserialize, Serialize};

use super::stage::{Stage, StageEffect};
use crate::ids::ItemId;

pub trait KindTraits: Sync {
    /// Whether stage forms of this kind carry magic effects
    fn carries_effects(&self) -> bool;

    fn stage_value(&self, base_value: u32, stage: &Stage) -> u32 {
        (base_value as f32 * stage.value_scale).round().max(0.0) as u32
    }

    fn stage_weight(&self, base_weight: f32, _stage: &Stage) -> f32 {
        base_weight
    }
}

struct Food;
struct Ingredient;
struct Potion;
struct Misc;

impl KindTraits for Food {
    fn carries_effects(&self) -> bool {
        true
    }
}

impl KindTraits for Ingredient {
    fn carries_effects(&self) -> bool {
        true
    }

    // Ingredients dry out as they age
    fn stage_weight(&self, base_weight: f32, stage: &Stage) -> f32 {
        base_weight * stage.value_scale.clamp(0.25, 1.0)
    }
}

impl KindTraits for Potion {
    fn carries_effects(&self) -> bool {
        true
    }

    // Potion value tracks effect strength rather than freshness
    fn stage_value(&self, base_value: u32, stage: &Stage) -> u32 {
        let strength = stage
            .effects
            .iter()
            .map(|e| e.magnitude_scale)
            .fold(1.0_f32, f32::max);
        (base_value as f32 * strength * stage.value_scale).round().max(0.0) as u32
    }
}

impl KindTraits for Misc {
    fn carries_effects(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    #[default]
    Food,
    Ingredient,
    Potion,
    Misc,
}

impl ItemKind {
    pub fn traits(self) -> &'static dyn KindTraits {
        match self {
            ItemKind::Food => &Food,
            ItemKind::Ingredient => &Ingredient,
            ItemKind::Potion => &Potion,
            ItemKind::Misc => &Misc,
        }
    }
}

/// Description of a temporary form the host materializes for a fake stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormTemplate {
    pub base: ItemId,
    pub name: String,
    pub weight: f32,
    pub value: u32,
    pub effects: Vec<StageEffect>,
}

impl FormTemplate {
    pub fn for_stage(kind: ItemKind, base: ItemId, base_weight: f32, base_value: u32, stage: &Stage) -> Self {
        let traits = kind.traits();
        Self {
            base,
            name: stage.display_name.clone(),
            weight: traits.stage_weight(base_weight, stage),
            value: traits.stage_value(base_value, stage),
            effects: if traits.carries_effects() {
                stage.effects.clone()
            } else {
                Vec::new()
            },
        }
    }
}
