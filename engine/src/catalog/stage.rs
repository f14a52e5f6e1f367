//! Stage definitions

use serde::{Deserialize, Serialize};

use crate::ids::{FeatureId, GameTime, ItemId, StageNo};

/// Magic effect carried by a stage form, scaled relative to the base item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEffect {
    pub name: String,
    pub magnitude_scale: f32,
    pub duration_scale: f32,
}

/// One ordered step of a catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub item: ItemId,
    pub duration: GameTime,
    pub index: StageNo,
    pub display_name: String,
    pub crafting_allowed: bool,
    pub effects: Vec<StageEffect>,
    /// Presentation applied to world placements sitting in this stage.
    pub features: Vec<FeatureId>,
    pub value_scale: f32,
}

impl Stage {
    /// Terminal synthetic stage (decayed or transformed form).
    pub(crate) fn terminal(item: ItemId, index: StageNo, display_name: String) -> Self {
        Self {
            item,
            duration: 0.0,
            index,
            display_name,
            crafting_allowed: true,
            effects: Vec::new(),
            features: Vec::new(),
            value_scale: 1.0,
        }
    }
}

/// Where an instance sits in its catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageSlot {
    Regular(StageNo),
    Decayed,
    /// Finished transformation, keyed by the transformer catalyst.
    Transformed(ItemId),
}

impl StageSlot {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StageSlot::Regular(_))
    }

    pub fn regular(&self) -> Option<StageNo> {
        match self {
            StageSlot::Regular(no) => Some(*no),
            _ => None,
        }
    }
}
