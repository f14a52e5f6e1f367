//! Catalyst System
//!
//! Decides which catalyst, if any, modulates an instance and applies the
//! result to its delay line. Inventory-resident instances test membership
//! against an inventory snapshot; world placements test against the
//! published proximity snapshot.

use std::collections::HashMap;

use crate::catalog::{CatalystEffect, CatalystRule, StageCatalog};
use crate::config::ProgressionConfig;
use crate::host::InventoryEntry;
use crate::ids::{GameTime, ItemId, LocationId, Position};
use crate::instance::{Instance, TransformState};
use crate::proximity::ProximitySnapshot;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Modulation {
    Neutral,
    /// Container outside the catalog's whitelist.
    Frozen,
    Delay { catalyst: ItemId, rate: f64 },
    Transform { catalyst: ItemId },
}

impl Modulation {
    fn from_rule(rule: &CatalystRule) -> Self {
        match rule.effect {
            CatalystEffect::Delay { rate } => Modulation::Delay {
                catalyst: rule.catalyst,
                rate,
            },
            CatalystEffect::Transform { .. } => Modulation::Transform {
                catalyst: rule.catalyst,
            },
        }
    }
}

/// Resolve modulation for an instance held in `container`
pub fn resolve_in_inventory(
    catalog: &StageCatalog,
    inst: &Instance,
    container: LocationId,
    inventory: &HashMap<ItemId, InventoryEntry>,
) -> Modulation {
    let Some(stage) = inst.stage_no() else {
        return Modulation::Neutral;
    };
    if !catalog.settings.container_allowed(container) {
        return Modulation::Frozen;
    }
    catalog
        .settings
        .ordered_rules()
        .filter(|r| r.applies_to(stage) && r.permitted_in(container))
        .find(|r| inventory.get(&r.catalyst).map(|e| e.count > 0).unwrap_or(false))
        .map(Modulation::from_rule)
        .unwrap_or(Modulation::Neutral)
}

/// Resolve modulation for an instance lying in the world at `position`.
/// A missing or empty snapshot resolves to no catalyst.
pub fn resolve_in_world(
    catalog: &StageCatalog,
    inst: &Instance,
    position: Position,
    snapshot: Option<&ProximitySnapshot>,
    radius: f32,
) -> Modulation {
    let (Some(stage), Some(snapshot)) = (inst.stage_no(), snapshot) else {
        return Modulation::Neutral;
    };
    if snapshot.is_empty() {
        return Modulation::Neutral;
    }
    catalog
        .settings
        .ordered_rules()
        .filter(|r| r.applies_to(stage) && r.owner_restriction.is_empty())
        .find(|r| snapshot.any_within(r.catalyst, position, radius))
        .map(Modulation::from_rule)
        .unwrap_or(Modulation::Neutral)
}

/// Apply a resolved modulation at `now`. Returns true if anything changed.
pub fn apply_modulation(
    inst: &mut Instance,
    modulation: Modulation,
    now: GameTime,
    config: &ProgressionConfig,
) -> bool {
    if inst.slot.is_terminal() {
        return false;
    }

    let (slope, catalyst) = match modulation {
        Modulation::Transform { catalyst } => {
            if inst.transform.map(|t| t.catalyst) == Some(catalyst) {
                return false;
            }
            // Regular progress pauses while transforming
            inst.delay.set(now, 0.0, Some(catalyst));
            inst.transform = Some(TransformState { catalyst, started: now });
            return true;
        }
        Modulation::Neutral => (1.0, None),
        Modulation::Frozen => (0.0, None),
        Modulation::Delay { catalyst, rate } => (
            rate.clamp(-config.max_strength, config.max_strength),
            Some(catalyst),
        ),
    };

    // A reversing catalyst cannot push stage 0 below its start
    let slope = if slope < 0.0 && inst.stage_no() == Some(0) && inst.elapsed(now) <= 0.0 {
        0.0
    } else {
        slope
    };

    let cancelled = inst.transform.take().is_some();
    if !cancelled && inst.delay.slope == slope && inst.delay.catalyst == catalyst {
        return false;
    }
    inst.delay.set(now, slope, catalyst);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::apple;
    use crate::catalog::{CatalystDefinition, StageSlot};
    use crate::proximity::NearbyCatalyst;

    const CHEST: LocationId = LocationId(500);

    fn catalog_with(catalysts: Vec<CatalystDefinition>) -> StageCatalog {
        let mut def = apple();
        def.catalysts = catalysts;
        StageCatalog::build(&def).unwrap()
    }

    fn salt() -> CatalystDefinition {
        CatalystDefinition {
            catalyst: ItemId(50),
            effect: CatalystEffect::Delay { rate: 0.5 },
            owner_restriction: Vec::new(),
            allowed_stages: Vec::new(),
        }
    }

    fn vinegar() -> CatalystDefinition {
        CatalystDefinition {
            catalyst: ItemId(60),
            effect: CatalystEffect::Transform { target: ItemId(61), duration: 5.0 },
            owner_restriction: Vec::new(),
            allowed_stages: vec![0],
        }
    }

    fn inventory(items: &[(u32, u32)]) -> HashMap<ItemId, InventoryEntry> {
        items
            .iter()
            .map(|&(id, count)| (ItemId(id), InventoryEntry { count, quest: false }))
            .collect()
    }

    #[test]
    fn test_transformer_wins_over_delayer() {
        let catalog = catalog_with(vec![salt(), vinegar()]);
        let inst = Instance::new(StageSlot::Regular(0), 1, 0.0);
        let m = resolve_in_inventory(&catalog, &inst, CHEST, &inventory(&[(50, 1), (60, 1)]));
        assert_eq!(m, Modulation::Transform { catalyst: ItemId(60) });
    }

    #[test]
    fn test_allowed_stage_filter() {
        let catalog = catalog_with(vec![salt(), vinegar()]);
        let inst = Instance::new(StageSlot::Regular(1), 1, 0.0);
        let m = resolve_in_inventory(&catalog, &inst, CHEST, &inventory(&[(50, 1), (60, 1)]));
        assert_eq!(m, Modulation::Delay { catalyst: ItemId(50), rate: 0.5 });
    }

    #[test]
    fn test_zero_count_and_restriction_ignored() {
        let mut restricted = salt();
        restricted.owner_restriction = vec![LocationId(999)];
        let catalog = catalog_with(vec![restricted, vinegar()]);
        let inst = Instance::new(StageSlot::Regular(0), 1, 0.0);
        let m = resolve_in_inventory(&catalog, &inst, CHEST, &inventory(&[(50, 3), (60, 0)]));
        assert_eq!(m, Modulation::Neutral);
    }

    #[test]
    fn test_whitelist_freezes_other_containers() {
        let mut def = apple();
        def.containers = vec![LocationId(1)];
        let catalog = StageCatalog::build(&def).unwrap();
        let inst = Instance::new(StageSlot::Regular(0), 1, 0.0);
        assert_eq!(resolve_in_inventory(&catalog, &inst, CHEST, &inventory(&[])), Modulation::Frozen);
        assert_eq!(
            resolve_in_inventory(&catalog, &inst, LocationId(1), &inventory(&[])),
            Modulation::Neutral
        );
    }

    #[test]
    fn test_world_resolution_uses_radius() {
        let catalog = catalog_with(vec![salt()]);
        let inst = Instance::new(StageSlot::Regular(0), 1, 0.0);
        let mut snapshot = ProximitySnapshot::empty(1);
        snapshot.insert(
            ItemId(50),
            NearbyCatalyst { object: LocationId(77), position: Position::new(10.0, 0.0, 0.0) },
        );
        let near = resolve_in_world(&catalog, &inst, Position::default(), Some(&snapshot), 20.0);
        let far = resolve_in_world(&catalog, &inst, Position::default(), Some(&snapshot), 5.0);
        assert_eq!(near, Modulation::Delay { catalyst: ItemId(50), rate: 0.5 });
        assert_eq!(far, Modulation::Neutral);
        assert_eq!(resolve_in_world(&catalog, &inst, Position::default(), None, 20.0), Modulation::Neutral);
    }

    #[test]
    fn test_apply_preserves_elapsed() {
        let config = ProgressionConfig::default();
        let mut inst = Instance::new(StageSlot::Regular(0), 1, 0.0);
        let before = inst.elapsed(0.4);
        assert!(apply_modulation(&mut inst, Modulation::Delay { catalyst: ItemId(50), rate: 0.5 }, 0.4, &config));
        assert!((inst.elapsed(0.4) - before).abs() < 1e-9);
        assert!(!apply_modulation(&mut inst, Modulation::Delay { catalyst: ItemId(50), rate: 0.5 }, 0.6, &config));
        assert!(apply_modulation(&mut inst, Modulation::Neutral, 0.8, &config));
        assert!(inst.delay.is_neutral());
        assert!((inst.elapsed(0.8) - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_apply_clamps_strength() {
        let mut config = ProgressionConfig::default();
        config.max_strength = 3.0;
        let mut inst = Instance::new(StageSlot::Regular(0), 1, 0.0);
        apply_modulation(&mut inst, Modulation::Delay { catalyst: ItemId(50), rate: 9.0 }, 0.0, &config);
        assert_eq!(inst.delay.slope, 3.0);
    }

    #[test]
    fn test_reversal_stays_pinned_at_stage_zero_start() {
        let config = ProgressionConfig::default();
        let reverse = Modulation::Delay { catalyst: ItemId(70), rate: -1.0 };
        let mut inst = Instance::new(StageSlot::Regular(0), 1, 5.0);
        inst.delay.slope = 0.0;
        inst.delay.catalyst = Some(ItemId(70));

        assert!(!apply_modulation(&mut inst, reverse, 9.0, &config));
        assert_eq!(inst.elapsed(20.0), 0.0);

        // With progress left to undo the reversal applies
        let mut fresh = Instance::new(StageSlot::Regular(0), 1, 0.0);
        assert!(apply_modulation(&mut fresh, reverse, 0.5, &config));
        assert_eq!(fresh.delay.slope, -1.0);
    }

    #[test]
    fn test_transform_cancel_resumes_progress() {
        let config = ProgressionConfig::default();
        let mut inst = Instance::new(StageSlot::Regular(0), 1, 0.0);
        apply_modulation(&mut inst, Modulation::Transform { catalyst: ItemId(60) }, 0.25, &config);
        assert!(inst.is_transforming());
        assert!((inst.elapsed(0.75) - 0.25).abs() < 1e-9);
        apply_modulation(&mut inst, Modulation::Neutral, 0.75, &config);
        assert!(!inst.is_transforming());
        assert!((inst.elapsed(1.0) - 0.5).abs() < 1e-9);
    }
}
