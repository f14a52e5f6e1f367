//! Advance System
//!
//! Walks an instance across every stage boundary it has passed by `now`.
//! Each crossing re-baselines the stage at the exact hitting time, so one
//! large step and many small steps land on the same stage.

use serde::Serialize;

use crate::catalog::{CatalystEffect, StageCatalog, StageSlot};
use crate::config::ProgressionConfig;
use crate::ids::{GameTime, ItemId};
use crate::instance::{DelayLine, Instance};

/// One boundary crossing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageChange {
    pub from: StageSlot,
    pub to: StageSlot,
    pub at: GameTime,
    pub count: u32,
    pub old_item: Option<ItemId>,
    pub new_item: Option<ItemId>,
}

/// Advance `inst` to `now`, returning every crossing in order.
pub fn advance_instance(
    inst: &mut Instance,
    catalog: &StageCatalog,
    config: &ProgressionConfig,
    now: GameTime,
) -> Vec<StageChange> {
    let mut changes = Vec::new();
    if inst.slot.is_terminal() || catalog.is_inert() {
        return changes;
    }

    if let Some(transform) = inst.transform {
        let duration = match catalog.settings.rule(transform.catalyst).map(|r| r.effect) {
            Some(CatalystEffect::Transform { duration, .. }) => duration,
            _ => {
                // Rule vanished; fall back to regular progress
                inst.transform = None;
                inst.delay.set(now, 1.0, None);
                return advance_instance(inst, catalog, config, now);
            }
        };
        let hit = transform.started + duration;
        if now >= hit {
            let old_item = inst.item(catalog);
            let from = inst.slot;
            inst.transform = None;
            inst.fake_item = None;
            inst.rebaseline(StageSlot::Transformed(transform.catalyst), hit, 0.0);
            inst.delay = DelayLine::neutral(hit);
            changes.push(StageChange {
                from,
                to: inst.slot,
                at: hit,
                count: inst.count,
                old_item,
                new_item: inst.item(catalog),
            });
        }
        return changes;
    }

    loop {
        let Some(no) = inst.stage_no() else { break };
        let Some(stage) = catalog.regular(no) else {
            // Stage vanished from the catalog; treat as past the end
            inst.slot = StageSlot::Decayed;
            break;
        };
        let slope = inst.delay.slope;
        if slope.abs() < config.slope_epsilon {
            break;
        }
        if stage.duration > config.critical_duration && inst.delay.catalyst.is_none() {
            // Frozen floor: hold the stage at its start
            inst.rebaseline(inst.slot, now, 0.0);
            break;
        }

        let target = if slope > 0.0 { stage.duration } else { 0.0 };
        let Some(hit) = inst.delay.hitting_time(target, config.slope_epsilon) else {
            break;
        };
        if hit > now {
            break;
        }
        if slope < 0.0 && no == 0 {
            // Nothing below stage 0: pin at its start, catalyst kept
            inst.delay.rebase(hit, 0.0);
            inst.delay.slope = 0.0;
            break;
        }

        let old_item = inst.item(catalog);
        let from = inst.slot;
        let next = if slope > 0.0 { no + 1 } else { no - 1 };
        inst.fake_item = None;

        if catalog.contains(next) {
            let elapsed = match catalog.regular(next) {
                Some(s) if slope < 0.0 => s.duration,
                _ => 0.0,
            };
            inst.rebaseline(StageSlot::Regular(next), hit, elapsed);
            // Modulation only survives into stages its catalyst acts on
            let keeps = inst
                .delay
                .catalyst
                .and_then(|c| catalog.settings.rule(c))
                .map(|r| r.applies_to(next))
                .unwrap_or(true);
            if !keeps {
                inst.delay.set(hit, 1.0, None);
            }
        } else {
            inst.rebaseline(StageSlot::Decayed, hit, 0.0);
            inst.delay = DelayLine::neutral(hit);
        }

        changes.push(StageChange {
            from,
            to: inst.slot,
            at: hit,
            count: inst.count,
            old_item,
            new_item: inst.item(catalog),
        });
        if inst.slot.is_terminal() {
            break;
        }
    }
    changes
}

/// Next time `inst` will cross a boundary, or `None` if it never will
/// under its current modulation.
pub fn next_due(inst: &Instance, catalog: &StageCatalog, config: &ProgressionConfig) -> Option<GameTime> {
    if inst.slot.is_terminal() || catalog.is_inert() {
        return None;
    }
    if let Some(transform) = inst.transform {
        return match catalog.settings.rule(transform.catalyst).map(|r| r.effect) {
            Some(CatalystEffect::Transform { duration, .. }) => Some(transform.started + duration),
            _ => None,
        };
    }
    let no = inst.stage_no()?;
    let stage = catalog.regular(no)?;
    let slope = inst.delay.slope;
    if slope.abs() < config.slope_epsilon {
        return None;
    }
    if stage.duration > config.critical_duration && inst.delay.catalyst.is_none() {
        return None;
    }
    let target = if slope > 0.0 {
        stage.duration
    } else if no == 0 {
        return None;
    } else {
        0.0
    };
    inst.delay.hitting_time(target, config.slope_epsilon)
}
