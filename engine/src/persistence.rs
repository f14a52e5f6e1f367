//! Persistence module for export/import of engine state
//!
//! Saves are a list of per-location records keyed by the catalog's stable
//! key, never by `CatalogId`, which is only meaningful for one session.
//! Files are a bincode envelope `{version, payload}`; a save written by a
//! different version is treated as absent. JSON export exists for tooling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::catalog::{StageCatalog, StageSlot};
use crate::coordinator::{placement_timer, Coordinator};
use crate::error::PersistError;
use crate::ids::{CatalogId, GameTime, ItemId, LocationId, StageNo};
use crate::instance::{DelayLine, Instance, TransformState};

pub const SAVE_VERSION: u32 = 1;

// ============================================================================
// Export Data Structures
// ============================================================================

/// Complete engine state for persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportData {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    /// Host clock when the save was taken
    pub game_time: GameTime,
    pub records: Vec<SavedLocation>,
}

/// Every instance one catalog holds at one location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedLocation {
    pub catalog_key: String,
    pub location: LocationId,
    pub instances: Vec<SavedInstance>,
}

// Options are always written; bincode cannot skip fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedInstance {
    pub stage_no: StageNo,
    pub count: u32,
    pub start_time: GameTime,
    pub elapsed_snapshot: GameTime,
    pub delay_start: GameTime,
    pub delay_slope: f64,
    pub delay_catalyst_id: Option<ItemId>,
    pub is_fake: bool,
    pub is_decayed: bool,
    pub is_transforming: bool,
    pub is_favorited: bool,
    pub is_equipped: bool,
    pub fake_item_id: Option<ItemId>,
    pub transform_catalyst: Option<ItemId>,
    pub transform_started: Option<GameTime>,
    /// Set once a transformation has finished
    pub transformed_by: Option<ItemId>,
}

impl SavedInstance {
    pub fn capture(inst: &Instance, catalog: &StageCatalog) -> Self {
        let (stage_no, transformed_by) = match inst.slot {
            StageSlot::Regular(no) => (no, None),
            StageSlot::Decayed => (catalog.decayed().index, None),
            StageSlot::Transformed(catalyst) => (
                catalog.transformed_stage(catalyst).map(|s| s.index).unwrap_or(-1),
                Some(catalyst),
            ),
        };
        Self {
            stage_no,
            count: inst.count,
            start_time: inst.start_time,
            elapsed_snapshot: inst.delay.snapshot,
            delay_start: inst.delay.start,
            delay_slope: inst.delay.slope,
            delay_catalyst_id: inst.delay.catalyst,
            is_fake: inst.fake_item.is_some(),
            is_decayed: inst.is_decayed(),
            is_transforming: inst.is_transforming(),
            is_favorited: inst.favorited,
            is_equipped: inst.equipped,
            fake_item_id: inst.fake_item,
            transform_catalyst: inst.transform.map(|t| t.catalyst),
            transform_started: inst.transform.map(|t| t.started),
            transformed_by,
        }
    }

    /// Rebuild the live instance against the current catalog. `None` when
    /// the saved stage no longer exists there.
    pub fn restore(&self, catalog: &StageCatalog) -> Option<Instance> {
        if self.count == 0 {
            return None;
        }
        let slot = match (self.transformed_by, self.is_decayed) {
            (Some(catalyst), _) => {
                catalog.transformed_stage(catalyst)?;
                StageSlot::Transformed(catalyst)
            }
            (None, true) => StageSlot::Decayed,
            (None, false) if catalog.contains(self.stage_no) => StageSlot::Regular(self.stage_no),
            (None, false) => return None,
        };
        let transform = match (self.is_transforming, self.transform_catalyst, self.transform_started) {
            (true, Some(catalyst), Some(started)) => Some(TransformState { catalyst, started }),
            _ => None,
        };
        // A stage that stopped being fake goes back to its regular form
        let fake_item = match slot {
            StageSlot::Regular(no) if self.is_fake && catalog.is_fake(no) => self.fake_item_id,
            _ => None,
        };
        Some(Instance {
            slot,
            count: self.count,
            start_time: self.start_time,
            delay: DelayLine {
                start: self.delay_start,
                slope: self.delay_slope,
                snapshot: self.elapsed_snapshot,
                catalyst: self.delay_catalyst_id,
            },
            transform,
            fake_item,
            favorited: self.is_favorited,
            equipped: self.is_equipped,
        })
    }
}

/// Result of import operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportResult {
    pub locations: usize,
    pub instances: usize,
    /// Records whose catalog key is unknown or unhealthy
    pub skipped_records: usize,
    /// Instances whose stage no longer exists
    pub skipped_instances: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveStats {
    pub records: usize,
    pub instances: usize,
    pub bytes: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadFileResult {
    /// No usable save: missing file or a different save version
    pub absent: bool,
    pub import: ImportResult,
}

// ============================================================================
// Persistable
// ============================================================================

pub trait Persistable {
    fn export_data(&self) -> ExportData;

    /// Replace all current state with `data`
    fn import_data(&self, data: ExportData) -> ImportResult;
}

impl Persistable for Coordinator {
    fn export_data(&self) -> ExportData {
        let records = {
            let pop = self.population.read();
            let mut records = Vec::new();
            for (_, entry) in pop.healthy() {
                let mut locations: Vec<_> = entry.store.locations().filter(|(_, l)| !l.is_empty()).collect();
                locations.sort_by_key(|(loc, _)| **loc);
                for (location, list) in locations {
                    records.push(SavedLocation {
                        catalog_key: entry.catalog.key.clone(),
                        location: *location,
                        instances: list.iter().map(|i| SavedInstance::capture(i, &entry.catalog)).collect(),
                    });
                }
            }
            records
        };
        ExportData {
            version: SAVE_VERSION,
            saved_at: Utc::now(),
            game_time: self.host.now(),
            records,
        }
    }

    fn import_data(&self, data: ExportData) -> ImportResult {
        let mut result = ImportResult::default();
        self.reset();

        // Build every referenced catalog before taking the long write lock
        let mut catalogs: HashMap<String, Option<CatalogId>> = HashMap::new();
        for record in &data.records {
            if catalogs.contains_key(&record.catalog_key) {
                continue;
            }
            let id = match self.definitions.index_of_key(&record.catalog_key) {
                Some(def) => {
                    let built = self.definitions.build(def, self.host.as_ref());
                    let mut pop = self.population.write();
                    let id = pop.install(def, built);
                    pop.entry(id).map(|_| id)
                }
                None => {
                    warn!(key = %record.catalog_key, "saved catalog key not found, skipping its records");
                    None
                }
            };
            catalogs.insert(record.catalog_key.clone(), id);
        }

        let now = self.host.now();
        let tolerance = self.config.progression.merge_tolerance;
        let mut touched = BTreeSet::new();
        {
            let mut pop = self.population.write();
            for record in data.records {
                let Some(&Some(id)) = catalogs.get(&record.catalog_key) else {
                    result.skipped_records += 1;
                    continue;
                };
                let location = record.location;
                let (restored, skipped) = pop
                    .mutate_at(id, location, |catalog, store| {
                        let mut restored = 0;
                        let mut skipped = 0;
                        for saved in &record.instances {
                            match saved.restore(catalog) {
                                Some(inst) => {
                                    store.insert(location, inst, now, tolerance);
                                    restored += 1;
                                }
                                None => skipped += 1,
                            }
                        }
                        (restored, skipped)
                    })
                    .unwrap_or((0, record.instances.len()));
                if skipped > 0 {
                    debug!(location = %location, key = %record.catalog_key, skipped, "saved instances no longer fit catalog");
                }
                result.instances += restored;
                result.skipped_instances += skipped;
                if restored > 0 {
                    touched.insert(location);
                }
            }
        }
        result.locations = touched.len();

        // Placements get their timers back; containers re-sync on next tick
        let handles: Vec<_> = touched
            .into_iter()
            .map(|loc| (loc, self.host.resolve_location(loc)))
            .collect();
        {
            let mut pop = self.population.write();
            for (location, handle) in handles {
                match handle {
                    Some(h) if h.schedulable() => {
                        if let Some(timer) = placement_timer(&pop, location, &self.config.progression) {
                            self.timers.write().set(timer);
                        }
                    }
                    Some(h) if h.is_placement() => {}
                    Some(_) => {
                        pop.dirty.insert(location);
                    }
                    None => debug!(location = %location, "restored location not known to host"),
                }
            }
        }

        info!(
            locations = result.locations,
            instances = result.instances,
            skipped_records = result.skipped_records,
            skipped_instances = result.skipped_instances,
            saved_at = %data.saved_at,
            "import complete"
        );
        self.ensure_scheduler();
        result
    }
}

// ============================================================================
// Encoding
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct SaveEnvelope {
    version: u32,
    payload: Vec<u8>,
}

pub fn encode(data: &ExportData) -> Result<Vec<u8>, PersistError> {
    let envelope = SaveEnvelope {
        version: SAVE_VERSION,
        payload: bincode::serialize(data)?,
    };
    Ok(bincode::serialize(&envelope)?)
}

pub fn decode(bytes: &[u8]) -> Result<ExportData, PersistError> {
    let envelope: SaveEnvelope = bincode::deserialize(bytes)?;
    if envelope.version != SAVE_VERSION {
        return Err(PersistError::UnsupportedEnvelope {
            found: envelope.version,
            expected: SAVE_VERSION,
        });
    }
    Ok(bincode::deserialize(&envelope.payload)?)
}

pub fn export_json(data: &ExportData) -> Result<String, PersistError> {
    Ok(serde_json::to_string_pretty(data)?)
}

pub fn import_json(json: &str) -> Result<ExportData, PersistError> {
    let data: ExportData = serde_json::from_str(json)?;
    if data.version != SAVE_VERSION {
        return Err(PersistError::UnsupportedEnvelope {
            found: data.version,
            expected: SAVE_VERSION,
        });
    }
    Ok(data)
}

// ============================================================================
// Files
// ============================================================================

pub fn save_file(source: &impl Persistable, path: &Path) -> Result<SaveStats, PersistError> {
    let data = source.export_data();
    let bytes = encode(&data)?;
    std::fs::write(path, &bytes)?;
    let stats = SaveStats {
        records: data.records.len(),
        instances: data.records.iter().map(|r| r.instances.len()).sum(),
        bytes: bytes.len(),
    };
    info!(path = %path.display(), records = stats.records, bytes = stats.bytes, "saved");
    Ok(stats)
}

pub fn load_file(target: &impl Persistable, path: &Path) -> Result<LoadFileResult, PersistError> {
    if !path.exists() {
        debug!(path = %path.display(), "no save file");
        return Ok(LoadFileResult {
            absent: true,
            ..LoadFileResult::default()
        });
    }
    let bytes = std::fs::read(path)?;
    match decode(&bytes) {
        Ok(data) => Ok(LoadFileResult {
            absent: false,
            import: target.import_data(data),
        }),
        Err(PersistError::UnsupportedEnvelope { found, expected }) => {
            warn!(path = %path.display(), found, expected, "ignoring save from another version");
            Ok(LoadFileResult {
                absent: true,
                ..LoadFileResult::default()
            })
        }
        Err(e) => Err(e),
    }
}
