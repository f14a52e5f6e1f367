//! Error types
//!
//! Nothing in the core is process-fatal: catalogs that fail integrity checks
//! are excluded, and per-call misses are reported back to the caller.

use thiserror::Error;

use crate::ids::{ItemId, LocationId, StageNo};

/// Integrity failure found while building a catalog. The catalog is marked
/// unhealthy and never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CatalogError {
    #[error("catalog {key} has no stages")]
    NoStages { key: String },
    #[error("catalog {key}: stage indices are not contiguous from 0 (missing {missing})")]
    NonContiguous { key: String, missing: StageNo },
    #[error("catalog {key}: stage {stage} has non-positive duration")]
    ZeroDuration { key: String, stage: StageNo },
    #[error("catalog {key}: item {item} is used by more than one stage")]
    DuplicateStageItem { key: String, item: ItemId },
    #[error("catalog {key}: catalyst {catalyst} references unknown stage {stage}")]
    UnknownCatalystStage {
        key: String,
        catalyst: ItemId,
        stage: StageNo,
    },
    #[error("catalog {key}: fake stage {stage} does not exist")]
    UnknownFakeStage { key: String, stage: StageNo },
    #[error("catalog {key}: transformer {catalyst} has non-positive duration")]
    ZeroTransformDuration { key: String, catalyst: ItemId },
    #[error("catalog {key}: catalyst {catalyst} is registered twice")]
    DuplicateCatalyst { key: String, catalyst: ItemId },
    #[error("catalog {key}: catalyst {catalyst} is not a known item")]
    UnresolvedCatalyst { key: String, catalyst: ItemId },
    #[error("catalog {key}: {location} is not a known container")]
    UnresolvedContainer { key: String, location: LocationId },
}

/// Rejection of a single engine call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("cannot register a zero count")]
    ZeroCount,
    #[error("item {0} is not tracked by any catalog")]
    UnknownItem(ItemId),
    #[error("catalog {0} is unhealthy")]
    UnhealthyCatalog(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("save file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("binary encoding failed: {0}")]
    Binary(#[from] bincode::Error),
    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported save version {found} (expected {expected})")]
    UnsupportedEnvelope { found: u32, expected: u32 },
}
