//! ItemStage Engine
//!
//! Concurrent stage-progression for counted item stacks. Items advance
//! through ordered stages over in-world time, modulated by nearby or
//! co-located catalysts, with world placements re-evaluated by a
//! background scheduler and inventory swaps batched through a queue.

pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod host;
pub mod ids;
pub mod instance;
pub mod lock_order;
pub mod persistence;
pub mod proximity;
pub mod scheduler;
pub mod store;
pub mod systems;
pub mod transfer;

pub use catalog::{CatalogDefinition, CatalystDefinition, CatalystEffect, StageCatalog, StageDefinition, StageSlot};
pub use config::EngineConfig;
pub use coordinator::{Coordinator, EngineStats, LocationSnapshot, RegisterOutcome, TickReport, UpdateOutcome, UpdateRequest};
pub use error::{CatalogError, ConfigError, EngineError, PersistError};
pub use host::{AsyncExecutor, Host, InlineExecutor, RayonExecutor};
pub use ids::{GameTime, ItemId, LocationId, Position};
pub use persistence::{ExportData, ImportResult, LoadFileResult, Persistable, SaveStats};
