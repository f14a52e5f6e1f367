//! Systems - per-instance progression logic driven by the coordinator

pub mod advance;
pub mod catalyst;
pub mod cleanup;

pub use advance::{advance_instance, next_due, StageChange};
pub use catalyst::{apply_modulation, resolve_in_inventory, resolve_in_world, Modulation};
pub use cleanup::{is_expired, locations_to_prune};
