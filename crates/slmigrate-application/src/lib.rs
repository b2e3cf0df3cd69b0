//! Application layer for slmigrate.
//!
//! Coordinates the plugin registry and the infrastructure components into
//! capture, restore and repair runs.

pub mod facilitator;
pub mod registry;
pub mod report;

pub use facilitator::{MigrationFacilitator, RepairRequest};
pub use registry::{CATALOG, PluginRegistry, all_services};
pub use report::{MigrationReport, PluginOutcome};
