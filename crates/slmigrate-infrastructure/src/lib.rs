pub mod directory;
pub mod dump;
pub mod merge;
pub mod paths;
pub mod plugin;
pub mod service_config;
pub mod settings;
pub mod store;

pub use crate::directory::MigrationDirectory;
pub use crate::dump::{DumpProcessController, EngineShutdownHandle, Invocation, ProcessRunner};
pub use crate::merge::{HistoryMerge, MergeReport};
pub use crate::plugin::{MigratorPlugin, PluginContext, plugin_for};
pub use crate::service_config::ServiceConfigLoader;
pub use crate::settings::{EngineSettings, MigrationSettings};
pub use crate::store::{DatabaseConnector, MemoryDatabase};
