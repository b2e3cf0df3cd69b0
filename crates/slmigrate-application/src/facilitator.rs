//! Migration Facilitator: orchestrates one capture, restore or repair run.
//!
//! A restore is all-or-nothing at the validation stage: every selected
//! plugin's pre-restore check runs before any plugin restores. Execution is
//! sequential in registry order; a plugin failure is recorded and the run
//! moves on unless the error is fatal. The database engine is shut down at
//! the end of every run, successful or not.
//!
//! A facilitator performs exactly one run: [`MigrationFacilitator::transfer`]
//! and [`MigrationFacilitator::repair_tag_history`] consume it, so a stopped
//! engine is never restarted.

use crate::registry::PluginRegistry;
use crate::report::MigrationReport;
use slmigrate_core::{MigrationAction, MigrationError, Result, ServiceId};
use slmigrate_infrastructure::{
    DatabaseConnector, DumpProcessController, EngineShutdownHandle, HistoryMerge, MergeReport,
    MigrationDirectory, MigratorPlugin, PluginContext,
};
use std::collections::BTreeSet;

/// Databases involved in an intra-instance tag history repair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairRequest {
    pub source_database: String,
    pub destination_database: String,
}

/// Runs one migration against one migration directory with one engine.
pub struct MigrationFacilitator {
    directory: MigrationDirectory,
    dumper: DumpProcessController,
}

impl MigrationFacilitator {
    pub fn new(directory: MigrationDirectory, dumper: DumpProcessController) -> Self {
        Self { directory, dumper }
    }

    pub fn directory(&self) -> &MigrationDirectory {
        &self.directory
    }

    /// Handle that stops the engine from another thread, e.g. on interrupt.
    pub fn shutdown_handle(&self) -> EngineShutdownHandle {
        self.dumper.shutdown_handle()
    }

    /// Captures or restores the plugins of `services`.
    ///
    /// Restore is destructive and requires `force`. Returns `Err` only for
    /// fatal errors; per-plugin failures are in the report.
    pub fn transfer(
        mut self,
        action: MigrationAction,
        registry: &PluginRegistry,
        services: &BTreeSet<ServiceId>,
        force: bool,
    ) -> Result<MigrationReport> {
        let result = self.run_transfer(action, registry, services, force);
        self.release_engine();
        result
    }

    fn run_transfer(
        &mut self,
        action: MigrationAction,
        registry: &PluginRegistry,
        services: &BTreeSet<ServiceId>,
        force: bool,
    ) -> Result<MigrationReport> {
        if services.is_empty() {
            return Err(MigrationError::configuration(
                "selection",
                "no services selected; pass at least one service flag or --all",
            ));
        }

        let plugins: Vec<&dyn MigratorPlugin> = registry.selected(services).collect();
        match action {
            MigrationAction::Capture => {}
            MigrationAction::Restore => {
                if !force {
                    return Err(MigrationError::ForceRequired);
                }
                validate_restore(&plugins, &self.directory)?;
            }
        }

        tracing::info!(
            "Starting {} of {} plugin(s) in {}",
            action,
            plugins.len(),
            self.directory.root().display()
        );
        self.execute(action, &plugins)
    }

    fn execute(
        &mut self,
        action: MigrationAction,
        plugins: &[&dyn MigratorPlugin],
    ) -> Result<MigrationReport> {
        let mut report = MigrationReport::new(action);
        let mut ctx = PluginContext {
            directory: &self.directory,
            dumper: &mut self.dumper,
        };

        for plugin in plugins {
            tracing::info!("{}: {} ({})", plugin.name(), action, plugin.kind());
            match migrate(*plugin, action, &mut ctx) {
                Ok(()) => {
                    tracing::info!("{}: {} complete", plugin.name(), action);
                    report.record(plugin.name(), plugin.service(), Ok(()));
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!("{}: {}; aborting run", plugin.name(), e);
                    return Err(e);
                }
                Err(e) => {
                    tracing::error!("{}: {}", plugin.name(), e);
                    report.record(plugin.name(), plugin.service(), Err(e));
                }
            }
        }
        Ok(report)
    }

    /// Merges tag history written to the wrong database back into the
    /// tag history database of the same engine instance.
    pub fn repair_tag_history(
        mut self,
        connector: &dyn DatabaseConnector,
        request: &RepairRequest,
    ) -> Result<MergeReport> {
        let result = self.run_repair(connector, request);
        self.release_engine();
        result
    }

    fn run_repair(
        &mut self,
        connector: &dyn DatabaseConnector,
        request: &RepairRequest,
    ) -> Result<MergeReport> {
        if request.source_database == request.destination_database {
            return Err(MigrationError::configuration(
                "TagHistorian",
                format!(
                    "source database '{}' is already the tag history database",
                    request.source_database
                ),
            ));
        }

        self.dumper.ensure_engine_running()?;
        let source = connector.open(&request.source_database)?;
        let mut destination = connector.open(&request.destination_database)?;
        HistoryMerge::new(source.as_ref(), destination.as_mut()).run()
    }

    fn release_engine(&mut self) {
        if let Err(e) = self.dumper.shutdown() {
            tracing::warn!("{}", e);
        }
    }
}

/// Runs one plugin for `action`.
pub fn migrate(
    plugin: &dyn MigratorPlugin,
    action: MigrationAction,
    ctx: &mut PluginContext<'_>,
) -> Result<()> {
    match action {
        MigrationAction::Capture => plugin.capture(ctx),
        MigrationAction::Restore => plugin.restore(ctx),
    }
}

/// Runs every pre-restore check. A single failure is returned as is; several
/// are reported together as [`MigrationError::PreflightFailed`].
pub fn validate_restore(
    plugins: &[&dyn MigratorPlugin],
    directory: &MigrationDirectory,
) -> Result<()> {
    let mut errors: Vec<MigrationError> = plugins
        .iter()
        .filter_map(|plugin| plugin.pre_restore_check(directory).err())
        .collect();

    for e in &errors {
        tracing::error!("{}", e);
    }
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(MigrationError::PreflightFailed(errors)),
    }
}
