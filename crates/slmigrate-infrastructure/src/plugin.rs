//! Migrator plugins: one capture/restore capability per backend kind.

use crate::directory::{self, MigrationDirectory};
use crate::dump::DumpProcessController;
use slmigrate_core::{
    Backend, BackendKind, ConnectionConfig, MigrationAction, MigrationError, Result,
    ServiceDescriptor, ServiceId,
};
use std::path::PathBuf;

/// Resources a plugin operates on during a run.
pub struct PluginContext<'a> {
    pub directory: &'a MigrationDirectory,
    pub dumper: &'a mut DumpProcessController,
}

/// Uniform capture/restore capability of one backend.
pub trait MigratorPlugin: Send + Sync {
    /// Stable name; also the plugin's migration subdirectory.
    fn name(&self) -> &str;

    /// Category selecting this plugin.
    fn service(&self) -> ServiceId;

    fn kind(&self) -> BackendKind;

    /// Succeeds only if everything a restore needs is present. Never mutates.
    fn pre_restore_check(&self, directory: &MigrationDirectory) -> Result<()>;

    fn capture(&self, ctx: &mut PluginContext<'_>) -> Result<()>;

    fn restore(&self, ctx: &mut PluginContext<'_>) -> Result<()>;
}

/// Builds the plugin matching a descriptor's backend.
pub fn plugin_for(descriptor: ServiceDescriptor) -> Box<dyn MigratorPlugin> {
    let ServiceDescriptor {
        name,
        service,
        backend,
    } = descriptor;
    match backend {
        Backend::DocumentDatabase(config) => Box::new(DocumentDatabasePlugin {
            name,
            service,
            config,
        }),
        Backend::SingleFile {
            source_dir,
            file_name,
        } => Box::new(SingleFilePlugin {
            name,
            service,
            source_dir,
            file_name,
        }),
        Backend::DirectoryTree { source_dir } => Box::new(DirectoryTreePlugin {
            name,
            service,
            source_dir,
        }),
        Backend::Placeholder => Box::new(PlaceholderPlugin { name, service }),
    }
}

// ============================================================================
// Document database
// ============================================================================

/// Captures a service's database with the dump tool.
#[derive(Debug)]
pub struct DocumentDatabasePlugin {
    name: String,
    service: ServiceId,
    config: ConnectionConfig,
}

impl MigratorPlugin for DocumentDatabasePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn service(&self) -> ServiceId {
        self.service
    }

    fn kind(&self) -> BackendKind {
        BackendKind::DocumentDatabase
    }

    fn pre_restore_check(&self, directory: &MigrationDirectory) -> Result<()> {
        let artifact = DumpProcessController::dump_artifact_path(
            &self.config,
            &directory.service_directory(&self.name),
        );
        if !artifact.exists() {
            return Err(MigrationError::missing_capture(&self.name, artifact));
        }
        Ok(())
    }

    fn capture(&self, ctx: &mut PluginContext<'_>) -> Result<()> {
        let dir = ctx.directory.ensure_clean_capture_directory(&self.name)?;
        ctx.dumper.dump(&self.name, &self.config, &dir)
    }

    fn restore(&self, ctx: &mut PluginContext<'_>) -> Result<()> {
        let dir = ctx.directory.service_directory(&self.name);
        ctx.dumper.restore(&self.name, &self.config, &dir)
    }
}

// ============================================================================
// Single file
// ============================================================================

/// Captures one file of a service's data directory.
#[derive(Debug)]
pub struct SingleFilePlugin {
    name: String,
    service: ServiceId,
    source_dir: PathBuf,
    file_name: String,
}

impl SingleFilePlugin {
    fn captured_file(&self, directory: &MigrationDirectory) -> PathBuf {
        directory.service_directory(&self.name).join(&self.file_name)
    }
}

impl MigratorPlugin for SingleFilePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn service(&self) -> ServiceId {
        self.service
    }

    fn kind(&self) -> BackendKind {
        BackendKind::SingleFile
    }

    fn pre_restore_check(&self, directory: &MigrationDirectory) -> Result<()> {
        let service_dir = directory.service_directory(&self.name);
        if !directory.restore_directory_exists(&self.name)
            || !directory::file_exists(&service_dir, &self.file_name)
        {
            return Err(MigrationError::missing_capture(
                &self.name,
                self.captured_file(directory),
            ));
        }
        Ok(())
    }

    fn capture(&self, ctx: &mut PluginContext<'_>) -> Result<()> {
        let dir = ctx.directory.ensure_clean_capture_directory(&self.name)?;
        let copied = directory::copy_file_into(&self.source_dir.join(&self.file_name), &dir)?;
        tracing::info!("Captured {} to {}", self.file_name, copied.display());
        Ok(())
    }

    fn restore(&self, ctx: &mut PluginContext<'_>) -> Result<()> {
        self.pre_restore_check(ctx.directory)?;
        let restored = directory::copy_file_into(&self.captured_file(ctx.directory), &self.source_dir)?;
        tracing::info!("Restored {}", restored.display());
        Ok(())
    }
}

// ============================================================================
// Directory tree
// ============================================================================

/// Captures a whole directory tree verbatim.
#[derive(Debug)]
pub struct DirectoryTreePlugin {
    name: String,
    service: ServiceId,
    source_dir: PathBuf,
}

impl MigratorPlugin for DirectoryTreePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn service(&self) -> ServiceId {
        self.service
    }

    fn kind(&self) -> BackendKind {
        BackendKind::DirectoryTree
    }

    fn pre_restore_check(&self, directory: &MigrationDirectory) -> Result<()> {
        if !directory.restore_directory_exists(&self.name) {
            return Err(MigrationError::missing_capture(
                &self.name,
                directory.service_directory(&self.name),
            ));
        }
        Ok(())
    }

    fn capture(&self, ctx: &mut PluginContext<'_>) -> Result<()> {
        let dir = ctx.directory.clear_service_directory(&self.name)?;
        directory::copy_tree(&self.source_dir, &dir, MigrationAction::Capture)?;
        tracing::info!("Captured {} to {}", self.source_dir.display(), dir.display());
        Ok(())
    }

    fn restore(&self, ctx: &mut PluginContext<'_>) -> Result<()> {
        self.pre_restore_check(ctx.directory)?;
        let dir = ctx.directory.service_directory(&self.name);
        directory::copy_tree(&dir, &self.source_dir, MigrationAction::Restore)?;
        tracing::info!("Restored {}", self.source_dir.display());
        Ok(())
    }
}

// ============================================================================
// Placeholder
// ============================================================================

/// A service with nothing to migrate.
#[derive(Debug)]
pub struct PlaceholderPlugin {
    name: String,
    service: ServiceId,
}

impl MigratorPlugin for PlaceholderPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn service(&self) -> ServiceId {
        self.service
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Placeholder
    }

    fn pre_restore_check(&self, _directory: &MigrationDirectory) -> Result<()> {
        Ok(())
    }

    fn capture(&self, _ctx: &mut PluginContext<'_>) -> Result<()> {
        tracing::debug!("{} has no data to capture", self.name);
        Ok(())
    }

    fn restore(&self, _ctx: &mut PluginContext<'_>) -> Result<()> {
        tracing::debug!("{} has no data to restore", self.name);
        Ok(())
    }
}
