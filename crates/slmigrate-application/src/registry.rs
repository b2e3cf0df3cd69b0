//! Static, ordered catalog of migratable services.
//!
//! Every entry names one plugin and the operator-facing service that selects
//! it. Execution always follows catalog order, whatever order the services
//! were requested in.

use slmigrate_core::{Backend, MigrationError, Result, ServiceDescriptor, ServiceId};
use slmigrate_infrastructure::{
    MigrationSettings, MigratorPlugin, ServiceConfigLoader, plugin_for,
};
use std::collections::BTreeSet;
use strum::IntoEnumIterator;

use CatalogBackend::{DocumentDatabase, Placeholder};

/// How a catalog entry's backend is located.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogBackend {
    /// Database described by the service configuration file of the same name.
    DocumentDatabase,
    /// Directory relative to the service data directory.
    DirectoryTree { data_subdir: &'static str },
    /// One file in a directory relative to the service data directory.
    SingleFile {
        data_subdir: &'static str,
        file_name: &'static str,
    },
    Placeholder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: &'static str,
    pub service: ServiceId,
    pub backend: CatalogBackend,
}

const fn entry(name: &'static str, service: ServiceId, backend: CatalogBackend) -> CatalogEntry {
    CatalogEntry {
        name,
        service,
        backend,
    }
}

pub const CATALOG: &[CatalogEntry] = &[
    entry("TagIngestion", ServiceId::Tags, Placeholder),
    entry("TagHistorian", ServiceId::Tags, DocumentDatabase),
    entry("OpcClient", ServiceId::Opc, DocumentDatabase),
    entry(
        "OpcCertificates",
        ServiceId::Opc,
        CatalogBackend::DirectoryTree {
            data_subdir: "OpcClient/Certificates",
        },
    ),
    entry("FileIngestion", ServiceId::Files, DocumentDatabase),
    entry(
        "FileIngestionData",
        ServiceId::Files,
        CatalogBackend::DirectoryTree {
            data_subdir: "FileIngestion",
        },
    ),
    entry("TestMonitor", ServiceId::TestMonitor, DocumentDatabase),
    entry("AssetPerformanceManagement", ServiceId::Assets, DocumentDatabase),
    entry("PackageRepository", ServiceId::Repository, DocumentDatabase),
    entry(
        "PackageRepositoryFeeds",
        ServiceId::Repository,
        CatalogBackend::DirectoryTree {
            data_subdir: "PackageRepository/Feeds",
        },
    ),
    entry("TagRuleEngine", ServiceId::AlarmRules, DocumentDatabase),
    entry("UserData", ServiceId::UserData, DocumentDatabase),
    entry("Notification", ServiceId::Notifications, DocumentDatabase),
    entry("SystemsStateManager", ServiceId::States, DocumentDatabase),
    entry(
        "SystemsStateManagerStates",
        ServiceId::States,
        CatalogBackend::DirectoryTree {
            data_subdir: "SystemsStateManager/States",
        },
    ),
    entry(
        "SecuritySettings",
        ServiceId::Security,
        CatalogBackend::SingleFile {
            data_subdir: "Security",
            file_name: "security.json",
        },
    ),
];

/// Configuration name of the shared database engine.
pub const NOSQL_CONFIG_NAME: &str = "NoSqlDatabase";
/// Configuration name of the tag history service.
pub const TAG_HISTORIAN_CONFIG_NAME: &str = "TagHistorian";

/// Every service known to the catalog.
pub fn all_services() -> BTreeSet<ServiceId> {
    ServiceId::iter().collect()
}

impl CatalogEntry {
    /// Resolves this entry into a descriptor, reading its configuration.
    pub fn describe(
        &self,
        settings: &MigrationSettings,
        loader: &ServiceConfigLoader,
    ) -> Result<ServiceDescriptor> {
        let backend = match self.backend {
            CatalogBackend::DocumentDatabase => {
                Backend::DocumentDatabase(loader.load_connection(self.name)?)
            }
            CatalogBackend::DirectoryTree { data_subdir } => Backend::DirectoryTree {
                source_dir: settings.service_data_dir.join(data_subdir),
            },
            CatalogBackend::SingleFile {
                data_subdir,
                file_name,
            } => Backend::SingleFile {
                source_dir: settings.service_data_dir.join(data_subdir),
                file_name: file_name.to_string(),
            },
            CatalogBackend::Placeholder => Backend::Placeholder,
        };
        Ok(ServiceDescriptor::new(self.name, self.service, backend))
    }
}

/// Ordered plugins available to a run.
pub struct PluginRegistry {
    plugins: Vec<Box<dyn MigratorPlugin>>,
}

impl PluginRegistry {
    pub fn new(plugins: Vec<Box<dyn MigratorPlugin>>) -> Self {
        Self { plugins }
    }

    /// Builds the plugins of the selected services in catalog order.
    ///
    /// Every configuration is read before anything runs; all configuration
    /// errors are reported together.
    pub fn resolve(settings: &MigrationSettings, services: &BTreeSet<ServiceId>) -> Result<Self> {
        let loader = ServiceConfigLoader::new(&settings.service_config_dir);
        let mut plugins = Vec::new();
        let mut errors = Vec::new();

        for entry in CATALOG.iter().filter(|e| services.contains(&e.service)) {
            match entry.describe(settings, &loader) {
                Ok(descriptor) => plugins.push(plugin_for(descriptor)),
                Err(e) => errors.push(e),
            }
        }

        match errors.len() {
            0 => Ok(Self::new(plugins)),
            1 => Err(errors.remove(0)),
            _ => Err(MigrationError::PreflightFailed(errors)),
        }
    }

    pub fn plugins(&self) -> &[Box<dyn MigratorPlugin>] {
        &self.plugins
    }

    /// Plugins of `services`, in registry order.
    pub fn selected<'a>(
        &'a self,
        services: &'a BTreeSet<ServiceId>,
    ) -> impl Iterator<Item = &'a dyn MigratorPlugin> + 'a {
        self.plugins
            .iter()
            .map(|plugin| plugin.as_ref())
            .filter(move |plugin| services.contains(&plugin.service()))
    }
}
