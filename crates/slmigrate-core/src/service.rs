//! Service descriptors: what to migrate and how to reach it.

use std::fmt;
use std::path::PathBuf;
use strum::{Display, EnumIter, EnumString};

/// Operator-facing service categories.
///
/// A category selects one or more plugins from the registry; its declaration
/// order is the execution order of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ServiceId {
    Tags,
    Opc,
    Files,
    TestMonitor,
    Assets,
    Repository,
    AlarmRules,
    UserData,
    Notifications,
    States,
    Security,
}

/// Backend kind of a migrator plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum BackendKind {
    DocumentDatabase,
    SingleFile,
    DirectoryTree,
    Placeholder,
}

/// How to connect to a document database.
///
/// The two forms are mutually exclusive; which one a service uses is decided
/// by its configuration file.
#[derive(Clone, PartialEq, Eq)]
pub enum ConnectionConfig {
    Discrete {
        host: String,
        port: u16,
        user: String,
        password: String,
        database: String,
    },
    Custom {
        connection_string: String,
        database: String,
    },
}

impl ConnectionConfig {
    /// Name of the database holding the service's data.
    pub fn database(&self) -> &str {
        match self {
            Self::Discrete { database, .. } | Self::Custom { database, .. } => database,
        }
    }

    /// Whether this is the custom connection-string form.
    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom { .. })
    }
}

// Credentials never reach logs.
impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discrete {
                host,
                port,
                user,
                database,
                ..
            } => f
                .debug_struct("Discrete")
                .field("host", host)
                .field("port", port)
                .field("user", user)
                .field("password", &"***")
                .field("database", database)
                .finish(),
            Self::Custom { database, .. } => f
                .debug_struct("Custom")
                .field("connection_string", &"***")
                .field("database", database)
                .finish(),
        }
    }
}

/// Kind-specific configuration of a plugin's backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    DocumentDatabase(ConnectionConfig),
    SingleFile { source_dir: PathBuf, file_name: String },
    DirectoryTree { source_dir: PathBuf },
    /// Nothing to migrate; every operation succeeds without effect.
    Placeholder,
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::DocumentDatabase(_) => BackendKind::DocumentDatabase,
            Self::SingleFile { .. } => BackendKind::SingleFile,
            Self::DirectoryTree { .. } => BackendKind::DirectoryTree,
            Self::Placeholder => BackendKind::Placeholder,
        }
    }
}

/// One backend to migrate. Read-only once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Stable name; also the name of the service's migration subdirectory.
    pub name: String,
    /// Category that selects this descriptor.
    pub service: ServiceId,
    pub backend: Backend,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>, service: ServiceId, backend: Backend) -> Self {
        Self {
            name: name.into(),
            service,
            backend,
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }
}
