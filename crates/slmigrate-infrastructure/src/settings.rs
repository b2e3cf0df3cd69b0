//! Tool settings loaded from an optional TOML file.
//!
//! Every field has a platform default, so an empty file (or no file) is a
//! valid configuration:
//!
//! ```toml
//! migration_dir = "D:/migration"
//!
//! [engine]
//! bin_dir = "C:/Program Files/National Instruments/Shared/Skyline/NoSqlDatabase/bin"
//! config_file = "C:/ProgramData/National Instruments/Skyline/NoSqlDatabase/mongodb.conf"
//! ```

use crate::paths::PlatformPaths;
use serde::{Deserialize, Serialize};
use slmigrate_core::{MigrationError, Result};
use std::fs;
use std::path::{Path, PathBuf};

const SETTINGS_SOURCE: &str = "settings";

/// Location of the database engine and its tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Directory containing `mongod`, `mongodump` and `mongorestore`.
    pub bin_dir: PathBuf,
    /// Configuration file passed to the engine on start.
    pub config_file: PathBuf,
}

impl EngineSettings {
    fn executable(&self, name: &str) -> PathBuf {
        self.bin_dir
            .join(format!("{}{}", name, std::env::consts::EXE_SUFFIX))
    }

    pub fn engine_executable(&self) -> PathBuf {
        self.executable("mongod")
    }

    pub fn dump_executable(&self) -> PathBuf {
        self.executable("mongodump")
    }

    pub fn restore_executable(&self) -> PathBuf {
        self.executable("mongorestore")
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        let nosql = PlatformPaths::nosql_dir().unwrap_or_else(|_| PathBuf::from("NoSqlDatabase"));
        Self {
            bin_dir: nosql.join("bin"),
            config_file: nosql.join("mongodb.conf"),
        }
    }
}

/// Settings for one run of the tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationSettings {
    /// Migration root used when the operator does not pass one.
    pub migration_dir: PathBuf,
    /// Directory of per-service JSON configuration files.
    pub service_config_dir: PathBuf,
    /// Root of file-backed service data.
    pub service_data_dir: PathBuf,
    pub engine: EngineSettings,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            migration_dir: PlatformPaths::default_migration_dir()
                .unwrap_or_else(|_| PathBuf::from("migration")),
            service_config_dir: PlatformPaths::service_config_dir()
                .unwrap_or_else(|_| PathBuf::from("Config")),
            service_data_dir: PlatformPaths::service_data_dir()
                .unwrap_or_else(|_| PathBuf::from("Data")),
            engine: EngineSettings::default(),
        }
    }
}

impl MigrationSettings {
    /// Loads settings from a TOML file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            MigrationError::configuration(
                SETTINGS_SOURCE,
                format!("cannot read {}: {}", path.display(), e),
            )
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            MigrationError::Configuration { message, .. } => MigrationError::configuration(
                SETTINGS_SOURCE,
                format!("{}: {}", path.display(), message),
            ),
            other => other,
        })
    }

    /// Parses settings from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        toml::from_str(content)
            .map_err(|e| MigrationError::configuration(SETTINGS_SOURCE, e.to_string()))
    }

    /// Loads `path` when given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_settings_use_defaults() {
        let settings = MigrationSettings::from_toml("").unwrap();
        assert_eq!(settings, MigrationSettings::default());
    }

    #[test]
    fn test_partial_settings_override_fields() {
        let settings = MigrationSettings::from_toml(
            r#"
            migration_dir = "/srv/migration"

            [engine]
            bin_dir = "/opt/mongo/bin"
            "#,
        )
        .unwrap();

        assert_eq!(settings.migration_dir, PathBuf::from("/srv/migration"));
        assert_eq!(settings.engine.bin_dir, PathBuf::from("/opt/mongo/bin"));
        assert_eq!(
            settings.engine.config_file,
            EngineSettings::default().config_file
        );
        assert!(settings.engine.dump_executable().starts_with("/opt/mongo/bin"));
    }

    #[test]
    fn test_invalid_settings_are_configuration_errors() {
        let err = MigrationSettings::from_toml("migration_dir = 3").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_load_names_missing_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("slmigrate.toml");
        let err = MigrationSettings::load(&path).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("slmigrate.toml"));

        std::fs::write(&path, "service_data_dir = \"/data\"\n").unwrap();
        let settings = MigrationSettings::load_or_default(Some(&path)).unwrap();
        assert_eq!(settings.service_data_dir, PathBuf::from("/data"));
    }
}
