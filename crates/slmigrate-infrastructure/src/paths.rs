//! Default locations of platform data and migration artifacts.
//!
//! These are only defaults; every path can be overridden through
//! [`MigrationSettings`](crate::settings::MigrationSettings).
//!
//! # Directory Structure
//!
//! ```text
//! <ProgramData>/National Instruments/
//! ├── Skyline/
//! │   ├── Config/              # per-service JSON configuration
//! │   │   ├── TagHistorian.json
//! │   │   └── NoSqlDatabase.json
//! │   └── Data/                # file-backed service data
//! └── Shared/Skyline/NoSqlDatabase/
//!     ├── bin/                 # mongod, mongodump, mongorestore
//!     └── mongodb.conf
//!
//! <user data dir>/slmigrate/migration/   # default migration root
//! ```

use std::path::PathBuf;

/// Errors that can occur during path resolution.
#[derive(Debug)]
pub enum PathError {
    /// Neither `ProgramData` nor a user data directory could be determined.
    DataDirNotFound,
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::DataDirNotFound => write!(f, "Cannot find a platform data directory"),
        }
    }
}

impl std::error::Error for PathError {}

/// Platform path resolution.
pub struct PlatformPaths;

impl PlatformPaths {
    /// Root of machine-wide program data.
    ///
    /// Uses `ProgramData` when set (Windows), otherwise the user data
    /// directory from `dirs`.
    pub fn program_data_dir() -> Result<PathBuf, PathError> {
        if let Some(dir) = std::env::var_os("ProgramData") {
            return Ok(PathBuf::from(dir));
        }
        dirs::data_dir().ok_or(PathError::DataDirNotFound)
    }

    /// `<program data>/National Instruments`
    pub fn vendor_dir() -> Result<PathBuf, PathError> {
        Ok(Self::program_data_dir()?.join("National Instruments"))
    }

    /// Directory holding one JSON configuration file per service.
    pub fn service_config_dir() -> Result<PathBuf, PathError> {
        Ok(Self::vendor_dir()?.join("Skyline").join("Config"))
    }

    /// Directory holding file-backed service data.
    pub fn service_data_dir() -> Result<PathBuf, PathError> {
        Ok(Self::vendor_dir()?.join("Skyline").join("Data"))
    }

    /// Installation directory of the bundled document database.
    pub fn nosql_dir() -> Result<PathBuf, PathError> {
        Ok(Self::vendor_dir()?
            .join("Shared")
            .join("Skyline")
            .join("NoSqlDatabase"))
    }

    /// Default migration root when the operator gives none.
    pub fn default_migration_dir() -> Result<PathBuf, PathError> {
        let base = dirs::data_dir().ok_or(PathError::DataDirNotFound)?;
        Ok(base.join("slmigrate").join("migration"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_config_dir() {
        let dir = PlatformPaths::service_config_dir().unwrap();
        assert!(dir.ends_with("Skyline/Config"));
        assert!(dir.starts_with(PlatformPaths::vendor_dir().unwrap()));
    }

    #[test]
    fn test_nosql_dir_under_vendor_dir() {
        let dir = PlatformPaths::nosql_dir().unwrap();
        assert!(dir.ends_with("NoSqlDatabase"));
        assert!(dir.starts_with(PlatformPaths::vendor_dir().unwrap()));
    }

    #[test]
    fn test_default_migration_dir() {
        let dir = PlatformPaths::default_migration_dir().unwrap();
        assert!(dir.ends_with("slmigrate/migration"));
    }
}
