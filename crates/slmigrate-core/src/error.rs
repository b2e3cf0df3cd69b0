//! Error types for the migration tool.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// A shared error type for every migration component.
///
/// Variants carry enough context (service name, path, exit code) to produce an
/// actionable message without the caller re-wrapping them.
#[derive(Error, Debug)]
pub enum MigrationError {
    /// Service configuration is missing or contradictory.
    #[error("Configuration error for '{service}': {message}")]
    Configuration { service: String, message: String },

    /// Restore requested but nothing was captured for the service.
    #[error("Nothing to restore for '{service}': {} does not exist", path.display())]
    MissingCapture { service: String, path: PathBuf },

    /// The external dump command exited unsuccessfully.
    #[error("Dump of database '{database}' failed (exit code: {})", display_code(*code))]
    DumpFailed { database: String, code: Option<i32> },

    /// The external restore command exited unsuccessfully.
    #[error("Restore of database '{database}' failed (exit code: {})", display_code(*code))]
    RestoreFailed { database: String, code: Option<i32> },

    /// Filesystem operation failed.
    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Destination database is not ready for an intra-instance merge.
    #[error("Database is not ready for migration: {0}")]
    MergeReadiness(String),

    /// The database engine or one of its tools could not be launched.
    #[error("Database engine error: {0}")]
    Engine(String),

    /// The engine was shut down, e.g. by an interrupt, and this run may not
    /// start it again.
    #[error("Database engine was shut down; the run cannot continue")]
    EngineStopped,

    /// Document store access failed.
    #[error("Document store error: {0}")]
    Store(String),

    /// A document lacks the fields needed to migrate it.
    #[error("Malformed document {id} in collection '{collection}'")]
    MalformedDocument { collection: String, id: String },

    /// Restore is destructive and was requested without the force flag.
    #[error(
        "'restore' will overwrite existing data for the services being restored. \
         Run the command again with --force to delete existing data and restore the captured data"
    )]
    ForceRequired,

    /// One or more plugins failed the pre-restore check.
    #[error("Pre-restore checks failed ({} total)", .0.len())]
    PreflightFailed(Vec<MigrationError>),
}

fn display_code(code: Option<i32>) -> String {
    code.map_or_else(|| "terminated by signal".to_string(), |c| c.to_string())
}

impl MigrationError {
    // ============================================================================
    // Constructor helpers
    // ============================================================================

    /// Creates a Configuration error
    pub fn configuration(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Creates an Io error bound to the offending path
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Creates a MissingCapture error
    pub fn missing_capture(service: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::MissingCapture {
            service: service.into(),
            path: path.into(),
        }
    }

    /// Creates a Store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    // ============================================================================
    // Type checking methods
    // ============================================================================

    /// Whether this error aborts the whole run rather than a single plugin.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. }
                | Self::MergeReadiness(_)
                | Self::ForceRequired
                | Self::EngineStopped
                | Self::PreflightFailed(_)
        )
    }

    /// Check if this is a MissingCapture error
    pub fn is_missing_capture(&self) -> bool {
        matches!(self, Self::MissingCapture { .. })
    }

    /// Check if this is a Configuration error
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}

/// A type alias for `Result<T, MigrationError>`.
pub type Result<T> = std::result::Result<T, MigrationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(MigrationError::configuration("TagHistorian", "missing Mongo.Port").is_fatal());
        assert!(MigrationError::MergeReadiness("no workspace".into()).is_fatal());
        assert!(MigrationError::ForceRequired.is_fatal());
        assert!(MigrationError::EngineStopped.is_fatal());
        assert!(!MigrationError::Engine("mongod missing".into()).is_fatal());
        assert!(!MigrationError::missing_capture("UserData", "/tmp/x").is_fatal());
        assert!(
            !MigrationError::DumpFailed {
                database: "nitag".into(),
                code: Some(1)
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_messages_name_service_and_artifact() {
        let err = MigrationError::missing_capture("UserData", "/migration/UserData");
        let msg = err.to_string();
        assert!(msg.contains("UserData"));
        assert!(msg.contains("/migration/UserData"));

        let err = MigrationError::RestoreFailed {
            database: "niuserdata".into(),
            code: None,
        };
        assert!(err.to_string().contains("terminated by signal"));
    }
}
