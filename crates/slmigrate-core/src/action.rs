use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Direction of a migration run.
///
/// Every plugin operation is parameterized by exactly one of these; the
/// intra-instance repair is a separate request, not a third action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MigrationAction {
    /// Read a service's state into the migration directory.
    Capture,
    /// Write the migration directory back into a service.
    Restore,
}
