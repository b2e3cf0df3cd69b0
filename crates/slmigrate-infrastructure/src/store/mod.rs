//! Document database backends.

mod memory;
#[cfg(feature = "mongo")]
mod mongo;

pub use memory::MemoryDatabase;
#[cfg(feature = "mongo")]
pub use mongo::{MongoConnector, MongoDatabase, connect};

use slmigrate_core::{DocumentDatabase, Result};

/// Opens databases of one engine instance by name.
pub trait DatabaseConnector {
    fn open(&self, database: &str) -> Result<Box<dyn DocumentDatabase>>;
}
