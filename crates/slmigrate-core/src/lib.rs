//! Domain types shared by every migration component.

pub mod action;
pub mod document;
pub mod error;
pub mod service;

pub use action::MigrationAction;
pub use document::{
    Document, DocumentDatabase, DocumentIter, DomainKey, InsertOutcome, MetadataConflict,
};
pub use error::{MigrationError, Result};
pub use service::{Backend, BackendKind, ConnectionConfig, ServiceDescriptor, ServiceId};
