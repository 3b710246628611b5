//! Persisted local id -> business identifier mappings.
//!
//! - [`InMemoryMappingStore`]: `DashMap`, lost on restart
//! - [`SqlMappingStore`]: SQLite or MySQL through the `sqlx` `Any` driver

pub mod memory;
pub mod sql;
pub mod traits;

pub use memory::InMemoryMappingStore;
pub use sql::SqlMappingStore;
pub use traits::{IdentifierMappingStore, RecordMapping, StorageError};
