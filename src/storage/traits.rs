use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::{best_identifier, BusinessIdentifier};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Stored mapping for '{id}' is unreadable: {reason}")]
    Corruption { id: String, reason: String },
}

/// Persisted link from a local id to the business identifiers it was
/// resolved from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMapping {
    pub local_id: String,
    pub record_type: String,
    pub identifiers: Vec<BusinessIdentifier>,
    /// Last refresh against the sources (epoch millis)
    pub updated_at: i64,
}

impl RecordMapping {
    pub fn new(local_id: impl Into<String>, record_type: impl Into<String>, identifiers: Vec<BusinessIdentifier>) -> Self {
        Self {
            local_id: local_id.into(),
            record_type: record_type.into(),
            identifiers,
            updated_at: crate::record::now_millis(),
        }
    }

    pub fn best_identifier(&self) -> Option<&BusinessIdentifier> {
        best_identifier(&self.identifiers)
    }

    /// Milliseconds since the last refresh, as of `now_millis`.
    #[must_use]
    pub fn age_millis(&self, now_millis: i64) -> i64 {
        now_millis.saturating_sub(self.updated_at)
    }
}

#[async_trait]
pub trait IdentifierMappingStore: Send + Sync {
    async fn put(&self, mapping: &RecordMapping) -> Result<(), StorageError>;
    async fn get(&self, local_id: &str) -> Result<Option<RecordMapping>, StorageError>;
    /// Removing an absent mapping is not an error.
    async fn remove(&self, local_id: &str) -> Result<(), StorageError>;
}
