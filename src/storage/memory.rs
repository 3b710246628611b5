use async_trait::async_trait;
use dashmap::DashMap;

use super::traits::{IdentifierMappingStore, RecordMapping, StorageError};

pub struct InMemoryMappingStore {
    data: DashMap<String, RecordMapping>,
}

impl InMemoryMappingStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for InMemoryMappingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentifierMappingStore for InMemoryMappingStore {
    async fn put(&self, mapping: &RecordMapping) -> Result<(), StorageError> {
        self.data.insert(mapping.local_id.clone(), mapping.clone());
        Ok(())
    }

    async fn get(&self, local_id: &str) -> Result<Option<RecordMapping>, StorageError> {
        Ok(self.data.get(local_id).map(|r| r.value().clone()))
    }

    async fn remove(&self, local_id: &str) -> Result<(), StorageError> {
        self.data.remove(local_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::BusinessIdentifier;

    fn mapping(id: &str) -> RecordMapping {
        RecordMapping::new(id, "Patient", vec![BusinessIdentifier::new("MRN", id)])
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = InMemoryMappingStore::new();
        store.put(&mapping("Patient:1")).await.unwrap();

        let found = store.get("Patient:1").await.unwrap().unwrap();
        assert_eq!(found.record_type, "Patient");
        assert_eq!(found.best_identifier().unwrap().value, "Patient:1");
    }

    #[tokio::test]
    async fn test_get_nonexistent_returns_none() {
        let store = InMemoryMappingStore::default();
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = InMemoryMappingStore::new();
        store.put(&mapping("Patient:1")).await.unwrap();

        let mut refreshed = mapping("Patient:1");
        refreshed.identifiers.push(BusinessIdentifier::new("NHS", "9"));
        store.put(&refreshed).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("Patient:1").await.unwrap().unwrap().identifiers.len(), 2);
    }

    #[tokio::test]
    async fn test_remove_nonexistent_is_ok() {
        let store = InMemoryMappingStore::new();
        store.put(&mapping("Patient:1")).await.unwrap();
        store.remove("Patient:1").await.unwrap();
        assert!(store.remove("Patient:1").await.is_ok());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        use std::sync::Arc;

        let store = Arc::new(InMemoryMappingStore::new());
        let mut handles = vec![];
        for batch in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..10 {
                    store.put(&mapping(&format!("Patient:{}-{}", batch, i))).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.len(), 100);
    }
}
