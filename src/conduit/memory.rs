use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{Conduit, ConduitError, ResourceGrade, SearchParams, SourceGrade, SourceResponse, SourceSearchResponse};
use crate::outcome::{Action, Status};
use crate::record::{BusinessIdentifier, Record};

/// A source of truth held in memory, keyed by local id.
///
/// Searches match records whose fields equal every search parameter.
pub struct InMemoryConduit {
    name: String,
    source_grade: SourceGrade,
    resource_grade: ResourceGrade,
    writable: bool,
    searches: Vec<String>,
    data: DashMap<String, Record>,
    calls: AtomicUsize,
}

impl InMemoryConduit {
    #[must_use]
    pub fn new(name: impl Into<String>, source_grade: SourceGrade) -> Self {
        Self {
            name: name.into(),
            source_grade,
            resource_grade: ResourceGrade::Thorough,
            writable: true,
            searches: Vec::new(),
            data: DashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Grade reported for every record this source returns.
    #[must_use]
    pub fn with_resource_grade(mut self, grade: ResourceGrade) -> Self {
        self.resource_grade = grade;
        self
    }

    /// Accept the named search.
    #[must_use]
    pub fn with_search(mut self, search_name: impl Into<String>) -> Self {
        self.searches.push(search_name.into());
        self
    }

    /// Refuse direct create, update and delete.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    /// Seed a record, assigning a local id if it has none.
    pub fn insert(&self, mut record: Record) -> String {
        let id = record.ensure_id();
        self.data.insert(id.clone(), record);
        id
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Conduit operations invoked so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn called(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Local id of the stored record matching `record` by id or shared identifier.
    fn find_key(&self, record: &Record) -> Option<String> {
        if let Some(ref id) = record.id {
            if self.data.contains_key(id) {
                return Some(id.clone());
            }
        }
        self.data
            .iter()
            .find(|kv| kv.value().shares_identifier_with(record))
            .map(|kv| kv.key().clone())
    }

    fn response(&self, action: Action, status: Status) -> SourceResponse {
        SourceResponse::new(self.name.clone(), action, status, self.source_grade)
    }

    fn not_found(&self, action: Action) -> SourceResponse {
        self.response(action, Status::NotFound)
    }
}

#[async_trait]
impl Conduit for InMemoryConduit {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_grade(&self) -> SourceGrade {
        self.source_grade
    }

    async fn create_record(&self, record: &Record) -> Result<SourceResponse, ConduitError> {
        self.called();
        if !self.writable {
            return Err(ConduitError::Unsupported(format!("{} is read-only", self.name)));
        }
        if let Some(key) = self.find_key(record) {
            let existing = self.data.get(&key).map(|r| r.value().clone());
            if let Some(existing) = existing {
                return Ok(self
                    .response(Action::Create, Status::CreationNotRequired)
                    .with_record(existing, self.resource_grade));
            }
        }
        let mut stored = record.clone();
        let id = stored.ensure_id();
        self.data.insert(id, stored.clone());
        Ok(self
            .response(Action::Create, Status::Finished)
            .with_record(stored, self.resource_grade))
    }

    async fn review_by_id(&self, id: &str) -> Result<SourceResponse, ConduitError> {
        self.called();
        let found = self.data.get(id).map(|r| r.value().clone());
        Ok(match found {
            Some(record) => self
                .response(Action::Review, Status::Finished)
                .with_record(record, self.resource_grade),
            None => self.not_found(Action::Review),
        })
    }

    async fn review_by_identifier(&self, identifier: &BusinessIdentifier) -> Result<SourceResponse, ConduitError> {
        self.called();
        let found = self
            .data
            .iter()
            .find(|kv| kv.value().has_identifier(identifier))
            .map(|kv| kv.value().clone());
        Ok(match found {
            Some(record) => self
                .response(Action::Review, Status::Finished)
                .with_identifier(identifier.clone())
                .with_record(record, self.resource_grade),
            None => self.not_found(Action::Review).with_identifier(identifier.clone()),
        })
    }

    async fn update_record(&self, record: &Record) -> Result<SourceResponse, ConduitError> {
        self.called();
        if !self.writable {
            return Err(ConduitError::Unsupported(format!("{} is read-only", self.name)));
        }
        let Some(key) = self.find_key(record) else {
            return Ok(self.not_found(Action::Update));
        };
        let mut stored = record.clone();
        stored.id = Some(key.clone());
        self.data.insert(key, stored.clone());
        Ok(self
            .response(Action::Update, Status::Finished)
            .with_record(stored, self.resource_grade))
    }

    async fn delete_record(&self, record: &Record) -> Result<SourceResponse, ConduitError> {
        self.called();
        if !self.writable {
            return Err(ConduitError::Unsupported(format!("{} is read-only", self.name)));
        }
        let removed = self.find_key(record).and_then(|key| self.data.remove(&key));
        Ok(match removed {
            Some((_, record)) => self
                .response(Action::Delete, Status::Finished)
                .with_record(record, self.resource_grade),
            None => self.not_found(Action::Delete),
        })
    }

    async fn search(&self, search_name: &str, params: &SearchParams) -> Result<SourceSearchResponse, ConduitError> {
        self.called();
        if !self.supports_search(search_name) {
            return Err(ConduitError::Unsupported(format!("search '{}'", search_name)));
        }
        let records: Vec<Record> = self
            .data
            .iter()
            .filter(|kv| params.iter().all(|(name, value)| kv.value().field(name) == Some(value)))
            .map(|kv| kv.value().clone())
            .collect();
        Ok(SourceSearchResponse {
            source: self.name.clone(),
            status: Status::Finished,
            records,
        })
    }

    fn supports_direct_create(&self, _record: &Record) -> bool {
        self.writable
    }

    fn supports_direct_update(&self, _record: &Record) -> bool {
        self.writable
    }

    fn supports_direct_delete(&self, _record: &Record) -> bool {
        self.writable
    }

    fn supports_search(&self, search_name: &str) -> bool {
        self.searches.iter().any(|s| s == search_name)
    }
}
