// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Record access engine.
//!
//! The [`RecordEngine`] is the caller-facing orchestrator for one record type.
//! It ties together:
//! - the identifier-indexed [`RecordCache`]
//! - the [`SourceController`] fan-out and its [`Aggregator`]
//! - the persisted [`IdentifierMappingStore`]
//!
//! # Read paths
//!
//! ```text
//! find_by_identifier: cache.get ──hit──► done
//!                          └─miss──► review every source ──► aggregate ──► cache.create + mapping
//!
//! read(id): cache.get_by_id ──hit──► done
//!              └─miss──► mapping ──none──► NotFound
//!                          ├─fresh──► review_by_id ──ok──────────────┐
//!                          └─stale or failed──► review_by_identifier ─┴► cache.sync
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use record_mediator::{
//!     BusinessIdentifier, DefaultRecordPolicy, InMemoryConduit, MediatorConfig, RecordEngine, SourceGrade,
//! };
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = MediatorConfig::default();
//! let engine = RecordEngine::from_config(Arc::new(DefaultRecordPolicy::new("Patient")), &config)
//!     .await
//!     .expect("mapping store");
//! engine.register_conduit(Arc::new(InMemoryConduit::new("pas", SourceGrade::Authoritative)));
//!
//! let outcome = engine.find_by_identifier(&BusinessIdentifier::new("MRN", "1234")).await;
//! println!("{}: {:?}", outcome.status, outcome.record);
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::aggregation::{Aggregator, PerFieldAggregator};
use crate::cache::{IdentifierCache, RecordCache};
use crate::conduit::{Conduit, SearchParams};
use crate::config::MediatorConfig;
use crate::controller::SourceController;
use crate::metrics::LatencyTimer;
use crate::outcome::{Action, Diagnostic, IssueCode, Status, TransactionOutcome};
use crate::record::{now_millis, BusinessIdentifier, Record, RecordPolicy};
use crate::storage::{IdentifierMappingStore, InMemoryMappingStore, RecordMapping, SqlMappingStore, StorageError};

pub struct RecordEngine {
    record_type: String,
    cache: Arc<dyn RecordCache>,
    controller: Arc<SourceController>,
    mappings: Arc<dyn IdentifierMappingStore>,
    mapping_refresh: Duration,
}

impl RecordEngine {
    /// Assemble an engine from its collaborators.
    pub fn new(
        cache: Arc<dyn RecordCache>,
        controller: Arc<SourceController>,
        mappings: Arc<dyn IdentifierMappingStore>,
        mapping_refresh: Duration,
    ) -> Self {
        Self {
            record_type: cache.record_type().to_string(),
            cache,
            controller,
            mappings,
            mapping_refresh,
        }
    }

    /// Build the default stack for `policy`'s record type: an
    /// [`IdentifierCache`], a [`PerFieldAggregator`], and a SQL mapping store
    /// when `mapping_sql_url` is set (in-memory otherwise).
    pub async fn from_config(policy: Arc<dyn RecordPolicy>, config: &MediatorConfig) -> Result<Self, StorageError> {
        let record_type = policy.record_type().to_string();
        let retirement = config.retirement_for(&record_type);

        let cache: Arc<dyn RecordCache> = Arc::new(IdentifierCache::new(policy, retirement));
        let aggregator: Arc<dyn Aggregator> = Arc::new(PerFieldAggregator::new(config.field_preferences.clone()));
        let controller = Arc::new(SourceController::new(
            record_type.clone(),
            aggregator,
            config.source_priorities.clone(),
        ));
        let mappings: Arc<dyn IdentifierMappingStore> = match config.mapping_sql_url {
            Some(ref url) => Arc::new(SqlMappingStore::connect(url).await?),
            None => Arc::new(InMemoryMappingStore::new()),
        };

        info!(
            record_type = %record_type,
            retirement_secs = retirement.as_secs(),
            sql_mappings = config.mapping_sql_url.is_some(),
            "Record engine configured"
        );
        Ok(Self::new(cache, controller, mappings, config.mapping_refresh()))
    }

    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    pub fn cache(&self) -> &Arc<dyn RecordCache> {
        &self.cache
    }

    pub fn controller(&self) -> &Arc<SourceController> {
        &self.controller
    }

    /// Register a backing source. Duplicate names are ignored.
    pub fn register_conduit(&self, conduit: Arc<dyn Conduit>) -> bool {
        self.controller.register(conduit)
    }

    fn location(&self, method: &str) -> String {
        format!("{}::engine::{}", self.record_type, method)
    }

    fn wrong_type(&self, action: Action, method: &str, found: &str) -> TransactionOutcome {
        TransactionOutcome::invalid_parameter(
            action,
            self.location(method),
            format!("Record type {} is not handled by the {} engine", found, self.record_type),
        )
    }

    fn finish(&self, operation: &str, outcome: TransactionOutcome) -> TransactionOutcome {
        crate::metrics::record_operation("engine", operation, &outcome.status.to_string());
        outcome
    }

    /// Persist a mapping. Failures are logged and reported as a warning
    /// diagnostic; they never fail the operation.
    async fn persist_mapping(&self, mapping: RecordMapping, outcome: &mut TransactionOutcome) {
        if let Err(e) = self.mappings.put(&mapping).await {
            warn!(local_id = %mapping.local_id, "Failed to persist id mapping: {}", e);
            crate::metrics::record_mapping_error("put");
            outcome.diagnostics.push(Diagnostic::warning(
                IssueCode::Exception,
                self.location("mapping"),
                format!("Id mapping for {} was not persisted: {}", mapping.local_id, e),
            ));
        }
    }

    /// Create a record in every source that accepts it, then cache the
    /// resolved record and persist its id mapping.
    #[tracing::instrument(skip(self, record), fields(record_type = %self.record_type))]
    pub async fn create(&self, mut record: Record) -> TransactionOutcome {
        let _timer = LatencyTimer::new("engine", "create");
        if record.record_type != self.record_type {
            let outcome = self.wrong_type(Action::Create, "create", &record.record_type);
            return self.finish("create", outcome);
        }

        let local_id = record.ensure_id();
        let mut outcome = self.controller.create_and_aggregate(&record).await;
        if !outcome.is_success() {
            debug!(%local_id, status = %outcome.status, "Source create did not succeed");
            return self.finish("create", outcome);
        }

        let mut resolved = outcome.record.clone().unwrap_or(record);
        if resolved.id.is_none() {
            resolved.id = Some(local_id.clone());
        }
        let resolved_id = resolved.ensure_id();
        if resolved_id != local_id {
            warn!(%local_id, %resolved_id, "Sources resolved the record to a different id");
        }

        self.persist_mapping(
            RecordMapping::new(resolved_id.clone(), self.record_type.clone(), resolved.identifiers.clone()),
            &mut outcome,
        )
        .await;

        let cached = self.cache.create(resolved.clone());
        if !cached.is_success() {
            warn!(id = %resolved_id, status = %cached.status, "Created record could not be cached");
        }

        outcome.id = Some(resolved_id);
        outcome.record = Some(resolved);
        self.finish("create", outcome)
    }

    /// Resolve a record by local id.
    #[tracing::instrument(skip(self), fields(record_type = %self.record_type))]
    pub async fn read(&self, id: &str) -> TransactionOutcome {
        let _timer = LatencyTimer::new("engine", "read");
        if id.trim().is_empty() {
            let outcome = TransactionOutcome::invalid_parameter(Action::Review, self.location("read"), "Parameter id is empty");
            return self.finish("read", outcome);
        }

        let cached = self.cache.get_by_id(id);
        if cached.is_success() {
            return self.finish("read", cached);
        }

        let mapping = match self.mappings.get(id).await {
            Ok(Some(mapping)) => mapping,
            Ok(None) => {
                let outcome = TransactionOutcome::not_found(Action::Review, self.location("read"), id).with_id(id);
                return self.finish("read", outcome);
            }
            Err(e) => {
                warn!(%id, "Id mapping lookup failed: {}", e);
                crate::metrics::record_mapping_error("get");
                let outcome = TransactionOutcome::new(Action::Review, Status::Failed)
                    .with_id(id)
                    .with_diagnostic(Diagnostic::error(
                        IssueCode::Exception,
                        self.location("read"),
                        format!("Id mapping lookup failed: {}", e),
                    ));
                return self.finish("read", outcome);
            }
        };

        let refresh_millis = i64::try_from(self.mapping_refresh.as_millis()).unwrap_or(i64::MAX);
        let fresh = mapping.age_millis(now_millis()) <= refresh_millis;

        let mut outcome = if fresh {
            self.controller.review_id_and_aggregate(id).await
        } else {
            debug!(%id, "Id mapping is stale, re-resolving by identifier");
            TransactionOutcome::new(Action::Review, Status::NotFound)
        };

        if !outcome.is_success() {
            let Some(identifier) = mapping.best_identifier().cloned() else {
                warn!(%id, "Id mapping carries no usable identifier");
                let outcome = TransactionOutcome::not_found(Action::Review, self.location("read"), id).with_id(id);
                return self.finish("read", outcome);
            };

            outcome = self.controller.review_identifier_and_aggregate(&identifier).await;
            if outcome.is_success() {
                let mut refreshed = RecordMapping::new(id, self.record_type.clone(), mapping.identifiers.clone());
                if let Some(ref record) = outcome.record {
                    for identifier in &record.identifiers {
                        if !refreshed.identifiers.contains(identifier) {
                            refreshed.identifiers.push(identifier.clone());
                        }
                    }
                }
                self.persist_mapping(refreshed, &mut outcome).await;
            }
        }

        if outcome.is_success() {
            if let Some(mut record) = outcome.record.take() {
                record.id = Some(id.to_string());
                let synced = self.cache.sync(record.clone());
                outcome = outcome.with_id(id).with_record(synced.record.unwrap_or(record));
            }
        }

        self.finish("read", outcome)
    }

    /// Update the record in every source that accepts it, mirroring the
    /// result into the cache.
    #[tracing::instrument(skip(self, record), fields(record_type = %self.record_type))]
    pub async fn update(&self, record: Record) -> TransactionOutcome {
        let _timer = LatencyTimer::new("engine", "update");
        if record.record_type != self.record_type {
            let outcome = self.wrong_type(Action::Update, "update", &record.record_type);
            return self.finish("update", outcome);
        }

        let mut outcome = self.controller.update_and_aggregate(&record).await;
        if !outcome.is_success() {
            return self.finish("update", outcome);
        }

        let mut resolved = outcome.record.clone().unwrap_or(record);
        let id = resolved.ensure_id();
        let cached = self.cache.update(resolved.clone());
        if !cached.is_success() {
            warn!(%id, status = %cached.status, "Updated record could not be cached");
        }

        self.persist_mapping(
            RecordMapping::new(id.clone(), self.record_type.clone(), resolved.identifiers.clone()),
            &mut outcome,
        )
        .await;

        outcome.id = Some(id);
        outcome.record = Some(resolved);
        self.finish("update", outcome)
    }

    /// Delete the record from every source that accepts it, then drop it (and
    /// its aliases) from the cache and remove its id mapping.
    #[tracing::instrument(skip(self, record), fields(record_type = %self.record_type))]
    pub async fn delete(&self, record: Record) -> TransactionOutcome {
        let _timer = LatencyTimer::new("engine", "delete");
        if record.record_type != self.record_type {
            let outcome = self.wrong_type(Action::Delete, "delete", &record.record_type);
            return self.finish("delete", outcome);
        }

        let mut outcome = self.controller.delete_and_aggregate(&record).await;
        if !outcome.is_success() {
            return self.finish("delete", outcome);
        }

        let cached = self.cache.delete(&record);
        if cached.status != Status::Finished {
            debug!(status = %cached.status, "Deleted record was not cached");
        }

        let id = record.id.clone().or_else(|| outcome.id.clone()).or(cached.id);
        if let Some(ref id) = id {
            if let Err(e) = self.mappings.remove(id).await {
                warn!(%id, "Failed to remove id mapping: {}", e);
                crate::metrics::record_mapping_error("remove");
            }
            outcome.id = Some(id.clone());
        }
        outcome.diagnostics.push(Diagnostic::info(self.location("delete"), "This record has been deleted"));
        self.finish("delete", outcome)
    }

    /// Resolve a record by business identifier: cache first, then every source.
    #[tracing::instrument(skip(self, identifier), fields(record_type = %self.record_type, identifier = %identifier))]
    pub async fn find_by_identifier(&self, identifier: &BusinessIdentifier) -> TransactionOutcome {
        let _timer = LatencyTimer::new("engine", "find_by_identifier");

        let cached = self.cache.get(identifier);
        if cached.status != Status::NotFound {
            // Hit, or an invalid identifier
            return self.finish("find_by_identifier", cached);
        }

        let mut outcome = self.controller.review_identifier_and_aggregate(identifier).await;
        if !outcome.is_success() {
            return self.finish("find_by_identifier", outcome);
        }
        let Some(mut record) = outcome.record.take() else {
            return self.finish("find_by_identifier", outcome);
        };

        let id = record.ensure_id();
        record.add_identifier(identifier.clone());

        let created = self.cache.create(record.clone());
        let record = created.record.clone().unwrap_or(record);
        let id = record.id.clone().unwrap_or(id);
        debug!(%id, status = %created.status, "Cached record resolved from sources");

        self.persist_mapping(
            RecordMapping::new(id.clone(), self.record_type.clone(), record.identifiers.clone()),
            &mut outcome,
        )
        .await;

        outcome.identifier = Some(identifier.clone());
        outcome.id = Some(id);
        outcome.record = Some(record);
        self.finish("find_by_identifier", outcome)
    }

    /// Run a named search against every source that supports it. Results are
    /// synced into the cache.
    #[tracing::instrument(skip(self, params), fields(engine_type = %self.record_type))]
    pub async fn search_by_criteria(
        &self,
        record_type: &str,
        search_name: &str,
        params: &SearchParams,
    ) -> TransactionOutcome {
        let _timer = LatencyTimer::new("engine", "search");
        if record_type != self.record_type {
            let outcome = self.wrong_type(Action::Search, "search_by_criteria", record_type);
            return self.finish("search", outcome);
        }

        let outcome = self.controller.search_and_aggregate(search_name, params).await;
        if outcome.is_success() {
            if let Some(ref bundle) = outcome.bundle {
                for entry in &bundle.entries {
                    let synced = self.cache.sync(entry.clone());
                    if !synced.is_success() {
                        debug!(status = %synced.status, "Search result not cached");
                    }
                }
            }
        }
        self.finish("search", outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conduit::{InMemoryConduit, SourceGrade};
    use crate::record::{DefaultRecordPolicy, IdentifierUse};
    use serde_json::json;

    async fn engine() -> RecordEngine {
        RecordEngine::from_config(Arc::new(DefaultRecordPolicy::new("Patient")), &MediatorConfig::default())
            .await
            .unwrap()
    }

    fn mrn() -> BusinessIdentifier {
        BusinessIdentifier::new("MRN", "1234").with_use(IdentifierUse::Official)
    }

    fn patient() -> Record {
        Record::new("Patient")
            .with_identifier(mrn())
            .with_field("name", json!("Ada"))
    }

    #[tokio::test]
    async fn test_create_caches_and_maps() {
        let engine = engine().await;
        let pas = Arc::new(InMemoryConduit::new("pas", SourceGrade::Authoritative));
        engine.register_conduit(pas.clone());

        let outcome = engine.create(patient()).await;
        assert_eq!(outcome.status, Status::Finished);
        assert!(outcome.created);
        let id = outcome.id.clone().unwrap();
        assert!(id.starts_with("Patient:"));
        assert_eq!(pas.len(), 1);

        assert_eq!(engine.cache().get(&mrn()).status, Status::Finished);
        assert_eq!(engine.read(&id).await.status, Status::Finished);
    }

    #[tokio::test]
    async fn test_create_rejects_other_record_type() {
        let engine = engine().await;
        let outcome = engine.create(Record::new("Location").with_identifier(mrn())).await;
        assert_eq!(outcome.status, Status::InvalidParameter);
    }

    #[tokio::test]
    async fn test_create_with_no_conduits_is_invalid() {
        let engine = engine().await;
        let outcome = engine.create(patient()).await;
        assert_eq!(outcome.status, Status::InvalidParameter);
        assert!(engine.cache().get_all().is_empty());
    }

    #[tokio::test]
    async fn test_read_unknown_id_is_not_found() {
        let engine = engine().await;
        assert_eq!(engine.read("Patient:unknown").await.status, Status::NotFound);
        assert_eq!(engine.read("").await.status, Status::InvalidParameter);
    }

    #[tokio::test]
    async fn test_read_after_eviction_goes_to_sources() {
        let mut config = MediatorConfig::default();
        config.retirement_secs = 0;
        let engine = RecordEngine::from_config(Arc::new(DefaultRecordPolicy::new("Patient")), &config)
            .await
            .unwrap();
        let pas = Arc::new(InMemoryConduit::new("pas", SourceGrade::Authoritative));
        engine.register_conduit(pas.clone());

        let id = engine.create(patient()).await.id.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        engine.cache().purge();

        let calls_before = pas.call_count();
        let outcome = engine.read(&id).await;
        assert_eq!(outcome.status, Status::Finished);
        assert_eq!(outcome.id.as_deref(), Some(id.as_str()));
        assert!(pas.call_count() > calls_before);
    }

    #[tokio::test]
    async fn test_stale_mapping_resolves_by_identifier() {
        let mut config = MediatorConfig::default();
        config.mapping_refresh_secs = 0;
        config.retirement_secs = 0;
        let engine = RecordEngine::from_config(Arc::new(DefaultRecordPolicy::new("Patient")), &config)
            .await
            .unwrap();

        // The source knows the record under its own id only
        let pas = Arc::new(InMemoryConduit::new("pas", SourceGrade::Authoritative));
        pas.insert(patient().with_id("pas:99"));
        engine.register_conduit(pas);

        let mut mapping = RecordMapping::new("Patient:local", "Patient", vec![mrn()]);
        mapping.updated_at -= 10_000;
        engine.mappings.put(&mapping).await.unwrap();

        let outcome = engine.read("Patient:local").await;
        assert_eq!(outcome.status, Status::Finished);
        assert_eq!(outcome.record.unwrap().id.as_deref(), Some("Patient:local"));

        let refreshed = engine.mappings.get("Patient:local").await.unwrap().unwrap();
        assert!(refreshed.updated_at > mapping.updated_at);
    }

    #[tokio::test]
    async fn test_update_and_delete_mirror_into_cache() {
        let engine = engine().await;
        engine.register_conduit(Arc::new(InMemoryConduit::new("pas", SourceGrade::Authoritative)));

        let created = engine.create(patient()).await;
        let id = created.id.unwrap();

        let changed = patient().with_id(id.clone()).with_field("name", json!("Ada Lovelace"));
        let updated = engine.update(changed.clone()).await;
        assert_eq!(updated.status, Status::Finished);
        let cached = engine.cache().get(&mrn()).record.unwrap();
        assert_eq!(cached.field("name"), Some(&json!("Ada Lovelace")));

        let deleted = engine.delete(changed).await;
        assert_eq!(deleted.status, Status::Finished);
        assert_eq!(engine.cache().get(&mrn()).status, Status::NotFound);
        assert!(engine.mappings.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_syncs_results_into_cache() {
        let engine = engine().await;
        let pas = Arc::new(InMemoryConduit::new("pas", SourceGrade::Authoritative).with_search("by-name"));
        pas.insert(patient());
        engine.register_conduit(pas);

        let mut params = SearchParams::new();
        params.insert("name".into(), json!("Ada"));
        let outcome = engine.search_by_criteria("Patient", "by-name", &params).await;
        assert_eq!(outcome.bundle.unwrap().total, 1);
        assert_eq!(engine.cache().get(&mrn()).status, Status::Finished);

        let wrong = engine.search_by_criteria("Location", "by-name", &params).await;
        assert_eq!(wrong.status, Status::InvalidParameter);
    }
}
