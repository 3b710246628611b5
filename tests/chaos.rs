//! Failure injection for the fan-out and aggregation path.
//!
//! Conduits are wrapped so they fail at chosen call counts, fail forever,
//! stall, or panic. The engine must keep answering from the healthy sources
//! and report write failures instead of hiding them.
//!
//! Run with: `cargo test --test chaos`

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use record_mediator::{
    Aggregator, BusinessIdentifier, Conduit, ConduitError, DefaultRecordPolicy, IdentifierCache,
    IdentifierMappingStore, IdentifierUse, InMemoryConduit, InMemoryMappingStore, MediatorConfig,
    PerFieldAggregator, Record, RecordCache, RecordEngine, RecordMapping, SearchParams, Severity, SourceController,
    SourceGrade, SourceResponse, SourceSearchResponse, Status, StorageError,
};

// =============================================================================
// Failing Conduit Wrapper
// =============================================================================

#[derive(Clone, Copy)]
enum Fault {
    Error,
    Panic,
    Stall(Duration),
}

/// Wraps a conduit and injects a fault on chosen calls (1-indexed).
struct FailingConduit<C: Conduit> {
    inner: C,
    calls: AtomicU64,
    fail_on_calls: Vec<u64>,
    fail_from: Option<u64>,
    fault: Fault,
}

impl<C: Conduit> FailingConduit<C> {
    fn new(inner: C, fail_on_calls: Vec<u64>, fault: Fault) -> Self {
        Self {
            inner,
            calls: AtomicU64::new(0),
            fail_on_calls,
            fail_from: None,
            fault,
        }
    }

    /// Fail every call after the first `n`.
    fn fail_after(inner: C, n: u64, fault: Fault) -> Self {
        let mut conduit = Self::new(inner, vec![], fault);
        conduit.fail_from = Some(n + 1);
        conduit
    }

    async fn maybe_fail(&self) -> Result<(), ConduitError> {
        let count = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let fail = self.fail_on_calls.contains(&count) || self.fail_from.is_some_and(|from| count >= from);
        if !fail {
            return Ok(());
        }
        match self.fault {
            Fault::Error => Err(ConduitError::Unavailable(format!("injected failure on call {}", count))),
            Fault::Panic => panic!("injected panic on call {}", count),
            Fault::Stall(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl<C: Conduit> Conduit for FailingConduit<C> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn source_grade(&self) -> SourceGrade {
        self.inner.source_grade()
    }

    async fn create_record(&self, record: &Record) -> Result<SourceResponse, ConduitError> {
        self.maybe_fail().await?;
        self.inner.create_record(record).await
    }

    async fn review_by_id(&self, id: &str) -> Result<SourceResponse, ConduitError> {
        self.maybe_fail().await?;
        self.inner.review_by_id(id).await
    }

    async fn review_by_identifier(&self, identifier: &BusinessIdentifier) -> Result<SourceResponse, ConduitError> {
        self.maybe_fail().await?;
        self.inner.review_by_identifier(identifier).await
    }

    async fn update_record(&self, record: &Record) -> Result<SourceResponse, ConduitError> {
        self.maybe_fail().await?;
        self.inner.update_record(record).await
    }

    async fn delete_record(&self, record: &Record) -> Result<SourceResponse, ConduitError> {
        self.maybe_fail().await?;
        self.inner.delete_record(record).await
    }

    async fn search(&self, search_name: &str, params: &SearchParams) -> Result<SourceSearchResponse, ConduitError> {
        self.maybe_fail().await?;
        self.inner.search(search_name, params).await
    }

    fn supports_search(&self, search_name: &str) -> bool {
        self.inner.supports_search(search_name)
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn mrn() -> BusinessIdentifier {
    BusinessIdentifier::new("MRN", "1234").with_use(IdentifierUse::Official)
}

fn patient(phone: &str) -> Record {
    Record::new("Patient")
        .with_identifier(mrn())
        .with_field("phone", json!(phone))
}

async fn engine() -> RecordEngine {
    RecordEngine::from_config(Arc::new(DefaultRecordPolicy::new("Patient")), &MediatorConfig::default())
        .await
        .expect("engine")
}

fn seeded(name: &str, grade: SourceGrade, phone: &str) -> InMemoryConduit {
    let conduit = InMemoryConduit::new(name, grade).with_search("by-phone");
    conduit.insert(patient(phone));
    conduit
}

// =============================================================================
// Reads survive failing sources
// =============================================================================

#[tokio::test]
async fn test_review_survives_erroring_authoritative_source() {
    let engine = engine().await;
    engine.register_conduit(Arc::new(FailingConduit::fail_after(
        seeded("pas", SourceGrade::Authoritative, "111"),
        0,
        Fault::Error,
    )));
    engine.register_conduit(Arc::new(seeded("switchboard", SourceGrade::NonAuthoritative, "222")));

    let outcome = engine.find_by_identifier(&mrn()).await;
    assert_eq!(outcome.status, Status::Finished);
    assert_eq!(outcome.record.unwrap().field("phone"), Some(&json!("222")));
}

#[tokio::test]
async fn test_review_survives_panicking_source() {
    let engine = engine().await;
    engine.register_conduit(Arc::new(FailingConduit::new(
        seeded("pas", SourceGrade::Authoritative, "111"),
        vec![1],
        Fault::Panic,
    )));
    engine.register_conduit(Arc::new(seeded("switchboard", SourceGrade::NonAuthoritative, "222")));

    let outcome = engine.find_by_identifier(&mrn()).await;
    assert_eq!(outcome.status, Status::Finished);
    assert_eq!(outcome.record.unwrap().field("phone"), Some(&json!("222")));
}

#[tokio::test]
async fn test_all_sources_failing_is_not_found() {
    let engine = engine().await;
    for name in ["a", "b", "c"] {
        engine.register_conduit(Arc::new(FailingConduit::fail_after(
            seeded(name, SourceGrade::Authoritative, "111"),
            0,
            Fault::Error,
        )));
    }

    let outcome = engine.find_by_identifier(&mrn()).await;
    assert_eq!(outcome.status, Status::NotFound);
    assert!(engine.cache().get_all().is_empty());
}

#[tokio::test]
async fn test_stalled_source_keeps_registration_order_and_precedence() {
    let engine = engine().await;
    engine.register_conduit(Arc::new(FailingConduit::fail_after(
        seeded("pas", SourceGrade::Authoritative, "111"),
        0,
        Fault::Stall(Duration::from_millis(50)),
    )));
    engine.register_conduit(Arc::new(seeded("switchboard", SourceGrade::NonAuthoritative, "222")));

    let responses = engine.controller().review_by_identifier(&mrn()).await;
    let sources: Vec<&str> = responses.iter().map(|r| r.source.as_str()).collect();
    assert_eq!(sources, vec!["pas", "switchboard"]);

    let outcome = engine.find_by_identifier(&mrn()).await;
    assert_eq!(outcome.record.unwrap().field("phone"), Some(&json!("111")));
}

#[tokio::test]
async fn test_intermittent_failure_then_recovery() {
    let engine = engine().await;

    // First call fails, later calls succeed
    engine.register_conduit(Arc::new(FailingConduit::new(
        seeded("pas", SourceGrade::Authoritative, "111"),
        vec![1],
        Fault::Error,
    )));

    assert_eq!(engine.find_by_identifier(&mrn()).await.status, Status::NotFound);
    let recovered = engine.find_by_identifier(&mrn()).await;
    assert_eq!(recovered.status, Status::Finished);
}

// =============================================================================
// Writes report failures
// =============================================================================

#[tokio::test]
async fn test_write_failure_short_circuits_and_skips_cache() {
    let engine = engine().await;
    engine.register_conduit(Arc::new(InMemoryConduit::new("pas", SourceGrade::Authoritative)));
    engine.register_conduit(Arc::new(FailingConduit::fail_after(
        InMemoryConduit::new("switchboard", SourceGrade::NonAuthoritative),
        0,
        Fault::Error,
    )));

    let outcome = engine.create(patient("111")).await;
    assert_eq!(outcome.status, Status::Failed);
    assert!(outcome.diagnostics[0].location.starts_with("switchboard"));
    assert!(engine.cache().get_all().is_empty());
}

#[tokio::test]
async fn test_write_panic_is_reported_as_failure() {
    let engine = engine().await;
    engine.register_conduit(Arc::new(InMemoryConduit::new("pas", SourceGrade::Authoritative)));
    engine.register_conduit(Arc::new(FailingConduit::new(
        InMemoryConduit::new("switchboard", SourceGrade::NonAuthoritative),
        vec![1],
        Fault::Panic,
    )));

    let outcome = engine.create(patient("111")).await;
    assert_eq!(outcome.status, Status::Failed);
}

#[tokio::test]
async fn test_search_drops_failing_source() {
    let engine = engine().await;
    engine.register_conduit(Arc::new(seeded("pas", SourceGrade::Authoritative, "111")));
    engine.register_conduit(Arc::new(FailingConduit::fail_after(
        seeded("switchboard", SourceGrade::NonAuthoritative, "111"),
        0,
        Fault::Error,
    )));

    let mut params = SearchParams::new();
    params.insert("phone".into(), json!("111"));
    let outcome = engine.search_by_criteria("Patient", "by-phone", &params).await;

    // Only one source answered, so its results form the bundle
    assert_eq!(outcome.status, Status::Finished);
    assert_eq!(outcome.bundle.unwrap().total, 1);
}

// =============================================================================
// Failing Mapping Store Wrapper
// =============================================================================

/// Mapping store whose operations fail on demand.
struct FailingMappingStore {
    inner: InMemoryMappingStore,
    fail_puts: bool,
    fail_gets: bool,
    puts: AtomicU64,
}

impl FailingMappingStore {
    fn new(fail_puts: bool, fail_gets: bool) -> Self {
        Self {
            inner: InMemoryMappingStore::new(),
            fail_puts,
            fail_gets,
            puts: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl IdentifierMappingStore for FailingMappingStore {
    async fn put(&self, mapping: &RecordMapping) -> Result<(), StorageError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts {
            return Err(StorageError::Backend("injected put failure".into()));
        }
        self.inner.put(mapping).await
    }

    async fn get(&self, local_id: &str) -> Result<Option<RecordMapping>, StorageError> {
        if self.fail_gets {
            return Err(StorageError::Backend("injected get failure".into()));
        }
        self.inner.get(local_id).await
    }

    async fn remove(&self, local_id: &str) -> Result<(), StorageError> {
        if self.fail_puts {
            return Err(StorageError::Backend("injected remove failure".into()));
        }
        self.inner.remove(local_id).await
    }
}

fn engine_with_store(store: Arc<FailingMappingStore>, retirement: Duration) -> RecordEngine {
    let cache: Arc<dyn RecordCache> = Arc::new(IdentifierCache::new(
        Arc::new(DefaultRecordPolicy::new("Patient")),
        retirement,
    ));
    let aggregator: Arc<dyn Aggregator> = Arc::new(PerFieldAggregator::new(Default::default()));
    let controller = Arc::new(SourceController::new("Patient", aggregator, Default::default()));
    RecordEngine::new(cache, controller, store, Duration::from_secs(300))
}

// =============================================================================
// Mapping persistence failures
// =============================================================================

#[tokio::test]
async fn test_mapping_put_failure_only_warns() {
    let store = Arc::new(FailingMappingStore::new(true, false));
    let engine = engine_with_store(store.clone(), Duration::from_secs(60));
    engine.register_conduit(Arc::new(InMemoryConduit::new("pas", SourceGrade::Authoritative)));

    let outcome = engine.create(patient("111")).await;
    assert_eq!(outcome.status, Status::Finished);
    assert_eq!(store.puts.load(Ordering::SeqCst), 1);
    assert!(outcome.diagnostics.iter().any(|d| d.severity == Severity::Warning));

    // The record is still cached and readable
    let id = outcome.id.unwrap();
    assert_eq!(engine.read(&id).await.status, Status::Finished);
}

#[tokio::test]
async fn test_mapping_delete_failure_does_not_fail_delete() {
    let store = Arc::new(FailingMappingStore::new(true, false));
    let engine = engine_with_store(store, Duration::from_secs(60));
    engine.register_conduit(Arc::new(InMemoryConduit::new("pas", SourceGrade::Authoritative)));

    let id = engine.create(patient("111")).await.id.unwrap();
    let deleted = engine.delete(patient("111").with_id(id)).await;
    assert_eq!(deleted.status, Status::Finished);
    assert!(engine.cache().get_all().is_empty());
}

#[tokio::test]
async fn test_mapping_get_failure_fails_uncached_read() {
    let store = Arc::new(FailingMappingStore::new(false, true));
    let engine = engine_with_store(store, Duration::ZERO);
    engine.register_conduit(Arc::new(InMemoryConduit::new("pas", SourceGrade::Authoritative)));

    let id = engine.create(patient("111")).await.id.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let outcome = engine.read(&id).await;
    assert_eq!(outcome.status, Status::Failed);
    assert_eq!(outcome.diagnostics[0].severity, Severity::Error);
}
