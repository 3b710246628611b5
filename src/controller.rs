//! Fan-out over the conduits registered for one record type.
//!
//! Every operation is dispatched to all (supporting) conduits concurrently on a
//! [`JoinSet`]. Responses come back in registration order no matter which
//! conduit finishes first, and one conduit failing or panicking never stops
//! the others from answering.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::aggregation::Aggregator;
use crate::conduit::{Conduit, ConduitError, SearchParams, SourceGrade, SourceResponse, SourceSearchResponse};
use crate::config::DEFAULT_SOURCE_PRIORITY;
use crate::outcome::{Action, TransactionOutcome};
use crate::record::{BusinessIdentifier, Record};

pub struct SourceController {
    record_type: String,
    conduits: RwLock<Vec<Arc<dyn Conduit>>>,
    aggregator: Arc<dyn Aggregator>,
    priorities: HashMap<String, i32>,
}

impl SourceController {
    pub fn new(
        record_type: impl Into<String>,
        aggregator: Arc<dyn Aggregator>,
        priorities: HashMap<String, i32>,
    ) -> Self {
        Self {
            record_type: record_type.into(),
            conduits: RwLock::new(Vec::new()),
            aggregator,
            priorities,
        }
    }

    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    /// Register a conduit. Returns false if one with the same name is already registered.
    pub fn register(&self, conduit: Arc<dyn Conduit>) -> bool {
        let mut conduits = self.conduits.write();
        if conduits.iter().any(|c| c.name() == conduit.name()) {
            warn!(record_type = %self.record_type, conduit = conduit.name(), "Conduit already registered, ignoring");
            return false;
        }
        info!(record_type = %self.record_type, conduit = conduit.name(), "Registered conduit");
        conduits.push(conduit);
        true
    }

    #[must_use]
    pub fn conduit_count(&self) -> usize {
        self.conduits.read().len()
    }

    fn priority_of(&self, source: &str) -> i32 {
        self.priorities.get(source).copied().unwrap_or(DEFAULT_SOURCE_PRIORITY)
    }

    fn snapshot(&self) -> Vec<Arc<dyn Conduit>> {
        self.conduits.read().clone()
    }

    /// Run `call` against each conduit concurrently and collect the results in
    /// the order the conduits were given. Errors and panics come back as `Err`.
    async fn dispatch<T, F, Fut>(
        &self,
        operation: &'static str,
        conduits: Vec<Arc<dyn Conduit>>,
        call: F,
    ) -> Vec<(String, Result<T, ConduitError>)>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn Conduit>) -> Fut,
        Fut: Future<Output = Result<T, ConduitError>> + Send + 'static,
    {
        let names: Vec<String> = conduits.iter().map(|c| c.name().to_string()).collect();
        let mut slots: Vec<Option<Result<T, ConduitError>>> = names.iter().map(|_| None).collect();

        let mut join_set: JoinSet<(usize, Result<T, ConduitError>)> = JoinSet::new();
        for (i, conduit) in conduits.into_iter().enumerate() {
            let fut = call(conduit);
            join_set.spawn(async move { (i, fut.await) });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((i, result)) => slots[i] = Some(result),
                // The slot of a panicked task stays empty and is reported below
                Err(join_error) => error!(operation, "Conduit task failed: {}", join_error),
            }
        }

        names
            .into_iter()
            .zip(slots)
            .map(|(name, slot)| {
                let result = slot.unwrap_or_else(|| Err(ConduitError::Unavailable(format!("{} task panicked", name))));
                let label = if result.is_ok() { "ok" } else { "error" };
                crate::metrics::record_conduit_call(&name, operation, label);
                (name, result)
            })
            .collect()
    }

    /// Stamp priorities; turn write errors into failure responses.
    fn collect_writes(
        &self,
        action: Action,
        results: Vec<(String, Result<SourceResponse, ConduitError>)>,
        grades: &HashMap<String, SourceGrade>,
    ) -> Vec<SourceResponse> {
        results
            .into_iter()
            .map(|(name, result)| {
                let mut response = match result {
                    Ok(response) => response,
                    Err(e) => {
                        warn!(conduit = %name, %action, "Conduit write failed: {}", e);
                        let grade = grades.get(&name).copied().unwrap_or(SourceGrade::NonAuthoritative);
                        SourceResponse::failed(name.clone(), action, grade, e.to_string())
                    }
                };
                response.priority = self.priority_of(&response.source);
                response
            })
            .collect()
    }

    /// Stamp priorities; log and drop errors.
    fn collect_reads(&self, results: Vec<(String, Result<SourceResponse, ConduitError>)>) -> Vec<SourceResponse> {
        results
            .into_iter()
            .filter_map(|(name, result)| match result {
                Ok(mut response) => {
                    response.priority = self.priority_of(&response.source);
                    Some(response)
                }
                Err(e) => {
                    warn!(conduit = %name, "Conduit review failed: {}", e);
                    None
                }
            })
            .collect()
    }

    async fn write(&self, action: Action, record: &Record) -> Vec<SourceResponse> {
        let conduits: Vec<Arc<dyn Conduit>> = self
            .snapshot()
            .into_iter()
            .filter(|c| match action {
                Action::Create => c.supports_direct_create(record),
                Action::Update => c.supports_direct_update(record),
                Action::Delete => c.supports_direct_delete(record),
                _ => false,
            })
            .collect();

        let grades: HashMap<String, SourceGrade> = conduits
            .iter()
            .map(|c| (c.name().to_string(), c.source_grade()))
            .collect();
        let operation = match action {
            Action::Create => "create",
            Action::Update => "update",
            _ => "delete",
        };

        let results = self
            .dispatch(operation, conduits, |conduit| {
                let record = record.clone();
                async move {
                    match action {
                        Action::Create => conduit.create_record(&record).await,
                        Action::Update => conduit.update_record(&record).await,
                        _ => conduit.delete_record(&record).await,
                    }
                }
            })
            .await;

        let responses = self.collect_writes(action, results, &grades);
        debug!(record_type = %self.record_type, %action, responses = responses.len(), "Collected write responses");
        responses
    }

    /// Dispatch a create to every conduit that accepts it directly.
    pub async fn create(&self, record: &Record) -> Vec<SourceResponse> {
        self.write(Action::Create, record).await
    }

    pub async fn update(&self, record: &Record) -> Vec<SourceResponse> {
        self.write(Action::Update, record).await
    }

    pub async fn delete(&self, record: &Record) -> Vec<SourceResponse> {
        self.write(Action::Delete, record).await
    }

    /// Review every source by business identifier, keeping only successful
    /// responses that carry a record.
    pub async fn review_by_identifier(&self, identifier: &BusinessIdentifier) -> Vec<SourceResponse> {
        let results = self
            .dispatch("review_by_identifier", self.snapshot(), |conduit| {
                let identifier = identifier.clone();
                async move { conduit.review_by_identifier(&identifier).await }
            })
            .await;

        self.collect_reads(results)
            .into_iter()
            .filter(|r| r.record.is_some() && r.status.is_success())
            .collect()
    }

    /// Review every source by local id, keeping only responses graded better than empty.
    pub async fn review_by_id(&self, id: &str) -> Vec<SourceResponse> {
        let results = self
            .dispatch("review_by_id", self.snapshot(), |conduit| {
                let id = id.to_string();
                async move { conduit.review_by_id(&id).await }
            })
            .await;

        self.collect_reads(results)
            .into_iter()
            .filter(SourceResponse::has_content)
            .collect()
    }

    /// Run a named search on every conduit that supports it.
    pub async fn search(&self, search_name: &str, params: &SearchParams) -> Vec<SourceSearchResponse> {
        let conduits: Vec<Arc<dyn Conduit>> = self
            .snapshot()
            .into_iter()
            .filter(|c| c.supports_search(search_name))
            .collect();

        let results = self
            .dispatch("search", conduits, |conduit| {
                let search_name = search_name.to_string();
                let params = params.clone();
                async move { conduit.search(&search_name, &params).await }
            })
            .await;

        results
            .into_iter()
            .filter_map(|(name, result)| match result {
                Ok(response) => Some(response),
                Err(e) => {
                    warn!(conduit = %name, search = search_name, "Conduit search failed: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Fan out a create and aggregate the responses.
    pub async fn create_and_aggregate(&self, record: &Record) -> TransactionOutcome {
        let responses = self.create(record).await;
        self.aggregator.aggregate_create(responses)
    }

    pub async fn update_and_aggregate(&self, record: &Record) -> TransactionOutcome {
        let responses = self.update(record).await;
        self.aggregator.aggregate_update(responses)
    }

    pub async fn delete_and_aggregate(&self, record: &Record) -> TransactionOutcome {
        let responses = self.delete(record).await;
        self.aggregator.aggregate_delete(responses)
    }

    /// Review by identifier and aggregate. With no usable response the outcome
    /// is a terminal not-found and aggregation is skipped.
    pub async fn review_identifier_and_aggregate(&self, identifier: &BusinessIdentifier) -> TransactionOutcome {
        let responses = self.review_by_identifier(identifier).await;
        if responses.is_empty() {
            debug!(record_type = %self.record_type, %identifier, "No source holds identifier");
            return TransactionOutcome::not_found(
                Action::Review,
                format!("{}::controller::review_by_identifier", self.record_type),
                identifier,
            )
            .with_identifier(identifier.clone());
        }
        self.aggregator.aggregate_review(responses)
    }

    pub async fn review_id_and_aggregate(&self, id: &str) -> TransactionOutcome {
        let responses = self.review_by_id(id).await;
        if responses.is_empty() {
            return TransactionOutcome::not_found(
                Action::Review,
                format!("{}::controller::review_by_id", self.record_type),
                id,
            )
            .with_id(id);
        }
        self.aggregator.aggregate_review(responses)
    }

    pub async fn search_and_aggregate(&self, search_name: &str, params: &SearchParams) -> TransactionOutcome {
        let responses = self.search(search_name, params).await;
        self.aggregator.aggregate_search(&self.record_type, responses)
    }
}
