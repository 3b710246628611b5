//! Backing-source conduits.
//!
//! A conduit is the mediator's view of one source of truth for one record
//! type. It performs the operation against its source and reports a graded,
//! source-attributed [`SourceResponse`]. How it reaches the source is its own
//! business.
//!
//! - [`Conduit`]: the capability trait
//! - [`InMemoryConduit`]: `DashMap`-backed reference implementation

mod memory;

pub use memory::InMemoryConduit;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::outcome::{Action, Diagnostic, IssueCode, Status, TransactionOutcome};
use crate::record::{BusinessIdentifier, Record};

/// Named search parameters, ordered by name.
pub type SearchParams = BTreeMap<String, serde_json::Value>;

#[derive(Error, Debug)]
pub enum ConduitError {
    #[error("Source unavailable: {0}")]
    Unavailable(String),
    #[error("Source rejected the request: {0}")]
    Rejected(String),
    #[error("Operation not supported by source: {0}")]
    Unsupported(String),
}

/// How complete the record a source returned is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceGrade {
    Empty,
    Partial,
    Thorough,
}

/// How far a source is trusted. Declaration order is precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceGrade {
    Authoritative,
    PartiallyAuthoritative,
    NonAuthoritative,
}

/// One source's answer to a create/review/update/delete.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceResponse {
    pub source: String,
    pub action: Action,
    pub status: Status,
    pub resource_grade: ResourceGrade,
    pub source_grade: SourceGrade,
    /// Tie-break within a source grade (lower wins), stamped by the controller
    pub priority: i32,
    pub identifier: Option<BusinessIdentifier>,
    pub record: Option<Record>,
    pub diagnostics: Vec<Diagnostic>,
}

impl SourceResponse {
    pub fn new(source: impl Into<String>, action: Action, status: Status, source_grade: SourceGrade) -> Self {
        Self {
            source: source.into(),
            action,
            status,
            resource_grade: ResourceGrade::Empty,
            source_grade,
            priority: crate::config::DEFAULT_SOURCE_PRIORITY,
            identifier: None,
            record: None,
            diagnostics: Vec::new(),
        }
    }

    /// A failed operation attributed to `source`.
    pub fn failed(source: impl Into<String>, action: Action, source_grade: SourceGrade, text: impl Into<String>) -> Self {
        let source = source.into();
        let location = format!("{}::{}", source, action);
        let mut response = Self::new(source, action, Status::Failed, source_grade);
        response
            .diagnostics
            .push(Diagnostic::error(IssueCode::Exception, location, text));
        response
    }

    /// Attach the returned record; the identifier defaults to its best one.
    #[must_use]
    pub fn with_record(mut self, record: Record, grade: ResourceGrade) -> Self {
        if self.identifier.is_none() {
            self.identifier = record.best_identifier().cloned();
        }
        self.record = Some(record);
        self.resource_grade = grade;
        self
    }

    #[must_use]
    pub fn with_identifier(mut self, identifier: BusinessIdentifier) -> Self {
        self.identifier = Some(identifier);
        self
    }

    /// Carries a record graded better than empty.
    #[must_use]
    pub fn has_content(&self) -> bool {
        self.record.is_some() && self.resource_grade != ResourceGrade::Empty
    }

    /// Convert to the caller-facing outcome, keeping diagnostics.
    pub fn into_outcome(self) -> TransactionOutcome {
        let mut outcome = TransactionOutcome::new(self.action, self.status);
        outcome.identifier = self.identifier;
        outcome.diagnostics = self.diagnostics;
        if let Some(record) = self.record {
            outcome = outcome.with_record(record);
        }
        outcome
    }
}

/// One source's answer to a named search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSearchResponse {
    pub source: String,
    pub status: Status,
    pub records: Vec<Record>,
}

/// A backing source of truth for one record type.
///
/// Implementations report source-side outcomes (not found, rejected) through
/// the response status and reserve `Err` for failures to reach the source.
#[async_trait]
pub trait Conduit: Send + Sync {
    /// Unique source name, used for attribution and configuration lookups.
    fn name(&self) -> &str;

    /// Trust grade of this source. Failures the controller synthesizes for a
    /// conduit are attributed with it.
    fn source_grade(&self) -> SourceGrade {
        SourceGrade::NonAuthoritative
    }

    async fn create_record(&self, record: &Record) -> Result<SourceResponse, ConduitError>;

    async fn review_by_id(&self, id: &str) -> Result<SourceResponse, ConduitError>;

    async fn review_by_identifier(&self, identifier: &BusinessIdentifier) -> Result<SourceResponse, ConduitError>;

    async fn update_record(&self, record: &Record) -> Result<SourceResponse, ConduitError>;

    async fn delete_record(&self, record: &Record) -> Result<SourceResponse, ConduitError>;

    async fn search(&self, search_name: &str, params: &SearchParams) -> Result<SourceSearchResponse, ConduitError>;

    fn supports_direct_create(&self, _record: &Record) -> bool {
        true
    }

    fn supports_direct_update(&self, _record: &Record) -> bool {
        true
    }

    fn supports_direct_delete(&self, _record: &Record) -> bool {
        true
    }

    fn supports_search(&self, _search_name: &str) -> bool {
        false
    }
}
