//! Caller-facing transaction outcomes.
//!
//! Every public operation on the cache, the fan-out controller and the access
//! engine reports through a [`TransactionOutcome`] rather than an error. The
//! status separates validation failures from not-found results, and the
//! diagnostics carry the human-readable detail.

use serde::Serialize;

use crate::record::{now_millis, BusinessIdentifier, Record};

/// The action that produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Review,
    Update,
    Delete,
    Search,
    Sync,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Review => write!(f, "review"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::Search => write!(f, "search"),
            Self::Sync => write!(f, "sync"),
        }
    }
}

/// Result status of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// The action completed
    Finished,
    /// Create found an equivalent record already present
    CreationNotRequired,
    /// No record for the identifier (or it was evicted)
    NotFound,
    /// The request itself was unusable (missing identifier, empty response set)
    InvalidParameter,
    /// A source reported a failure
    Failed,
}

impl Status {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Finished | Self::CreationNotRequired)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Finished => write!(f, "finished"),
            Self::CreationNotRequired => write!(f, "creation_not_required"),
            Self::NotFound => write!(f, "not_found"),
            Self::InvalidParameter => write!(f, "invalid_parameter"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Information,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    Informational,
    NotFound,
    Invalid,
    Deleted,
    Exception,
}

/// One diagnostic line attached to an outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: IssueCode,
    /// Component and method that raised it, e.g. `Patient::cache::create`
    pub location: String,
    pub text: String,
}

impl Diagnostic {
    pub fn info(location: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Information,
            code: IssueCode::Informational,
            location: location.into(),
            text: text.into(),
        }
    }

    pub fn warning(code: IssueCode, location: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            code,
            location: location.into(),
            text: text.into(),
        }
    }

    pub fn error(code: IssueCode, location: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code,
            location: location.into(),
            text: text.into(),
        }
    }
}

/// Search result set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchBundle {
    pub record_type: String,
    pub total: usize,
    pub entries: Vec<Record>,
    /// Assembly time (epoch millis)
    pub timestamp: i64,
}

impl SearchBundle {
    pub fn new(record_type: impl Into<String>, entries: Vec<Record>) -> Self {
        Self {
            record_type: record_type.into(),
            total: entries.len(),
            entries,
            timestamp: now_millis(),
        }
    }

    pub fn empty(record_type: impl Into<String>) -> Self {
        Self::new(record_type, Vec::new())
    }
}

/// Outcome of one public operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionOutcome {
    pub action: Action,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<BusinessIdentifier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<Record>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle: Option<SearchBundle>,
    /// A new cache entry or source record came into existence
    pub created: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl TransactionOutcome {
    pub fn new(action: Action, status: Status) -> Self {
        Self {
            action,
            status,
            identifier: None,
            id: None,
            record: None,
            bundle: None,
            created: false,
            diagnostics: Vec::new(),
        }
    }

    /// Validation failure: the request carried no usable identifier or record.
    pub fn invalid_parameter(action: Action, location: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(action, Status::InvalidParameter)
            .with_diagnostic(Diagnostic::error(IssueCode::Invalid, location, text))
    }

    pub fn not_found(action: Action, location: impl Into<String>, what: impl std::fmt::Display) -> Self {
        Self::new(action, Status::NotFound).with_diagnostic(Diagnostic::warning(
            IssueCode::NotFound,
            location,
            format!("Record ({}) does not exist", what),
        ))
    }

    #[must_use]
    pub fn with_record(mut self, record: Record) -> Self {
        if self.id.is_none() {
            self.id = record.id.clone();
        }
        self.record = Some(record);
        self
    }

    #[must_use]
    pub fn with_identifier(mut self, identifier: BusinessIdentifier) -> Self {
        self.identifier = Some(identifier);
        self
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_bundle(mut self, bundle: SearchBundle) -> Self {
        self.bundle = Some(bundle);
        self
    }

    #[must_use]
    pub fn with_created(mut self, created: bool) -> Self {
        self.created = created;
        self
    }

    #[must_use]
    pub fn with_diagnostic(mut self, diagnostic: Diagnostic) -> Self {
        self.diagnostics.push(diagnostic);
        self
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_success_classification() {
        assert!(Status::Finished.is_success());
        assert!(Status::CreationNotRequired.is_success());
        assert!(!Status::NotFound.is_success());
        assert!(!Status::InvalidParameter.is_success());
        assert!(!Status::Failed.is_success());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Action::Review), "review");
        assert_eq!(format!("{}", Status::CreationNotRequired), "creation_not_required");
    }

    #[test]
    fn test_invalid_parameter_and_not_found_are_distinct() {
        let invalid = TransactionOutcome::invalid_parameter(Action::Review, "cache::get", "no identifier");
        let missing = TransactionOutcome::not_found(Action::Review, "cache::get", "MRN|1");

        assert_eq!(invalid.status, Status::InvalidParameter);
        assert_eq!(invalid.diagnostics[0].code, IssueCode::Invalid);
        assert_eq!(missing.status, Status::NotFound);
        assert_eq!(missing.diagnostics[0].code, IssueCode::NotFound);
        assert_eq!(missing.diagnostics[0].text, "Record (MRN|1) does not exist");
    }

    #[test]
    fn test_with_record_fills_id() {
        let record = Record::new("Patient").with_id("Patient:1");
        let outcome = TransactionOutcome::new(Action::Create, Status::Finished).with_record(record);
        assert_eq!(outcome.id.as_deref(), Some("Patient:1"));
    }

    #[test]
    fn test_bundle_total_matches_entries() {
        let bundle = SearchBundle::new("Patient", vec![Record::new("Patient"), Record::new("Patient")]);
        assert_eq!(bundle.total, 2);
        assert_eq!(SearchBundle::empty("Patient").total, 0);
    }
}
