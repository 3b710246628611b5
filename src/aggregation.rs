// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Reduction of per-source responses into one outcome.
//!
//! # Default strategy
//!
//! ```text
//! responses ──► empty?            ──► InvalidParameter
//!           ──► any failure?      ──► that response, verbatim
//!           ──► any empty record? ──► that response, verbatim
//!           ──► sort (source grade, priority, source name)
//!           ──► base = first; merge the rest field by field
//! ```
//!
//! A field already populated on the base survives unless configuration names
//! the other response's source as the preferred source for that field. The
//! local `id` follows the same rule under the field name `"id"`.

use std::collections::HashMap;

use tracing::{debug, trace, warn};

use crate::conduit::{SourceResponse, SourceSearchResponse};
use crate::outcome::{Action, Diagnostic, IssueCode, SearchBundle, Status, TransactionOutcome};
use crate::record::Record;

/// Field name the local id is checked under.
const ID_FIELD: &str = "id";

/// Reduces N source responses to one [`TransactionOutcome`].
pub trait Aggregator: Send + Sync {
    /// Reduce create/review/update/delete responses.
    fn aggregate(&self, action: Action, responses: Vec<SourceResponse>) -> TransactionOutcome;

    /// Reduce search responses into a bundle outcome.
    fn aggregate_search(&self, record_type: &str, responses: Vec<SourceSearchResponse>) -> TransactionOutcome;

    fn aggregate_create(&self, responses: Vec<SourceResponse>) -> TransactionOutcome {
        self.aggregate(Action::Create, responses)
    }

    fn aggregate_review(&self, responses: Vec<SourceResponse>) -> TransactionOutcome {
        self.aggregate(Action::Review, responses)
    }

    fn aggregate_update(&self, responses: Vec<SourceResponse>) -> TransactionOutcome {
        self.aggregate(Action::Update, responses)
    }

    fn aggregate_delete(&self, responses: Vec<SourceResponse>) -> TransactionOutcome {
        self.aggregate(Action::Delete, responses)
    }
}

/// Precedence-ranked, field-by-field merge.
#[derive(Debug, Clone, Default)]
pub struct PerFieldAggregator {
    /// Field name -> source whose value wins for that field
    field_preferences: HashMap<String, String>,
}

impl PerFieldAggregator {
    #[must_use]
    pub fn new(field_preferences: HashMap<String, String>) -> Self {
        Self { field_preferences }
    }

    /// Whether the base keeps its value for `field` against `other`.
    #[must_use]
    pub fn base_has_precedence(&self, field: &str, _base: &SourceResponse, other: &SourceResponse) -> bool {
        self.field_preferences
            .get(field)
            .map_or(true, |preferred| preferred != &other.source)
    }

    /// Deterministic precedence order: best first.
    pub fn rank(responses: &mut [SourceResponse]) {
        responses.sort_by(|a, b| {
            a.source_grade
                .cmp(&b.source_grade)
                .then(a.priority.cmp(&b.priority))
                .then_with(|| a.source.cmp(&b.source))
        });
    }

    fn merge_into(&self, base: &SourceResponse, merged: &mut Record, other: &SourceResponse) {
        let Some(ref other_record) = other.record else {
            return;
        };

        for (field, value) in &other_record.content {
            if value.is_null() {
                continue;
            }
            if merged.has_field(field) && self.base_has_precedence(field, base, other) {
                continue;
            }
            trace!(field = %field, source = %other.source, "Taking field from lower-ranked source");
            merged.set_field(field.clone(), value.clone());
        }

        for identifier in &other_record.identifiers {
            merged.add_identifier(identifier.clone());
        }

        if other_record.id.is_some() && (merged.id.is_none() || !self.base_has_precedence(ID_FIELD, base, other)) {
            merged.id = other_record.id.clone();
        }

        if merged.last_updated.is_none() {
            merged.last_updated = other_record.last_updated;
        }
    }
}

impl Aggregator for PerFieldAggregator {
    fn aggregate(&self, action: Action, mut responses: Vec<SourceResponse>) -> TransactionOutcome {
        crate::metrics::record_aggregation_inputs(&action.to_string(), responses.len());
        let location = format!("aggregation::{}", action);

        if responses.is_empty() {
            warn!(%action, "No source responses to aggregate");
            return TransactionOutcome::invalid_parameter(
                action,
                location,
                "Bad attribute: no source responses to aggregate",
            );
        }

        if let Some(pos) = responses.iter().position(|r| !r.status.is_success()) {
            let failed = responses.swap_remove(pos);
            debug!(%action, source = %failed.source, status = %failed.status, "Short-circuit on unsuccessful source response");
            return failed.into_outcome();
        }

        if let Some(pos) = responses.iter().position(|r| !r.has_content()) {
            let empty = responses.swap_remove(pos);
            debug!(%action, source = %empty.source, "Short-circuit on empty source response");
            return empty.into_outcome();
        }

        Self::rank(&mut responses);
        let mut ranked = responses.into_iter();
        let Some(base) = ranked.next() else {
            return TransactionOutcome::invalid_parameter(action, location, "Bad attribute: no source responses");
        };
        let others: Vec<SourceResponse> = ranked.collect();

        if others.is_empty() {
            let mut outcome = base.into_outcome();
            outcome.created = action == Action::Create && outcome.status == Status::Finished;
            return outcome;
        }

        let mut merged = base.record.clone().unwrap_or_else(|| Record::new(""));
        for other in &others {
            self.merge_into(&base, &mut merged, other);
        }

        let sources: Vec<&str> = std::iter::once(base.source.as_str())
            .chain(others.iter().map(|o| o.source.as_str()))
            .collect();
        debug!(%action, sources = ?sources, "Merged source responses");

        let mut outcome = TransactionOutcome::new(base.action, base.status)
            .with_record(merged)
            .with_diagnostic(Diagnostic::info(
                location,
                format!("Aggregated {} source responses ({})", sources.len(), sources.join(", ")),
            ));
        outcome.identifier = base.identifier.clone();
        outcome.created = action == Action::Create && base.status == Status::Finished;
        outcome.diagnostics.extend(base.diagnostics);
        outcome
    }

    fn aggregate_search(&self, record_type: &str, responses: Vec<SourceSearchResponse>) -> TransactionOutcome {
        crate::metrics::record_aggregation_inputs("search", responses.len());
        let location = format!("aggregation::{}", Action::Search);

        let mut responding: Vec<SourceSearchResponse> =
            responses.into_iter().filter(|r| r.status.is_success()).collect();

        let outcome = TransactionOutcome::new(Action::Search, Status::Finished);
        match responding.len() {
            1 => {
                let only = responding.remove(0);
                debug!(source = %only.source, matches = only.records.len(), "Search answered by one source");
                outcome.with_bundle(SearchBundle::new(record_type, only.records))
            }
            0 => outcome.with_bundle(SearchBundle::empty(record_type)),
            n => {
                warn!(sources = n, "Search answered by several sources, results not fused");
                outcome
                    .with_bundle(SearchBundle::empty(record_type))
                    .with_diagnostic(Diagnostic::warning(
                        IssueCode::Informational,
                        location,
                        format!("Search answered by {} sources; cross-source results are not combined", n),
                    ))
            }
        }
    }
}
