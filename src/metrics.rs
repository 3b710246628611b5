// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the record mediator.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host process chooses the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `record_mediator_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `component`: cache, controller, aggregation, engine
//! - `operation`: create, review, update, delete, search, sync, ...
//! - `status`: an outcome status (`finished`, `not_found`, ...)
//! - `conduit`: backing source name

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a completed operation and its status
pub fn record_operation(component: &str, operation: &str, status: &str) {
    counter!(
        "record_mediator_operations_total",
        "component" => component.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(component: &str, operation: &str, duration: Duration) {
    histogram!(
        "record_mediator_operation_seconds",
        "component" => component.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a cache lookup result (hit, miss, expired)
pub fn record_cache_lookup(record_type: &str, result: &str) {
    counter!(
        "record_mediator_cache_lookups_total",
        "record_type" => record_type.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}

/// Set current cache entry count (identifier keys, aliases included)
pub fn set_cache_entries(record_type: &str, count: usize) {
    gauge!(
        "record_mediator_cache_entries",
        "record_type" => record_type.to_string()
    )
    .set(count as f64);
}

/// Record evicted identifiers
pub fn record_eviction(record_type: &str, count: usize) {
    counter!(
        "record_mediator_evictions_total",
        "record_type" => record_type.to_string()
    )
    .increment(count as u64);
}

/// Record one conduit invocation during fan-out
pub fn record_conduit_call(conduit: &str, operation: &str, outcome: &str) {
    counter!(
        "record_mediator_conduit_calls_total",
        "conduit" => conduit.to_string(),
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record how many per-source responses an aggregation reduced
pub fn record_aggregation_inputs(operation: &str, count: usize) {
    histogram!(
        "record_mediator_aggregation_inputs",
        "operation" => operation.to_string()
    )
    .record(count as f64);
}

/// Record a mapping store error
pub fn record_mapping_error(operation: &str) {
    counter!(
        "record_mediator_mapping_errors_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    component: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(component: &'static str, operation: &'static str) -> Self {
        Self {
            component,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.component, self.operation, self.start.elapsed());
    }
}
