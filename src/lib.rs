//! # Record Mediator
//!
//! One consistent record per business identifier, over several sources of
//! truth that each hold their own variant of it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      RecordEngine                           │
//! │  • create / read / update / delete / find / search         │
//! │  • persisted local id → identifier mapping                 │
//! └─────────────────────────────────────────────────────────────┘
//!               │ identifier reads               │ writes + misses
//!               ▼                                ▼
//! ┌───────────────────────────┐   ┌─────────────────────────────┐
//! │      IdentifierCache      │   │      SourceController       │
//! │  • DashMap, aliases       │   │  • JoinSet fan-out          │
//! │  • age-based eviction     │   │  • failure isolation        │
//! └───────────────────────────┘   └─────────────────────────────┘
//!               ▲                                │
//!               │ resolved record                ▼
//!               │                 ┌─────────────────────────────┐
//!               └──────────────── │     PerFieldAggregator      │
//!                                 │  • precedence ranking       │
//!                                 │  • field-by-field merge     │
//!                                 └─────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use record_mediator::{
//!     BusinessIdentifier, DefaultRecordPolicy, InMemoryConduit, MediatorConfig, Record, RecordEngine,
//!     SourceGrade,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = MediatorConfig::default();
//!     let engine = RecordEngine::from_config(Arc::new(DefaultRecordPolicy::new("Patient")), &config)
//!         .await
//!         .expect("Failed to build engine");
//!
//!     let pas = Arc::new(InMemoryConduit::new("pas", SourceGrade::Authoritative));
//!     pas.insert(
//!         Record::new("Patient")
//!             .with_identifier(BusinessIdentifier::new("MRN", "1234"))
//!             .with_field("phone", json!("0161 496 0000")),
//!     );
//!     engine.register_conduit(pas);
//!
//!     // First lookup fans out; the second is served from the cache
//!     let outcome = engine.find_by_identifier(&"MRN|1234".parse().unwrap()).await;
//!     println!("{}: {:?}", outcome.status, outcome.record);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`record`]: records, business identifiers, per-type policy
//! - [`outcome`]: transaction outcomes and diagnostics
//! - [`cache`]: identifier-indexed cache
//! - [`conduit`]: backing-source contract
//! - [`controller`]: fan-out over conduits
//! - [`aggregation`]: reduction of source responses
//! - [`engine`]: the caller-facing orchestrator
//! - [`storage`]: id mapping persistence

pub mod aggregation;
pub mod cache;
pub mod conduit;
pub mod config;
pub mod controller;
pub mod engine;
pub mod metrics;
pub mod outcome;
pub mod record;
pub mod resilience;
pub mod storage;

pub use aggregation::{Aggregator, PerFieldAggregator};
pub use cache::{IdentifierCache, RecordCache};
pub use conduit::{
    Conduit, ConduitError, InMemoryConduit, ResourceGrade, SearchParams, SourceGrade, SourceResponse,
    SourceSearchResponse,
};
pub use config::MediatorConfig;
pub use controller::SourceController;
pub use engine::RecordEngine;
pub use metrics::LatencyTimer;
pub use outcome::{Action, Diagnostic, IssueCode, SearchBundle, Severity, Status, TransactionOutcome};
pub use record::{best_identifier, BusinessIdentifier, DefaultRecordPolicy, IdentifierUse, Record, RecordPolicy};
pub use resilience::retry::RetryConfig;
pub use storage::{IdentifierMappingStore, InMemoryMappingStore, RecordMapping, SqlMappingStore, StorageError};
