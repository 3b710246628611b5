//! Identifier-indexed record cache.
//!
//! - [`RecordCache`]: the capability the access engine depends on
//! - [`IdentifierCache`]: `DashMap`-backed implementation with age-based eviction

mod identifier;

pub use identifier::IdentifierCache;

use crate::outcome::TransactionOutcome;
use crate::record::{BusinessIdentifier, Record};

/// Record store keyed by business identifier.
///
/// Every operation reports through a [`TransactionOutcome`]. Mutating
/// operations purge expired entries before doing anything else.
pub trait RecordCache: Send + Sync {
    /// Record type held by this cache.
    fn record_type(&self) -> &str;

    /// Look up a record by business identifier.
    fn get(&self, identifier: &BusinessIdentifier) -> TransactionOutcome;

    /// Look up a record by its system-local id.
    fn get_by_id(&self, id: &str) -> TransactionOutcome;

    /// Add a record under its best identifier (idempotent, alias-aware).
    fn create(&self, record: Record) -> TransactionOutcome;

    /// Replace a record: delete then create. Not atomic.
    fn update(&self, record: Record) -> TransactionOutcome;

    /// Remove a record and every alias of it.
    fn delete(&self, record: &Record) -> TransactionOutcome;

    /// Merge an externally obtained record into the cached copy, or create it.
    fn sync(&self, record: Record) -> TransactionOutcome;

    /// Evict expired entries. Returns the number of identifiers removed.
    fn purge(&self) -> usize;

    /// Snapshot of the distinct cached records.
    fn get_all(&self) -> Vec<Record>;
}
