// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! `DashMap`-backed [`RecordCache`].
//!
//! Aliases of one record share a single [`CacheEntry`] behind an `Arc`, so a
//! sync through any alias is visible through all of them and they age (and
//! retire) together.
//!
//! # Locking
//!
//! - `entries`: identifier -> shared entry (concurrent map, sharded locks)
//! - `locks`: identifier -> per-identifier mutex, held only by `sync` while it
//!   merges fields into the cached copy
//!
//! No `DashMap` guard is ever held while the same map is mutated; entries are
//! cloned out (`Arc`) first.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use super::RecordCache;
use crate::outcome::{Action, Diagnostic, Status, TransactionOutcome};
use crate::record::{BusinessIdentifier, Record, RecordPolicy};

/// A cached record plus its last-touched time.
#[derive(Debug)]
struct CacheEntry {
    record: RwLock<Record>,
    touched_at: Mutex<Instant>,
}

impl CacheEntry {
    fn new(record: Record) -> Self {
        Self {
            record: RwLock::new(record),
            touched_at: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.touched_at.lock() = Instant::now();
    }

    fn age(&self) -> Duration {
        self.touched_at.lock().elapsed()
    }

    fn snapshot(&self) -> Record {
        self.record.read().clone()
    }
}

pub struct IdentifierCache {
    policy: Arc<dyn RecordPolicy>,
    retirement: Duration,
    entries: DashMap<BusinessIdentifier, Arc<CacheEntry>>,
    locks: DashMap<BusinessIdentifier, Arc<Mutex<()>>>,
}

impl IdentifierCache {
    /// Create a cache for the policy's record type. Entries older than
    /// `retirement` are treated as absent and evicted on the next purge.
    pub fn new(policy: Arc<dyn RecordPolicy>, retirement: Duration) -> Self {
        Self {
            policy,
            retirement,
            entries: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    /// Number of identifier keys (aliases counted individually).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn retirement(&self) -> Duration {
        self.retirement
    }

    fn location(&self, method: &str) -> String {
        format!("{}::cache::{}", self.policy.record_type(), method)
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        entry.age() > self.retirement
    }

    fn entry(&self, identifier: &BusinessIdentifier) -> Option<Arc<CacheEntry>> {
        self.entries.get(identifier).map(|e| Arc::clone(e.value()))
    }

    fn key_lock(&self, identifier: &BusinessIdentifier) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .entry(identifier.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    fn validate(&self, record: &Record, action: Action, method: &str) -> Result<BusinessIdentifier, TransactionOutcome> {
        if record.record_type != self.policy.record_type() {
            return Err(TransactionOutcome::invalid_parameter(
                action,
                self.location(method),
                format!(
                    "Record type {} does not belong in the {} cache",
                    record.record_type,
                    self.policy.record_type()
                ),
            ));
        }
        record.best_identifier().cloned().ok_or_else(|| {
            TransactionOutcome::invalid_parameter(
                action,
                self.location(method),
                "Parameter record carries no usable business identifier",
            )
        })
    }

    /// Find an entry the new record should be aliased onto: one keyed by, or
    /// holding, any of the record's identifiers, or holding an equivalent record.
    fn find_alias_target(&self, record: &Record) -> Option<Arc<CacheEntry>> {
        self.entries.iter().find_map(|kv| {
            if record.has_identifier(kv.key()) {
                return Some(Arc::clone(kv.value()));
            }
            let cached = kv.value().record.read();
            if cached.shares_identifier_with(record) || self.policy.are_equivalent(&cached, record) {
                return Some(Arc::clone(kv.value()));
            }
            None
        })
    }

    /// A record cached under another key may still carry `identifier`; if so,
    /// register `identifier` as an alias of that entry.
    fn adopt_alias(&self, identifier: &BusinessIdentifier) -> Option<Arc<CacheEntry>> {
        let entry = self
            .entries
            .iter()
            .find(|kv| kv.value().record.read().has_identifier(identifier))
            .map(|kv| Arc::clone(kv.value()))?;
        self.entries
            .entry(identifier.clone())
            .or_insert_with(|| Arc::clone(&entry));
        trace!(%identifier, "Adopted identifier carried by a cached record");
        Some(entry)
    }

    fn insert_under(&self, identifier: BusinessIdentifier, mut record: Record, action: Action) -> TransactionOutcome {
        let location = self.location("create");
        record.ensure_id();
        record.add_identifier(identifier.clone());

        if let Some(existing) = self.entry(&identifier) {
            let existing_record = existing.snapshot();
            if self.policy.are_equivalent(&existing_record, &record) {
                debug!(%identifier, "Equivalent record already cached");
                return TransactionOutcome::new(action, Status::CreationNotRequired)
                    .with_identifier(identifier)
                    .with_record(existing_record)
                    .with_diagnostic(Diagnostic::info(location, "Equivalent record already cached"));
            }
        }

        if let Some(existing) = self.find_alias_target(&record) {
            existing.record.write().add_identifier(identifier.clone());
            self.entries.insert(identifier.clone(), Arc::clone(&existing));
            debug!(%identifier, "Aliased identifier onto existing cache entry");
            return TransactionOutcome::new(action, Status::CreationNotRequired)
                .with_identifier(identifier.clone())
                .with_record(existing.snapshot())
                .with_diagnostic(Diagnostic::info(
                    location,
                    format!("Identifier ({}) aliased onto an existing record", identifier),
                ));
        }

        self.entries
            .insert(identifier.clone(), Arc::new(CacheEntry::new(record.clone())));
        crate::metrics::set_cache_entries(self.policy.record_type(), self.entries.len());
        trace!(%identifier, "Inserted new cache entry");

        TransactionOutcome::new(action, Status::Finished)
            .with_identifier(identifier)
            .with_record(record)
            .with_created(true)
            .with_diagnostic(Diagnostic::info(location, "New record cached"))
    }

    /// Remove the entry for `identifier`, then every entry that shares it or
    /// holds a record equivalent to the removed one or to `record`.
    /// Returns (identifiers removed, first removed local id).
    fn remove_with_aliases(&self, identifier: &BusinessIdentifier, record: &Record) -> (usize, Option<String>) {
        let mut removed_count = 0;
        let removed = self.entries.remove(identifier).map(|(_, entry)| entry);
        self.locks.remove(identifier);

        let removed_record = removed.as_ref().map(|entry| entry.snapshot());
        let mut first_id = removed_record.as_ref().and_then(|r| r.id.clone());
        if removed.is_some() {
            removed_count += 1;
        }

        let doomed: Vec<BusinessIdentifier> = self
            .entries
            .iter()
            .filter(|kv| {
                if let Some(ref removed) = removed {
                    if Arc::ptr_eq(kv.value(), removed) {
                        return true;
                    }
                }
                let cached = kv.value().record.read();
                removed_record
                    .as_ref()
                    .is_some_and(|r| self.policy.are_equivalent(&cached, r))
                    || self.policy.are_equivalent(&cached, record)
            })
            .map(|kv| kv.key().clone())
            .collect();

        for key in doomed {
            if let Some((_, entry)) = self.entries.remove(&key) {
                removed_count += 1;
                if first_id.is_none() {
                    first_id = entry.snapshot().id;
                }
            }
            self.locks.remove(&key);
        }

        crate::metrics::set_cache_entries(self.policy.record_type(), self.entries.len());
        (removed_count, first_id)
    }
}

impl RecordCache for IdentifierCache {
    fn record_type(&self) -> &str {
        self.policy.record_type()
    }

    fn get(&self, identifier: &BusinessIdentifier) -> TransactionOutcome {
        let location = self.location("get");
        if !identifier.is_valid() {
            return TransactionOutcome::invalid_parameter(
                Action::Review,
                location,
                "Parameter identifier content is invalid",
            );
        }

        let Some(entry) = self.entry(identifier).or_else(|| self.adopt_alias(identifier)) else {
            crate::metrics::record_cache_lookup(self.policy.record_type(), "miss");
            return TransactionOutcome::not_found(Action::Review, location, identifier)
                .with_identifier(identifier.clone());
        };

        if self.is_expired(&entry) {
            crate::metrics::record_cache_lookup(self.policy.record_type(), "expired");
            debug!(%identifier, "Cache entry expired");
            drop(entry);
            self.purge();
            return TransactionOutcome::not_found(Action::Review, location, identifier)
                .with_identifier(identifier.clone());
        }

        entry.touch();
        crate::metrics::record_cache_lookup(self.policy.record_type(), "hit");
        TransactionOutcome::new(Action::Review, Status::Finished)
            .with_identifier(identifier.clone())
            .with_record(entry.snapshot())
            .with_diagnostic(Diagnostic::info(
                location,
                format!("Record ({}) has been retrieved", identifier),
            ))
    }

    fn get_by_id(&self, id: &str) -> TransactionOutcome {
        let location = self.location("get_by_id");
        if id.trim().is_empty() {
            return TransactionOutcome::invalid_parameter(Action::Review, location, "Parameter id is empty");
        }

        let found = self.entries.iter().find_map(|kv| {
            let matches = kv.value().record.read().id.as_deref() == Some(id);
            matches.then(|| (kv.key().clone(), Arc::clone(kv.value())))
        });

        let Some((identifier, entry)) = found else {
            crate::metrics::record_cache_lookup(self.policy.record_type(), "miss");
            return TransactionOutcome::not_found(Action::Review, location, id).with_id(id);
        };

        if self.is_expired(&entry) {
            crate::metrics::record_cache_lookup(self.policy.record_type(), "expired");
            drop(entry);
            self.purge();
            return TransactionOutcome::not_found(Action::Review, location, id).with_id(id);
        }

        entry.touch();
        crate::metrics::record_cache_lookup(self.policy.record_type(), "hit");
        TransactionOutcome::new(Action::Review, Status::Finished)
            .with_identifier(identifier)
            .with_record(entry.snapshot())
            .with_diagnostic(Diagnostic::info(location, format!("Record ({}) has been retrieved", id)))
    }

    fn create(&self, record: Record) -> TransactionOutcome {
        self.purge();
        let identifier = match self.validate(&record, Action::Create, "create") {
            Ok(identifier) => identifier,
            Err(outcome) => return outcome,
        };
        self.insert_under(identifier, record, Action::Create)
    }

    fn update(&self, record: Record) -> TransactionOutcome {
        self.purge();
        let identifier = match self.validate(&record, Action::Update, "update") {
            Ok(identifier) => identifier,
            Err(outcome) => return outcome,
        };

        // Readers may observe a miss between these two steps.
        self.remove_with_aliases(&identifier, &record);
        let mut outcome = self.insert_under(identifier, record, Action::Update);
        if outcome.is_success() {
            outcome.status = Status::Finished;
            outcome.created = false;
        }
        outcome
    }

    fn delete(&self, record: &Record) -> TransactionOutcome {
        self.purge();
        let identifier = match self.validate(record, Action::Delete, "delete") {
            Ok(identifier) => identifier,
            Err(outcome) => return outcome,
        };
        let location = self.location("delete");

        let (removed, first_id) = self.remove_with_aliases(&identifier, record);
        if removed == 0 {
            return TransactionOutcome::not_found(Action::Delete, location, &identifier)
                .with_identifier(identifier);
        }

        debug!(%identifier, removed, "Removed record and aliases");
        let mut outcome = TransactionOutcome::new(Action::Delete, Status::Finished)
            .with_identifier(identifier)
            .with_record(record.clone())
            .with_diagnostic(Diagnostic::info(location, "This record has been deleted"));
        outcome.id = first_id;
        outcome
    }

    fn sync(&self, mut record: Record) -> TransactionOutcome {
        self.purge();
        let identifier = match self.validate(&record, Action::Sync, "sync") {
            Ok(identifier) => identifier,
            Err(outcome) => return outcome,
        };
        record.ensure_id();

        let Some(entry) = self.entry(&identifier) else {
            let mut outcome = self.insert_under(identifier, record, Action::Sync);
            if outcome.is_success() {
                outcome.status = Status::Finished;
            }
            return outcome;
        };

        let lock = self.key_lock(&identifier);
        {
            let _guard = lock.lock();
            let mut cached = entry.record.write();
            self.policy.synchronise(&mut cached, &record);
        }
        entry.touch();

        TransactionOutcome::new(Action::Sync, Status::Finished)
            .with_identifier(identifier.clone())
            .with_record(entry.snapshot())
            .with_diagnostic(Diagnostic::info(
                self.location("sync"),
                format!("Record ({}) has been synchronised", identifier),
            ))
    }

    fn purge(&self) -> usize {
        let expired: Vec<BusinessIdentifier> = self
            .entries
            .iter()
            .filter(|kv| self.is_expired(kv.value()))
            .map(|kv| kv.key().clone())
            .collect();

        if expired.is_empty() {
            return 0;
        }

        let mut evicted = 0;
        for key in &expired {
            // A concurrent create may have replaced the entry since the scan
            if self.entries.remove_if(key, |_, entry| self.is_expired(entry)).is_some() {
                evicted += 1;
                self.locks.remove(key);
            }
        }

        if evicted > 0 {
            debug!(record_type = self.policy.record_type(), evicted, "Purged expired cache entries");
            crate::metrics::record_eviction(self.policy.record_type(), evicted);
            crate::metrics::set_cache_entries(self.policy.record_type(), self.entries.len());
        } else {
            warn!(record_type = self.policy.record_type(), "Expired entries were refreshed before purge");
        }
        evicted
    }

    fn get_all(&self) -> Vec<Record> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .filter(|kv| seen.insert(Arc::as_ptr(kv.value())))
            .map(|kv| kv.value().snapshot())
            .collect()
    }
}
