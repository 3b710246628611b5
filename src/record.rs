// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Record data structures.
//!
//! A [`Record`] is the opaque unit the mediator caches and reconciles. The
//! mediator only understands three things about it: its record type, its
//! system-local id, and the set of [`BusinessIdentifier`]s it can be found by.
//! Everything else lives in `content`, a JSON object whose top-level keys are
//! the record's fields.
//!
//! # Example
//!
//! ```
//! use record_mediator::{Record, BusinessIdentifier, IdentifierUse};
//! use serde_json::json;
//!
//! let record = Record::new("Patient")
//!     .with_identifier(BusinessIdentifier::new("MRN", "1234").with_use(IdentifierUse::Usual))
//!     .with_identifier(BusinessIdentifier::new("NHS", "943 476 5919").with_use(IdentifierUse::Official))
//!     .with_field("phone", json!("0161 496 0000"));
//!
//! // Official beats usual
//! assert_eq!(record.best_identifier().unwrap().system, "NHS");
//! assert_eq!(record.field("phone"), Some(&json!("0161 496 0000")));
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Intended use of a business identifier, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierUse {
    Official,
    Usual,
    Secondary,
    Temp,
    Old,
}

impl IdentifierUse {
    /// Preference rank (lower is better). Identifiers without a use rank last.
    #[must_use]
    pub fn rank(use_: Option<Self>) -> u8 {
        match use_ {
            Some(Self::Official) => 0,
            Some(Self::Usual) => 1,
            Some(Self::Secondary) => 2,
            Some(Self::Temp) => 3,
            Some(Self::Old) => 4,
            None => 5,
        }
    }
}

/// External-facing `(system, value)` key for a record.
///
/// Equality and hashing only look at `system` and `value`: the same key
/// carried with a different `use` addresses the same cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessIdentifier {
    pub system: String,
    pub value: String,
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub use_: Option<IdentifierUse>,
}

impl BusinessIdentifier {
    pub fn new(system: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            value: value.into(),
            use_: None,
        }
    }

    #[must_use]
    pub fn with_use(mut self, use_: IdentifierUse) -> Self {
        self.use_ = Some(use_);
        self
    }

    /// Both halves of the key are present.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.system.trim().is_empty() && !self.value.trim().is_empty()
    }
}

impl PartialEq for BusinessIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.system == other.system && self.value == other.value
    }
}

impl Eq for BusinessIdentifier {}

impl Hash for BusinessIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.system.hash(state);
        self.value.hash(state);
    }
}

impl fmt::Display for BusinessIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.system, self.value)
    }
}

/// Parses the `system|value` form produced by `Display`.
impl FromStr for BusinessIdentifier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (system, value) = s
            .split_once('|')
            .ok_or_else(|| format!("identifier '{}' is not of the form system|value", s))?;
        let identifier = Self::new(system, value);
        if identifier.is_valid() {
            Ok(identifier)
        } else {
            Err(format!("identifier '{}' has an empty system or value", s))
        }
    }
}

/// Pick the "best" identifier from a set.
///
/// Order of preference is official, usual, secondary, temp, old, then anything
/// else. Within a rank the first one listed wins. Invalid identifiers are skipped.
pub fn best_identifier(identifiers: &[BusinessIdentifier]) -> Option<&BusinessIdentifier> {
    identifiers
        .iter()
        .filter(|id| id.is_valid())
        .min_by_key(|id| IdentifierUse::rank(id.use_))
}

/// A structured record of a known type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Record type (e.g. `Patient`, `Location`)
    pub record_type: String,
    /// System-local id, assigned by the mediator when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Business identifiers this record can be found by
    #[serde(default)]
    pub identifiers: Vec<BusinessIdentifier>,
    /// Payload fields
    #[serde(default)]
    pub content: Map<String, Value>,
    /// Last update timestamp (epoch millis), as reported by a source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<i64>,
}

impl Record {
    pub fn new(record_type: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            id: None,
            identifiers: Vec::new(),
            content: Map::new(),
            last_updated: None,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_identifier(mut self, identifier: BusinessIdentifier) -> Self {
        self.add_identifier(identifier);
        self
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.content.insert(name.into(), value);
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.content.get(name)
    }

    /// The field exists and is not null.
    pub fn has_field(&self, name: &str) -> bool {
        self.content.get(name).is_some_and(|v| !v.is_null())
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.content.insert(name.into(), value);
    }

    pub fn best_identifier(&self) -> Option<&BusinessIdentifier> {
        best_identifier(&self.identifiers)
    }

    pub fn has_identifier(&self, identifier: &BusinessIdentifier) -> bool {
        self.identifiers.iter().any(|id| id == identifier)
    }

    /// Add an identifier unless an equal one is already present.
    pub fn add_identifier(&mut self, identifier: BusinessIdentifier) {
        if !self.has_identifier(&identifier) {
            self.identifiers.push(identifier);
        }
    }

    pub fn shares_identifier_with(&self, other: &Record) -> bool {
        self.identifiers.iter().any(|id| other.has_identifier(id))
    }

    /// Assign a generated local id (`<record_type>:<uuid>`) if the record has none.
    /// Returns the id the record now carries.
    pub fn ensure_id(&mut self) -> String {
        if let Some(ref id) = self.id {
            return id.clone();
        }
        let id = format!("{}:{}", self.record_type, uuid::Uuid::new_v4());
        self.id = Some(id.clone());
        id
    }
}

/// Per-record-type behaviour the cache and engine rely on.
///
/// The defaults treat two records as the same when their payloads are equal
/// and they are the same entity: they share a business identifier or carry
/// the same local id. Synchronising overlays every populated incoming field
/// onto the cached copy.
pub trait RecordPolicy: Send + Sync {
    /// Record type this policy governs.
    fn record_type(&self) -> &str;

    fn are_equivalent(&self, a: &Record, b: &Record) -> bool {
        let same_entity = a.shares_identifier_with(b) || (a.id.is_some() && a.id == b.id);
        a.record_type == b.record_type && same_entity && a.content == b.content
    }

    /// Merge an externally obtained copy into the cached copy in place.
    fn synchronise(&self, cached: &mut Record, incoming: &Record) {
        for (name, value) in &incoming.content {
            if !value.is_null() {
                cached.content.insert(name.clone(), value.clone());
            }
        }
        for identifier in &incoming.identifiers {
            cached.add_identifier(identifier.clone());
        }
        if incoming.last_updated > cached.last_updated {
            cached.last_updated = incoming.last_updated;
        }
    }
}

/// [`RecordPolicy`] with the default equality and merge rules.
#[derive(Debug, Clone)]
pub struct DefaultRecordPolicy {
    record_type: String,
}

impl DefaultRecordPolicy {
    pub fn new(record_type: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
        }
    }
}

impl RecordPolicy for DefaultRecordPolicy {
    fn record_type(&self) -> &str {
        &self.record_type
    }
}

/// Current wall-clock time in epoch millis.
pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
