// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL-backed identifier mapping store.
//!
//! ```sql
//! CREATE TABLE record_mappings (
//!   local_id VARCHAR(255) PRIMARY KEY,
//!   record_type VARCHAR(64) NOT NULL,
//!   identifiers LONGTEXT NOT NULL,  -- JSON array of {system, value, use}
//!   updated_at BIGINT NOT NULL      -- epoch millis of the last refresh
//! )
//! ```
//!
//! Identifiers are stored as JSON text: the `Any` driver has no JSON column
//! mapping, and MySQL `LONGTEXT` comes back as bytes, so reads accept either.

use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{any::AnyPoolOptions, AnyPool, Row};
use tracing::debug;

use super::traits::{IdentifierMappingStore, RecordMapping, StorageError};
use crate::record::BusinessIdentifier;
use crate::resilience::retry::{retry, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

/// Read a text column as `String`, falling back to bytes (MySQL `LONGTEXT`).
fn text_column(row: &sqlx::any::AnyRow, column: &str) -> Option<String> {
    row.try_get::<String, _>(column).ok().or_else(|| {
        row.try_get::<Vec<u8>, _>(column)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    })
}

pub struct SqlMappingStore {
    pool: AnyPool,
    is_sqlite: bool,
}

impl SqlMappingStore {
    /// Connect and create the schema, retrying with startup backoff.
    pub async fn connect(connection_string: &str) -> Result<Self, StorageError> {
        install_drivers();

        let is_sqlite = connection_string.starts_with("sqlite:");

        let pool = retry("mapping_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(if is_sqlite { 1 } else { 10 })
                .acquire_timeout(Duration::from_secs(10))
                .connect(connection_string)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        let store = Self { pool, is_sqlite };
        store.init_schema().await?;
        debug!(sqlite = is_sqlite, "Mapping store ready");
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let sql = if self.is_sqlite {
            r#"
            CREATE TABLE IF NOT EXISTS record_mappings (
                local_id TEXT PRIMARY KEY,
                record_type TEXT NOT NULL,
                identifiers TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#
        } else {
            r#"
            CREATE TABLE IF NOT EXISTS record_mappings (
                local_id VARCHAR(255) PRIMARY KEY,
                record_type VARCHAR(64) NOT NULL,
                identifiers LONGTEXT NOT NULL,
                updated_at BIGINT NOT NULL,
                INDEX idx_record_type (record_type)
            )
            "#
        };

        retry("mapping_init_schema", &RetryConfig::startup(), || async {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        Ok(())
    }
}

#[async_trait]
impl IdentifierMappingStore for SqlMappingStore {
    async fn put(&self, mapping: &RecordMapping) -> Result<(), StorageError> {
        let identifiers = serde_json::to_string(&mapping.identifiers).map_err(|e| StorageError::Corruption {
            id: mapping.local_id.clone(),
            reason: e.to_string(),
        })?;

        let sql = if self.is_sqlite {
            "INSERT INTO record_mappings (local_id, record_type, identifiers, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(local_id) DO UPDATE SET
                record_type = excluded.record_type,
                identifiers = excluded.identifiers,
                updated_at = excluded.updated_at"
        } else {
            "INSERT INTO record_mappings (local_id, record_type, identifiers, updated_at)
             VALUES (?, ?, ?, ?)
             ON DUPLICATE KEY UPDATE
                record_type = VALUES(record_type),
                identifiers = VALUES(identifiers),
                updated_at = VALUES(updated_at)"
        };

        retry("mapping_put", &RetryConfig::query(), || async {
            sqlx::query(sql)
                .bind(&mapping.local_id)
                .bind(&mapping.record_type)
                .bind(&identifiers)
                .bind(mapping.updated_at)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn get(&self, local_id: &str) -> Result<Option<RecordMapping>, StorageError> {
        let row = retry("mapping_get", &RetryConfig::query(), || async {
            sqlx::query("SELECT record_type, identifiers, updated_at FROM record_mappings WHERE local_id = ?")
                .bind(local_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let corrupt = |reason: String| StorageError::Corruption {
            id: local_id.to_string(),
            reason,
        };
        let record_type = text_column(&row, "record_type").ok_or_else(|| corrupt("missing record_type".into()))?;
        let identifiers_json = text_column(&row, "identifiers").ok_or_else(|| corrupt("missing identifiers".into()))?;
        let identifiers: Vec<BusinessIdentifier> =
            serde_json::from_str(&identifiers_json).map_err(|e| corrupt(e.to_string()))?;
        let updated_at: i64 = row.try_get("updated_at").unwrap_or(0);

        Ok(Some(RecordMapping {
            local_id: local_id.to_string(),
            record_type,
            identifiers,
            updated_at,
        }))
    }

    async fn remove(&self, local_id: &str) -> Result<(), StorageError> {
        retry("mapping_remove", &RetryConfig::query(), || async {
            sqlx::query("DELETE FROM record_mappings WHERE local_id = ?")
                .bind(local_id)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            Ok(())
        })
        .await
    }
}
