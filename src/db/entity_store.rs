//! Monitored entity store seam
//!
//! The engine never speaks the host store's query language directly; it goes
//! through [`EntityStore`]. Hosts adapt their own storage behind this trait.
//! [`SqliteEntityStore`] is the crate's reference implementation, used by the
//! test suite and by deployments that let the engine own its tables.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::db::audit_repository::parse_db_timestamp;
use crate::models::Snapshot;

/// One monitored record as the store holds it
#[derive(Debug, Clone)]
pub struct StoredEntity {
    pub record_id: String,
    pub snapshot: Snapshot,
    pub updated_at: DateTime<Utc>,
    pub anonymized_at: Option<DateTime<Utc>>,
}

/// A record linked to a monitored record (e.g. transactional history),
/// aggregated into compliance exports.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RelatedRecord {
    pub id: String,
    pub kind: String,
    pub data: Value,
    pub created_at: DateTime<Utc>,
}

/// Access to the monitored record store.
///
/// `scan_eligible` drives retention sweeps: rows last modified before the
/// cutoff, oldest first, excluding anonymized rows unless asked otherwise —
/// an anonymized row no longer matches the "not yet anonymized" predicate,
/// which is what makes anonymize sweeps idempotent.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn fetch(&self, entity_type: &str, record_id: &str) -> Result<Option<StoredEntity>>;

    async fn scan_eligible(
        &self,
        entity_type: &str,
        cutoff: DateTime<Utc>,
        include_anonymized: bool,
        limit: u32,
    ) -> Result<Vec<StoredEntity>>;

    /// Hard-delete one record. Returns false if it was already gone.
    async fn purge(&self, entity_type: &str, record_id: &str) -> Result<bool>;

    /// Replace the record's data with the anonymized snapshot and stamp it
    /// anonymized, in one atomic write. Returns false if the record is gone.
    async fn anonymize(
        &self,
        entity_type: &str,
        record_id: &str,
        snapshot: &Snapshot,
    ) -> Result<bool>;

    async fn related(&self, entity_type: &str, record_id: &str) -> Result<Vec<RelatedRecord>>;
}

/// SQLite-backed reference implementation of [`EntityStore`]
pub struct SqliteEntityStore {
    pool: SqlitePool,
}

impl SqliteEntityStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a monitored record. Host-side write path; the
    /// caller supplies the last-modified timestamp.
    pub async fn upsert_record(
        &self,
        entity_type: &str,
        record_id: &str,
        snapshot: &Snapshot,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let data = serde_json::to_string(snapshot).context("Failed to serialize record data")?;

        sqlx::query(
            r#"
            INSERT INTO monitored_records (entity_type, record_id, data, anonymized_at, updated_at)
            VALUES (?1, ?2, ?3, NULL, ?4)
            ON CONFLICT(entity_type, record_id) DO UPDATE SET
                data = ?3,
                updated_at = ?4
            "#,
        )
        .bind(entity_type)
        .bind(record_id)
        .bind(&data)
        .bind(updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to upsert monitored record")?;

        Ok(())
    }

    /// Attach a related record to a monitored record
    pub async fn insert_related(
        &self,
        entity_type: &str,
        record_id: &str,
        kind: &str,
        data: &Value,
    ) -> Result<RelatedRecord> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO related_records (id, entity_type, record_id, kind, data, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&id)
        .bind(entity_type)
        .bind(record_id)
        .bind(kind)
        .bind(data.to_string())
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to insert related record")?;

        Ok(RelatedRecord {
            id,
            kind: kind.to_string(),
            data: data.clone(),
            created_at,
        })
    }
}

#[async_trait]
impl EntityStore for SqliteEntityStore {
    async fn fetch(&self, entity_type: &str, record_id: &str) -> Result<Option<StoredEntity>> {
        let row = sqlx::query_as::<_, EntityRow>(
            r#"
            SELECT record_id, data, anonymized_at, updated_at FROM monitored_records
            WHERE entity_type = ?1 AND record_id = ?2
            "#,
        )
        .bind(entity_type)
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch monitored record")?;

        Ok(row.map(|r| r.into()))
    }

    async fn scan_eligible(
        &self,
        entity_type: &str,
        cutoff: DateTime<Utc>,
        include_anonymized: bool,
        limit: u32,
    ) -> Result<Vec<StoredEntity>> {
        let mut sql = String::from(
            "SELECT record_id, data, anonymized_at, updated_at FROM monitored_records \
             WHERE entity_type = ?1 AND datetime(updated_at) < datetime(?2)",
        );
        if !include_anonymized {
            sql.push_str(" AND anonymized_at IS NULL");
        }
        sql.push_str(" ORDER BY updated_at ASC LIMIT ?3");

        let rows = sqlx::query_as::<_, EntityRow>(&sql)
            .bind(entity_type)
            .bind(cutoff.to_rfc3339())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .context("Failed to scan eligible records")?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn purge(&self, entity_type: &str, record_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM monitored_records WHERE entity_type = ?1 AND record_id = ?2
            "#,
        )
        .bind(entity_type)
        .bind(record_id)
        .execute(&self.pool)
        .await
        .context("Failed to purge monitored record")?;

        // Linked records do not outlive their owner
        sqlx::query(
            r#"
            DELETE FROM related_records WHERE entity_type = ?1 AND record_id = ?2
            "#,
        )
        .bind(entity_type)
        .bind(record_id)
        .execute(&self.pool)
        .await
        .context("Failed to purge related records")?;

        Ok(result.rows_affected() > 0)
    }

    async fn anonymize(
        &self,
        entity_type: &str,
        record_id: &str,
        snapshot: &Snapshot,
    ) -> Result<bool> {
        let data = serde_json::to_string(snapshot).context("Failed to serialize record data")?;

        let result = sqlx::query(
            r#"
            UPDATE monitored_records
            SET data = ?1, anonymized_at = ?2
            WHERE entity_type = ?3 AND record_id = ?4
            "#,
        )
        .bind(&data)
        .bind(Utc::now().to_rfc3339())
        .bind(entity_type)
        .bind(record_id)
        .execute(&self.pool)
        .await
        .context("Failed to anonymize monitored record")?;

        Ok(result.rows_affected() > 0)
    }

    async fn related(&self, entity_type: &str, record_id: &str) -> Result<Vec<RelatedRecord>> {
        let rows = sqlx::query_as::<_, RelatedRow>(
            r#"
            SELECT id, kind, data, created_at FROM related_records
            WHERE entity_type = ?1 AND record_id = ?2
            ORDER BY created_at ASC
            "#,
        )
        .bind(entity_type)
        .bind(record_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch related records")?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }
}

// ============================================================================
// Database Row Types
// ============================================================================

#[derive(Debug, FromRow)]
struct EntityRow {
    record_id: String,
    data: String,
    anonymized_at: Option<String>,
    updated_at: String,
}

impl From<EntityRow> for StoredEntity {
    fn from(row: EntityRow) -> Self {
        Self {
            record_id: row.record_id,
            snapshot: serde_json::from_str(&row.data).unwrap_or_default(),
            updated_at: parse_db_timestamp(&row.updated_at),
            anonymized_at: row.anonymized_at.as_deref().map(parse_db_timestamp),
        }
    }
}

#[derive(Debug, FromRow)]
struct RelatedRow {
    id: String,
    kind: String,
    data: String,
    created_at: String,
}

impl From<RelatedRow> for RelatedRecord {
    fn from(row: RelatedRow) -> Self {
        Self {
            id: row.id,
            kind: row.kind,
            data: serde_json::from_str(&row.data).unwrap_or(Value::Null),
            created_at: parse_db_timestamp(&row.created_at),
        }
    }
}
