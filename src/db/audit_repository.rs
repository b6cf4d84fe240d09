//! Audit store repository
//!
//! Append-only persistence for audit records. `append` is the only mutation
//! entry point in normal operation; the `*_older_than` statements exist
//! solely for retention policies that target the audit log itself and are
//! reachable only through the sweeper.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};

use crate::models::{
    AuditOperation, AuditQuery, AuditRecord, CorrelationContext, NewAuditRecord,
};

const DEFAULT_QUERY_LIMIT: u32 = 100;

pub struct AuditRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> AuditRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Append one audit record, returning it with its assigned identifier.
    pub async fn append(&self, record: &NewAuditRecord) -> Result<AuditRecord> {
        let created_at = Utc::now();
        let before = record
            .before
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to serialize before-snapshot")?;
        let after = record
            .after
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to serialize after-snapshot")?;
        let diff = record
            .diff
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to serialize diff")?;

        let result = sqlx::query(
            r#"
            INSERT INTO audit_log (
                entity_type, operation, record_id, before_snapshot, after_snapshot,
                diff, principal, session_id, origin_address, client_label, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&record.entity_type)
        .bind(record.operation.as_str())
        .bind(&record.record_id)
        .bind(before.as_deref())
        .bind(after.as_deref())
        .bind(diff.as_deref())
        .bind(&record.principal)
        .bind(record.correlation.session_id.as_deref())
        .bind(record.correlation.origin_address.as_deref())
        .bind(record.correlation.client_label.as_deref())
        .bind(created_at.to_rfc3339())
        .execute(self.pool)
        .await
        .context("Failed to append audit record")?;

        Ok(AuditRecord {
            id: result.last_insert_rowid(),
            entity_type: record.entity_type.clone(),
            operation: record.operation,
            record_id: record.record_id.clone(),
            before: record.before.clone(),
            after: record.after.clone(),
            diff: record.diff.clone(),
            principal: record.principal.clone(),
            correlation: record.correlation.clone(),
            created_at,
        })
    }

    /// Filtered retrieval, newest first (timestamp descending, ties broken by
    /// identifier descending). The result cap defaults to 100.
    pub async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>> {
        let mut sql = String::from(
            "SELECT id, entity_type, operation, record_id, before_snapshot, after_snapshot, \
             diff, principal, session_id, origin_address, client_label, created_at \
             FROM audit_log WHERE 1=1",
        );

        if query.entity_type.is_some() {
            sql.push_str(" AND entity_type = ?");
        }
        if query.record_id.is_some() {
            sql.push_str(" AND record_id = ?");
        }
        if query.from.is_some() {
            sql.push_str(" AND datetime(created_at) >= datetime(?)");
        }
        if query.to.is_some() {
            sql.push_str(" AND datetime(created_at) <= datetime(?)");
        }

        sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ?");

        let mut q = sqlx::query_as::<_, AuditRow>(&sql);
        if let Some(ref entity_type) = query.entity_type {
            q = q.bind(entity_type);
        }
        if let Some(ref record_id) = query.record_id {
            q = q.bind(record_id);
        }
        if let Some(from) = query.from {
            q = q.bind(from.to_rfc3339());
        }
        if let Some(to) = query.to {
            q = q.bind(to.to_rfc3339());
        }
        q = q.bind(query.limit.unwrap_or(DEFAULT_QUERY_LIMIT) as i64);

        let rows = q
            .fetch_all(self.pool)
            .await
            .context("Failed to query audit records")?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    /// Delete one entity type's audit records older than the cutoff.
    /// Retention use only.
    pub async fn purge_older_than(&self, entity_type: &str, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM audit_log
            WHERE entity_type = ?1 AND datetime(created_at) < datetime(?2)
            "#,
        )
        .bind(entity_type)
        .bind(cutoff.to_rfc3339())
        .execute(self.pool)
        .await
        .context("Failed to purge audit records")?;

        Ok(result.rows_affected())
    }

    /// Sentinel the principal and clear correlation columns on one entity
    /// type's audit records older than the cutoff, leaving snapshots and
    /// diffs intact. Predicating on `principal != sentinel` keeps the
    /// statement idempotent.
    pub async fn anonymize_older_than(
        &self,
        entity_type: &str,
        cutoff: DateTime<Utc>,
        sentinel: &str,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE audit_log
            SET principal = ?1, session_id = NULL, origin_address = NULL, client_label = NULL
            WHERE entity_type = ?2 AND datetime(created_at) < datetime(?3) AND principal != ?1
            "#,
        )
        .bind(sentinel)
        .bind(entity_type)
        .bind(cutoff.to_rfc3339())
        .execute(self.pool)
        .await
        .context("Failed to anonymize audit records")?;

        Ok(result.rows_affected())
    }
}

#[derive(Debug, FromRow)]
struct AuditRow {
    id: i64,
    entity_type: String,
    operation: String,
    record_id: String,
    before_snapshot: Option<String>,
    after_snapshot: Option<String>,
    diff: Option<String>,
    principal: String,
    session_id: Option<String>,
    origin_address: Option<String>,
    client_label: Option<String>,
    created_at: String,
}

impl From<AuditRow> for AuditRecord {
    fn from(row: AuditRow) -> Self {
        Self {
            id: row.id,
            entity_type: row.entity_type,
            operation: AuditOperation::parse(&row.operation).unwrap_or(AuditOperation::Updated),
            record_id: row.record_id,
            before: row
                .before_snapshot
                .and_then(|s| serde_json::from_str(&s).ok()),
            after: row
                .after_snapshot
                .and_then(|s| serde_json::from_str(&s).ok()),
            diff: row.diff.and_then(|s| serde_json::from_str(&s).ok()),
            principal: row.principal,
            correlation: CorrelationContext {
                session_id: row.session_id,
                origin_address: row.origin_address,
                client_label: row.client_label,
            },
            created_at: parse_db_timestamp(&row.created_at),
        }
    }
}

pub(crate) fn parse_db_timestamp(ts: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S") {
        return DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc);
    }
    Utc::now()
}
