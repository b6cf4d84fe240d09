//! Retention policy registry and cleanup ledger repository

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::db::audit_repository::parse_db_timestamp;
use crate::models::{
    CleanupLedgerEntry, LedgerAction, NewCleanupLedgerEntry, PolicyTarget, RetentionAction,
    RetentionPolicy, RetentionPolicyInput,
};
use crate::utils::{EngineError, EngineResult};

pub struct RetentionRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> RetentionRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // Retention Policies
    // =========================================================================

    /// Create or replace the policy for an entity type (last write wins).
    ///
    /// An explicit input id that contradicts the id already registered for
    /// the entity type means two distinct policies resolve to the same
    /// entity type and is rejected.
    pub async fn upsert_policy(
        &self,
        input: &RetentionPolicyInput,
    ) -> EngineResult<RetentionPolicy> {
        if input.entity_type.is_empty() {
            return Err(EngineError::Validation(
                "entity_type must not be empty".to_string(),
            ));
        }
        if input.max_age_days <= 0 {
            return Err(EngineError::Validation(
                "max_age_days must be positive".to_string(),
            ));
        }

        let existing = self.get_policy(&input.entity_type).await?;

        let id = match (&existing, input.id) {
            (Some(current), Some(requested)) if current.id != requested => {
                return Err(EngineError::PolicyConflict(format!(
                    "entity type '{}' already has policy {}",
                    input.entity_type, current.id
                )));
            }
            (Some(current), _) => current.id,
            (None, Some(requested)) => requested,
            (None, None) => Uuid::new_v4(),
        };

        let now = Utc::now();
        let created_at = existing.as_ref().map(|p| p.created_at).unwrap_or(now);
        let last_run_at = existing.as_ref().and_then(|p| p.last_run_at);
        let fields = serde_json::to_string(&input.identifying_fields)
            .context("Failed to serialize identifying fields")?;

        sqlx::query(
            r#"
            INSERT INTO retention_policies (
                id, entity_type, target, action, max_age_days,
                identifying_fields, last_run_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(entity_type) DO UPDATE SET
                target = ?3,
                action = ?4,
                max_age_days = ?5,
                identifying_fields = ?6,
                updated_at = ?9
            "#,
        )
        .bind(id.to_string())
        .bind(&input.entity_type)
        .bind(input.target.as_str())
        .bind(input.action.as_str())
        .bind(input.max_age_days)
        .bind(&fields)
        .bind(last_run_at.map(|dt| dt.to_rfc3339()))
        .bind(created_at.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(self.pool)
        .await
        .context("Failed to upsert retention policy")?;

        Ok(RetentionPolicy {
            id,
            entity_type: input.entity_type.clone(),
            target: input.target,
            action: input.action,
            max_age_days: input.max_age_days,
            identifying_fields: input.identifying_fields.clone(),
            last_run_at,
            created_at,
            updated_at: now,
        })
    }

    /// Get the policy for an entity type
    pub async fn get_policy(&self, entity_type: &str) -> Result<Option<RetentionPolicy>> {
        let row = sqlx::query_as::<_, PolicyRow>(
            r#"
            SELECT * FROM retention_policies WHERE entity_type = ?1
            "#,
        )
        .bind(entity_type)
        .fetch_optional(self.pool)
        .await
        .context("Failed to fetch retention policy")?;

        Ok(row.map(|r| r.into()))
    }

    /// List all registered policies
    pub async fn list_policies(&self) -> Result<Vec<RetentionPolicy>> {
        let rows = sqlx::query_as::<_, PolicyRow>(
            r#"
            SELECT * FROM retention_policies ORDER BY entity_type ASC
            "#,
        )
        .fetch_all(self.pool)
        .await
        .context("Failed to list retention policies")?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    /// Delete the policy for an entity type
    pub async fn delete_policy(&self, entity_type: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM retention_policies WHERE entity_type = ?1
            "#,
        )
        .bind(entity_type)
        .execute(self.pool)
        .await
        .context("Failed to delete retention policy")?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a completed sweep on the policy
    pub async fn touch_last_run(&self, entity_type: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE retention_policies SET last_run_at = ?1, updated_at = ?1
            WHERE entity_type = ?2
            "#,
        )
        .bind(at.to_rfc3339())
        .bind(entity_type)
        .execute(self.pool)
        .await
        .context("Failed to update policy last-run timestamp")?;

        Ok(())
    }

    // =========================================================================
    // Cleanup Ledger
    // =========================================================================

    /// Append one ledger entry. The ledger is append-only.
    pub async fn append_ledger(
        &self,
        entry: &NewCleanupLedgerEntry,
    ) -> Result<CleanupLedgerEntry> {
        let created_at = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO cleanup_ledger (
                policy_id, entity_type, action, affected_count, failed_count,
                requested_by, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(entry.policy_id.map(|id| id.to_string()))
        .bind(&entry.entity_type)
        .bind(entry.action.as_str())
        .bind(entry.affected_count)
        .bind(entry.failed_count)
        .bind(entry.requested_by.as_deref())
        .bind(created_at.to_rfc3339())
        .execute(self.pool)
        .await
        .context("Failed to append cleanup ledger entry")?;

        Ok(CleanupLedgerEntry {
            id: result.last_insert_rowid(),
            policy_id: entry.policy_id,
            entity_type: entry.entity_type.clone(),
            action: entry.action,
            affected_count: entry.affected_count,
            failed_count: entry.failed_count,
            requested_by: entry.requested_by.clone(),
            created_at,
        })
    }

    /// List ledger entries, newest first, optionally scoped to one policy
    pub async fn list_ledger(
        &self,
        policy_id: Option<Uuid>,
        limit: u32,
    ) -> Result<Vec<CleanupLedgerEntry>> {
        let mut sql = String::from("SELECT * FROM cleanup_ledger WHERE 1=1");
        if policy_id.is_some() {
            sql.push_str(" AND policy_id = ?");
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ?");

        let mut q = sqlx::query_as::<_, LedgerRow>(&sql);
        if let Some(id) = policy_id {
            q = q.bind(id.to_string());
        }
        q = q.bind(limit as i64);

        let rows = q
            .fetch_all(self.pool)
            .await
            .context("Failed to list cleanup ledger")?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }
}

// ============================================================================
// Database Row Types
// ============================================================================

#[derive(Debug, FromRow)]
struct PolicyRow {
    id: String,
    entity_type: String,
    target: String,
    action: String,
    max_age_days: i64,
    identifying_fields: String,
    last_run_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl From<PolicyRow> for RetentionPolicy {
    fn from(row: PolicyRow) -> Self {
        Self {
            id: Uuid::parse_str(&row.id).unwrap_or_else(|_| Uuid::nil()),
            entity_type: row.entity_type,
            target: PolicyTarget::parse(&row.target).unwrap_or(PolicyTarget::Entities),
            action: RetentionAction::parse(&row.action).unwrap_or(RetentionAction::Purge),
            max_age_days: row.max_age_days,
            identifying_fields: serde_json::from_str(&row.identifying_fields)
                .unwrap_or_default(),
            last_run_at: row
                .last_run_at
                .as_deref()
                .map(parse_db_timestamp),
            created_at: parse_db_timestamp(&row.created_at),
            updated_at: parse_db_timestamp(&row.updated_at),
        }
    }
}

#[derive(Debug, FromRow)]
struct LedgerRow {
    id: i64,
    policy_id: Option<String>,
    entity_type: String,
    action: String,
    affected_count: i64,
    failed_count: i64,
    requested_by: Option<String>,
    created_at: String,
}

impl From<LedgerRow> for CleanupLedgerEntry {
    fn from(row: LedgerRow) -> Self {
        Self {
            id: row.id,
            policy_id: row.policy_id.as_deref().and_then(|s| Uuid::parse_str(s).ok()),
            entity_type: row.entity_type,
            action: LedgerAction::parse(&row.action).unwrap_or(LedgerAction::Purge),
            affected_count: row.affected_count,
            failed_count: row.failed_count,
            requested_by: row.requested_by,
            created_at: parse_db_timestamp(&row.created_at),
        }
    }
}
