//! Compliance operations
//!
//! On-demand, principal-triggered export and anonymize for a single
//! identified record, independent of the scheduled sweeps. Both operations
//! append a cleanup ledger entry tagged with the requesting principal, so
//! fulfillment of a compliance request can be proven without walking the
//! regular audit trail.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::db::{AuditRepository, DbPool, EntityStore, RelatedRecord, RetentionRepository};
use crate::models::{
    AuditOperation, AuditQuery, AuditRecord, LedgerAction, MutationEvent, NewCleanupLedgerEntry,
};
use crate::services::capture::CaptureService;
use crate::services::diff::anonymize_snapshot;
use crate::utils::{EngineError, EngineResult};

/// Aggregated snapshot of one record's state, linked records, and audit
/// history, assembled for a data-subject export.
#[derive(Debug, Serialize)]
pub struct ExportDocument {
    pub entity_type: String,
    pub record_id: String,
    pub exported_at: DateTime<Utc>,
    pub record: Value,
    pub related: Vec<RelatedRecord>,
    pub history: Vec<AuditRecord>,
    /// True when cancellation stopped the related-record scan early
    pub truncated: bool,
}

/// Result of an on-demand anonymize
#[derive(Debug)]
pub struct AnonymizeOutcome {
    /// False when the record was already fully anonymized
    pub changed: bool,
    /// Audit record capturing the anonymize mutation, when one was written
    pub audit_record_id: Option<i64>,
    pub ledger_entry_id: i64,
}

pub struct ComplianceService {
    pool: DbPool,
    entities: Arc<dyn EntityStore>,
    sentinel: String,
}

impl ComplianceService {
    pub fn new(pool: DbPool, entities: Arc<dyn EntityStore>, sentinel: String) -> Self {
        Self {
            pool,
            entities,
            sentinel,
        }
    }

    /// Export one record's current state together with its related records
    /// and audit history.
    ///
    /// Cancellation is cooperative: a cancelled token stops the
    /// related-record scan and the document comes back flagged `truncated`.
    pub async fn export(
        &self,
        entity_type: &str,
        record_id: &str,
        principal: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<ExportDocument> {
        let entity = self
            .entities
            .fetch(entity_type, record_id)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!("{entity_type} '{record_id}' not found"))
            })?;

        let mut truncated = false;
        let related = if cancel.is_cancelled() {
            warn!(
                entity_type,
                record_id, "Export cancelled before related-record scan"
            );
            truncated = true;
            Vec::new()
        } else {
            self.entities.related(entity_type, record_id).await?
        };

        let history = AuditRepository::new(&self.pool)
            .query(&AuditQuery {
                entity_type: Some(entity_type.to_string()),
                record_id: Some(record_id.to_string()),
                ..Default::default()
            })
            .await?;

        RetentionRepository::new(&self.pool)
            .append_ledger(&NewCleanupLedgerEntry {
                policy_id: None,
                entity_type: entity_type.to_string(),
                action: LedgerAction::Export,
                affected_count: 1,
                failed_count: 0,
                requested_by: Some(principal.to_string()),
            })
            .await?;

        info!(
            entity_type,
            record_id,
            principal,
            related = related.len(),
            history = history.len(),
            truncated,
            "Compliance export complete"
        );

        Ok(ExportDocument {
            entity_type: entity_type.to_string(),
            record_id: record_id.to_string(),
            exported_at: Utc::now(),
            record: Value::Object(entity.snapshot),
            related,
            history,
            truncated,
        })
    }

    /// Anonymize one record immediately, outside the scheduled sweep.
    ///
    /// Applies the same field-sentinel transformation as the sweeper's
    /// anonymize action, in one atomic store write, and routes the resulting
    /// mutation through the capture hook. Identifying fields come from the
    /// entity type's registered retention policy.
    pub async fn anonymize(
        &self,
        entity_type: &str,
        record_id: &str,
        principal: &str,
    ) -> EngineResult<AnonymizeOutcome> {
        let retention = RetentionRepository::new(&self.pool);
        let policy = retention
            .get_policy(entity_type)
            .await?
            .filter(|p| !p.identifying_fields.is_empty())
            .ok_or_else(|| {
                EngineError::Validation(format!(
                    "no identifying fields configured for entity type '{entity_type}'"
                ))
            })?;

        let entity = self
            .entities
            .fetch(entity_type, record_id)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!("{entity_type} '{record_id}' not found"))
            })?;

        let after = anonymize_snapshot(&entity.snapshot, &policy.identifying_fields, &self.sentinel);
        let changed = after != entity.snapshot;

        let mut audit_record_id = None;
        if changed {
            let applied = self
                .entities
                .anonymize(entity_type, record_id, &after)
                .await?;
            if !applied {
                return Err(EngineError::NotFound(format!(
                    "{entity_type} '{record_id}' disappeared before anonymization"
                )));
            }

            let captured = CaptureService::new(self.pool.clone())
                .record(MutationEvent {
                    entity_type: entity_type.to_string(),
                    operation: AuditOperation::Updated,
                    before: Some(entity.snapshot),
                    after: Some(after),
                    principal: principal.to_string(),
                    correlation: None,
                })
                .await?;
            audit_record_id = captured.map(|r| r.id);
        } else {
            debug!(
                entity_type,
                record_id, "Record already anonymized, nothing to overwrite"
            );
        }

        let entry = retention
            .append_ledger(&NewCleanupLedgerEntry {
                policy_id: Some(policy.id),
                entity_type: entity_type.to_string(),
                action: LedgerAction::Anonymize,
                affected_count: i64::from(changed),
                failed_count: 0,
                requested_by: Some(principal.to_string()),
            })
            .await?;

        info!(
            entity_type,
            record_id, principal, changed, "Compliance anonymize complete"
        );

        Ok(AnonymizeOutcome {
            changed,
            audit_record_id,
            ledger_entry_id: entry.id,
        })
    }
}
