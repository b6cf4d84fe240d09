//! Capture hook
//!
//! Invoked synchronously within the same unit of work as the monitored
//! mutation. The acting principal and correlation context arrive as explicit
//! parameters; the hook reads no ambient state. It blocks until the audit
//! append durably completes or fails, and an append failure propagates so the
//! enclosing business transaction can abort. The hook never retries
//! internally.

use serde_json::Value;
use tracing::debug;

use crate::db::{AuditRepository, DbPool};
use crate::models::{AuditOperation, AuditRecord, MutationEvent, NewAuditRecord, Snapshot};
use crate::services::diff::compute_diff;
use crate::utils::{EngineError, EngineResult};

pub struct CaptureService {
    pool: DbPool,
}

impl CaptureService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Capture one mutation.
    ///
    /// Returns the appended audit record, or `Ok(None)` for a no-op update
    /// (snapshots structurally equal) — nothing is persisted in that case.
    pub async fn record(&self, event: MutationEvent) -> EngineResult<Option<AuditRecord>> {
        let record_id = resolve_record_id(&event)?;

        let diff = match (event.operation, &event.before, &event.after) {
            (AuditOperation::Created, None, Some(_)) => None,
            (AuditOperation::Deleted, Some(_), None) => None,
            (AuditOperation::Updated, Some(before), Some(after)) => {
                let diff = compute_diff(before, after);
                if diff.is_empty() {
                    debug!(
                        entity_type = %event.entity_type,
                        record_id = %record_id,
                        "Skipping audit capture for no-op update"
                    );
                    return Ok(None);
                }
                Some(diff)
            }
            (operation, _, _) => {
                return Err(EngineError::InvalidSnapshot(format!(
                    "operation '{operation}' does not match the supplied snapshots"
                )));
            }
        };

        let record = NewAuditRecord {
            entity_type: event.entity_type,
            operation: event.operation,
            record_id,
            before: event.before,
            after: event.after,
            diff,
            principal: event.principal,
            correlation: event.correlation.unwrap_or_default(),
        };

        let appended = AuditRepository::new(&self.pool)
            .append(&record)
            .await
            .map_err(|e| EngineError::CaptureFailed(format!("{e:#}")))?;

        debug!(
            audit_id = appended.id,
            entity_type = %appended.entity_type,
            operation = %appended.operation,
            record_id = %appended.record_id,
            "Captured mutation"
        );

        Ok(Some(appended))
    }
}

/// Stable string identifier for the mutated record, taken from the `"id"`
/// field of the after-snapshot, falling back to the before-snapshot on
/// delete.
fn resolve_record_id(event: &MutationEvent) -> EngineResult<String> {
    let snapshot: &Snapshot = event
        .after
        .as_ref()
        .or(event.before.as_ref())
        .ok_or_else(|| {
            EngineError::InvalidSnapshot("mutation carries no snapshot".to_string())
        })?;

    match snapshot.get("id") {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(_) => Err(EngineError::InvalidSnapshot(
            "record 'id' field must be a string or number".to_string(),
        )),
        None => Err(EngineError::InvalidSnapshot(
            "snapshot has no 'id' field".to_string(),
        )),
    }
}
