//! Audit record models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{FieldDiff, Snapshot};

/// Kind of mutation captured by an audit record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    Created,
    Updated,
    Deleted,
}

impl AuditOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOperation::Created => "created",
            AuditOperation::Updated => "updated",
            AuditOperation::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(AuditOperation::Created),
            "updated" => Some(AuditOperation::Updated),
            "deleted" => Some(AuditOperation::Deleted),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuditOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Opaque request context captured alongside a mutation.
///
/// All fields are optional, opaque strings supplied by the caller; the engine
/// never interprets them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_label: Option<String>,
}

/// An immutable record of one captured mutation.
///
/// Invariants: `created` carries only `after`, `deleted` carries only
/// `before`, `updated` carries both plus a non-empty `diff`. Records are
/// never mutated or deleted in normal operation; only a retention policy
/// targeting the audit log itself may prune them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub entity_type: String,
    pub operation: AuditOperation,
    pub record_id: String,
    pub before: Option<Snapshot>,
    pub after: Option<Snapshot>,
    pub diff: Option<FieldDiff>,
    pub principal: String,
    #[serde(default)]
    pub correlation: CorrelationContext,
    pub created_at: DateTime<Utc>,
}

/// A fully built audit record awaiting its identifier and timestamp.
#[derive(Debug, Clone)]
pub struct NewAuditRecord {
    pub entity_type: String,
    pub operation: AuditOperation,
    pub record_id: String,
    pub before: Option<Snapshot>,
    pub after: Option<Snapshot>,
    pub diff: Option<FieldDiff>,
    pub principal: String,
    pub correlation: CorrelationContext,
}

/// Filter for audit record retrieval.
///
/// Results are capped (default 100) and ordered newest first: timestamp
/// descending, ties broken by identifier descending.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditQuery {
    pub entity_type: Option<String>,
    pub record_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

/// The plain data contract handed to the capture hook for every mutation.
#[derive(Debug, Clone)]
pub struct MutationEvent {
    pub entity_type: String,
    pub operation: AuditOperation,
    pub before: Option<Snapshot>,
    pub after: Option<Snapshot>,
    pub principal: String,
    pub correlation: Option<CorrelationContext>,
}
