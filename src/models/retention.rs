//! Retention policy and cleanup ledger models
//!
//! A retention policy declares, per entity type, how old data may grow before
//! it is purged or anonymized. The cleanup ledger is the append-only trail of
//! completed retention actions, scheduled and on-demand alike.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a retention sweep does to eligible rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionAction {
    /// Hard-delete eligible rows
    Purge,
    /// Overwrite identifying fields with the sentinel, keep the row
    Anonymize,
}

impl RetentionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetentionAction::Purge => "purge",
            RetentionAction::Anonymize => "anonymize",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "purge" => Some(RetentionAction::Purge),
            "anonymize" => Some(RetentionAction::Anonymize),
            _ => None,
        }
    }
}

impl std::fmt::Display for RetentionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which store a policy sweeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyTarget {
    /// Live rows in the monitored entity store
    Entities,
    /// Historical records in the audit log itself
    AuditLog,
}

impl PolicyTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyTarget::Entities => "entities",
            PolicyTarget::AuditLog => "audit_log",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "entities" => Some(PolicyTarget::Entities),
            "audit_log" => Some(PolicyTarget::AuditLog),
            _ => None,
        }
    }
}

impl std::fmt::Display for PolicyTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Declarative per-entity-type retention rule.
///
/// At most one policy exists per entity type. The eligibility predicate is
/// derived from `max_age_days`: a row qualifies once its last-modified
/// timestamp falls before `now - max_age_days`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub id: Uuid,
    pub entity_type: String,
    pub target: PolicyTarget,
    pub action: RetentionAction,
    pub max_age_days: i64,
    /// Fields the anonymize action overwrites with the sentinel value.
    pub identifying_fields: Vec<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RetentionPolicy {
    /// Age cutoff for a sweep starting at `now`.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(self.max_age_days)
    }
}

/// Input for creating or replacing an entity type's policy.
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionPolicyInput {
    /// Explicit policy id; omitted on create. Supplying an id that differs
    /// from the one registered for the entity type is a conflict.
    pub id: Option<Uuid>,
    pub entity_type: String,
    #[serde(default = "default_policy_target")]
    pub target: PolicyTarget,
    pub action: RetentionAction,
    pub max_age_days: i64,
    #[serde(default)]
    pub identifying_fields: Vec<String>,
}

fn default_policy_target() -> PolicyTarget {
    PolicyTarget::Entities
}

/// Provenance of a cleanup ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerAction {
    Purge,
    Anonymize,
    Export,
}

impl LedgerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerAction::Purge => "purge",
            LedgerAction::Anonymize => "anonymize",
            LedgerAction::Export => "export",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "purge" => Some(LedgerAction::Purge),
            "anonymize" => Some(LedgerAction::Anonymize),
            "export" => Some(LedgerAction::Export),
            _ => None,
        }
    }
}

impl From<RetentionAction> for LedgerAction {
    fn from(action: RetentionAction) -> Self {
        match action {
            RetentionAction::Purge => LedgerAction::Purge,
            RetentionAction::Anonymize => LedgerAction::Anonymize,
        }
    }
}

impl std::fmt::Display for LedgerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable record of one completed retention action.
///
/// `policy_id` is absent for on-demand compliance operations; `requested_by`
/// is set exactly for those, tying the entry to the requesting principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupLedgerEntry {
    pub id: i64,
    pub policy_id: Option<Uuid>,
    pub entity_type: String,
    pub action: LedgerAction,
    pub affected_count: i64,
    pub failed_count: i64,
    pub requested_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A ledger entry awaiting its identifier and timestamp.
#[derive(Debug, Clone)]
pub struct NewCleanupLedgerEntry {
    pub policy_id: Option<Uuid>,
    pub entity_type: String,
    pub action: LedgerAction,
    pub affected_count: i64,
    pub failed_count: i64,
    pub requested_by: Option<String>,
}
