//! Test fixtures for common test data

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

use datatrail::db::DbPool;
use datatrail::models::Snapshot;

/// Convert a `json!` object literal into a snapshot
pub fn snapshot(value: Value) -> Snapshot {
    match value {
        Value::Object(map) => map,
        other => panic!("expected JSON object, got {other}"),
    }
}

pub fn days_ago(days: i64) -> DateTime<Utc> {
    Utc::now() - Duration::days(days)
}

/// A customer record with one identifying and one non-identifying field
pub fn customer(id: &str, email: &str, order_count: i64) -> Snapshot {
    snapshot(json!({
        "id": id,
        "email": email,
        "order_count": order_count
    }))
}

/// Rewrite one audit record's timestamp, for age-based test scenarios
pub async fn backdate_audit_record(db: &DbPool, audit_id: i64, to: DateTime<Utc>) {
    sqlx::query("UPDATE audit_log SET created_at = ?1 WHERE id = ?2")
        .bind(to.to_rfc3339())
        .bind(audit_id)
        .execute(db)
        .await
        .expect("Failed to backdate audit record");
}
