//! Capture hook and audit store integration tests

use serde_json::json;

use datatrail::db::AuditRepository;
use datatrail::models::{AuditOperation, AuditQuery, CorrelationContext, MutationEvent};
use datatrail::EngineError;

use crate::common::{backdate_audit_record, days_ago, snapshot, TestApp};

fn event(
    operation: AuditOperation,
    before: Option<datatrail::models::Snapshot>,
    after: Option<datatrail::models::Snapshot>,
) -> MutationEvent {
    MutationEvent {
        entity_type: "customer".to_string(),
        operation,
        before,
        after,
        principal: "svc-api".to_string(),
        correlation: None,
    }
}

#[tokio::test]
async fn test_create_update_delete_end_to_end() {
    let app = TestApp::new().await;
    let capture = app.capture();

    let v1 = snapshot(json!({"id": "r1", "name": "Alice", "age": 30}));
    let v2 = snapshot(json!({"id": "r1", "name": "Alice", "age": 31}));

    let created = capture
        .record(event(AuditOperation::Created, None, Some(v1.clone())))
        .await
        .unwrap()
        .expect("create must be captured");
    assert_eq!(created.operation, AuditOperation::Created);
    assert_eq!(created.record_id, "r1");
    assert!(created.before.is_none());
    assert!(created.after.is_some());
    assert!(created.diff.is_none());

    let updated = capture
        .record(event(
            AuditOperation::Updated,
            Some(v1.clone()),
            Some(v2.clone()),
        ))
        .await
        .unwrap()
        .expect("substantive update must be captured");
    let diff = updated.diff.expect("update carries a diff");
    assert_eq!(diff.len(), 1);
    let change = diff.get("age").unwrap();
    assert_eq!(change.old, Some(json!(30)));
    assert_eq!(change.new, Some(json!(31)));

    capture
        .record(event(AuditOperation::Deleted, Some(v2.clone()), None))
        .await
        .unwrap()
        .expect("delete must be captured");

    let records = AuditRepository::new(&app.db)
        .query(&AuditQuery {
            record_id: Some("r1".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(records.len(), 3);
    // Newest first, ties broken by identifier descending
    assert_eq!(records[0].operation, AuditOperation::Deleted);
    assert_eq!(records[1].operation, AuditOperation::Updated);
    assert_eq!(records[2].operation, AuditOperation::Created);
    assert!(records[0].id > records[1].id);
    assert!(records[1].id > records[2].id);
    assert!(records[0].created_at >= records[2].created_at);

    // The delete carries only the prior snapshot
    assert!(records[0].before.is_some());
    assert!(records[0].after.is_none());
}

#[tokio::test]
async fn test_noop_update_writes_nothing() {
    let app = TestApp::new().await;
    let capture = app.capture();

    let v1 = snapshot(json!({"id": "r1", "name": "Alice", "age": 30}));
    // Same content, different key order
    let v1_reordered = snapshot(json!({"age": 30, "id": "r1", "name": "Alice"}));

    let result = capture
        .record(event(
            AuditOperation::Updated,
            Some(v1),
            Some(v1_reordered),
        ))
        .await
        .unwrap();
    assert!(result.is_none());

    let records = AuditRepository::new(&app.db)
        .query(&AuditQuery::default())
        .await
        .unwrap();
    assert!(records.is_empty());
}

#[tokio::test]
async fn test_invalid_snapshot_combinations_are_rejected() {
    let app = TestApp::new().await;
    let capture = app.capture();

    let snap = snapshot(json!({"id": "r1"}));

    // created without an after-snapshot
    let err = capture
        .record(event(AuditOperation::Created, Some(snap.clone()), None))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidSnapshot(_)));

    // updated without a before-snapshot
    let err = capture
        .record(event(AuditOperation::Updated, None, Some(snap.clone())))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidSnapshot(_)));

    // deleted with an after-snapshot
    let err = capture
        .record(event(
            AuditOperation::Deleted,
            Some(snap.clone()),
            Some(snap.clone()),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidSnapshot(_)));

    // Nothing reached the store
    let records = AuditRepository::new(&app.db)
        .query(&AuditQuery::default())
        .await
        .unwrap();
    assert!(records.is_empty());
}

#[tokio::test]
async fn test_correlation_context_is_persisted() {
    let app = TestApp::new().await;
    let capture = app.capture();

    let mut ev = event(
        AuditOperation::Created,
        None,
        Some(snapshot(json!({"id": "r1"}))),
    );
    ev.correlation = Some(CorrelationContext {
        session_id: Some("sess-9".to_string()),
        origin_address: Some("10.0.0.8".to_string()),
        client_label: Some("admin-ui".to_string()),
    });
    capture.record(ev).await.unwrap();

    let records = AuditRepository::new(&app.db)
        .query(&AuditQuery::default())
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].correlation.session_id.as_deref(), Some("sess-9"));
    assert_eq!(
        records[0].correlation.origin_address.as_deref(),
        Some("10.0.0.8")
    );
    assert_eq!(
        records[0].correlation.client_label.as_deref(),
        Some("admin-ui")
    );
}

#[tokio::test]
async fn test_query_filters_by_entity_type_and_caps_results() {
    let app = TestApp::new().await;
    let capture = app.capture();

    for i in 0..3 {
        capture
            .record(event(
                AuditOperation::Created,
                None,
                Some(snapshot(json!({"id": format!("c{i}")}))),
            ))
            .await
            .unwrap();
    }
    let mut order_event = event(
        AuditOperation::Created,
        None,
        Some(snapshot(json!({"id": "o1"}))),
    );
    order_event.entity_type = "order".to_string();
    capture.record(order_event).await.unwrap();

    let repo = AuditRepository::new(&app.db);

    let customers = repo
        .query(&AuditQuery {
            entity_type: Some("customer".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(customers.len(), 3);
    assert!(customers.iter().all(|r| r.entity_type == "customer"));

    let capped = repo
        .query(&AuditQuery {
            entity_type: Some("customer".to_string()),
            limit: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(capped.len(), 1);
    assert_eq!(capped[0].record_id, "c2");
}

#[tokio::test]
async fn test_query_timestamp_range() {
    let app = TestApp::new().await;
    let capture = app.capture();
    let repo = AuditRepository::new(&app.db);

    let old = capture
        .record(event(
            AuditOperation::Created,
            None,
            Some(snapshot(json!({"id": "old"}))),
        ))
        .await
        .unwrap()
        .unwrap();
    backdate_audit_record(&app.db, old.id, days_ago(10)).await;

    let mid = capture
        .record(event(
            AuditOperation::Created,
            None,
            Some(snapshot(json!({"id": "mid"}))),
        ))
        .await
        .unwrap()
        .unwrap();
    backdate_audit_record(&app.db, mid.id, days_ago(5)).await;

    capture
        .record(event(
            AuditOperation::Created,
            None,
            Some(snapshot(json!({"id": "fresh"}))),
        ))
        .await
        .unwrap();

    let recent = repo
        .query(&AuditQuery {
            from: Some(days_ago(7)),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].record_id, "fresh");
    assert_eq!(recent[1].record_id, "mid");

    let window = repo
        .query(&AuditQuery {
            from: Some(days_ago(7)),
            to: Some(days_ago(1)),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(window.len(), 1);
    assert_eq!(window[0].record_id, "mid");
}
