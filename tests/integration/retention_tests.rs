//! Retention policy registry and sweeper integration tests

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use datatrail::db::{AuditRepository, EntityStore, RetentionRepository};
use datatrail::models::{
    AuditOperation, AuditQuery, LedgerAction, MutationEvent, PolicyTarget, RetentionAction,
    RetentionPolicyInput,
};
use datatrail::services::{start_retention_scheduler, RetentionSweeper};
use datatrail::EngineError;
use uuid::Uuid;

use crate::common::{backdate_audit_record, customer, days_ago, snapshot, TestApp};

fn policy_input(
    entity_type: &str,
    action: RetentionAction,
    max_age_days: i64,
) -> RetentionPolicyInput {
    RetentionPolicyInput {
        id: None,
        entity_type: entity_type.to_string(),
        target: PolicyTarget::Entities,
        action,
        max_age_days,
        identifying_fields: vec![],
    }
}

#[tokio::test]
async fn test_upsert_policy_is_last_write_wins_per_entity_type() {
    let app = TestApp::new().await;
    let repo = RetentionRepository::new(&app.db);

    let first = repo
        .upsert_policy(&policy_input("customer", RetentionAction::Purge, 30))
        .await
        .unwrap();

    let mut replacement = policy_input("customer", RetentionAction::Anonymize, 90);
    replacement.identifying_fields = vec!["email".to_string()];
    let second = repo.upsert_policy(&replacement).await.unwrap();

    // Same policy identity, new rule
    assert_eq!(first.id, second.id);
    assert_eq!(second.action, RetentionAction::Anonymize);
    assert_eq!(second.max_age_days, 90);

    let policies = repo.list_policies().await.unwrap();
    assert_eq!(policies.len(), 1);
    assert_eq!(policies[0].identifying_fields, vec!["email".to_string()]);
}

#[tokio::test]
async fn test_upsert_with_foreign_id_is_a_conflict() {
    let app = TestApp::new().await;
    let repo = RetentionRepository::new(&app.db);

    repo.upsert_policy(&policy_input("customer", RetentionAction::Purge, 30))
        .await
        .unwrap();

    let mut conflicting = policy_input("customer", RetentionAction::Purge, 60);
    conflicting.id = Some(Uuid::new_v4());
    let err = repo.upsert_policy(&conflicting).await.unwrap_err();
    assert!(matches!(err, EngineError::PolicyConflict(_)));
}

#[tokio::test]
async fn test_policy_validation() {
    let app = TestApp::new().await;
    let repo = RetentionRepository::new(&app.db);

    let err = repo
        .upsert_policy(&policy_input("customer", RetentionAction::Purge, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let err = repo
        .upsert_policy(&policy_input("", RetentionAction::Purge, 30))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn test_delete_policy() {
    let app = TestApp::new().await;
    let repo = RetentionRepository::new(&app.db);

    repo.upsert_policy(&policy_input("customer", RetentionAction::Purge, 30))
        .await
        .unwrap();

    assert!(repo.delete_policy("customer").await.unwrap());
    assert!(!repo.delete_policy("customer").await.unwrap());
    assert!(repo.get_policy("customer").await.unwrap().is_none());
}

#[tokio::test]
async fn test_sweep_purges_only_records_past_the_cutoff() {
    let app = TestApp::new().await;
    let repo = RetentionRepository::new(&app.db);

    let policy = repo
        .upsert_policy(&policy_input("customer", RetentionAction::Purge, 30))
        .await
        .unwrap();

    app.entities
        .upsert_record("customer", "old", &customer("old", "old@a.com", 1), days_ago(31))
        .await
        .unwrap();
    app.entities
        .upsert_record(
            "customer",
            "young",
            &customer("young", "young@a.com", 2),
            days_ago(29),
        )
        .await
        .unwrap();

    let outcomes = app.sweeper().run_all().await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].affected, 1);
    assert_eq!(outcomes[0].failed, 0);
    assert!(!outcomes[0].skipped);

    assert!(app
        .entities
        .fetch("customer", "old")
        .await
        .unwrap()
        .is_none());
    assert!(app
        .entities
        .fetch("customer", "young")
        .await
        .unwrap()
        .is_some());

    let ledger = repo.list_ledger(Some(policy.id), 10).await.unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].action, LedgerAction::Purge);
    assert_eq!(ledger[0].affected_count, 1);
    assert_eq!(ledger[0].failed_count, 0);
    assert!(ledger[0].requested_by.is_none());

    let updated_policy = repo.get_policy("customer").await.unwrap().unwrap();
    assert!(updated_policy.last_run_at.is_some());
}

#[tokio::test]
async fn test_second_sweep_is_an_observable_noop() {
    let app = TestApp::new().await;
    let repo = RetentionRepository::new(&app.db);

    let policy = repo
        .upsert_policy(&policy_input("customer", RetentionAction::Purge, 30))
        .await
        .unwrap();
    app.entities
        .upsert_record("customer", "old", &customer("old", "old@a.com", 1), days_ago(31))
        .await
        .unwrap();

    let sweeper = app.sweeper();
    sweeper.run_all().await.unwrap();
    let outcomes = sweeper.run_all().await.unwrap();
    assert_eq!(outcomes[0].affected, 0);

    // The no-op run is observable: a second ledger entry with count zero
    let ledger = repo.list_ledger(Some(policy.id), 10).await.unwrap();
    assert_eq!(ledger.len(), 2);
    assert_eq!(ledger[0].affected_count, 0);
    assert_eq!(ledger[1].affected_count, 1);
}

#[tokio::test]
async fn test_sweep_with_no_eligible_rows_still_writes_a_ledger_entry() {
    let app = TestApp::new().await;
    let repo = RetentionRepository::new(&app.db);

    let policy = repo
        .upsert_policy(&policy_input("customer", RetentionAction::Purge, 30))
        .await
        .unwrap();

    let outcomes = app.sweeper().run_all().await.unwrap();
    assert_eq!(outcomes[0].affected, 0);

    let ledger = repo.list_ledger(Some(policy.id), 10).await.unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].affected_count, 0);
}

#[tokio::test]
async fn test_anonymize_sweep_preserves_non_identifying_fields() {
    let app = TestApp::new().await;
    let repo = RetentionRepository::new(&app.db);

    let mut input = policy_input("customer", RetentionAction::Anonymize, 30);
    input.identifying_fields = vec!["email".to_string()];
    let policy = repo.upsert_policy(&input).await.unwrap();

    app.entities
        .upsert_record("customer", "r2", &customer("r2", "a@b.com", 5), days_ago(40))
        .await
        .unwrap();

    let sweeper = app.sweeper();
    let outcomes = sweeper.run_all().await.unwrap();
    assert_eq!(outcomes[0].affected, 1);

    let stored = app
        .entities
        .fetch("customer", "r2")
        .await
        .unwrap()
        .expect("anonymized record still exists");
    assert_eq!(stored.snapshot.get("email"), Some(&json!("anonymized")));
    assert_eq!(stored.snapshot.get("order_count"), Some(&json!(5)));
    assert!(stored.anonymized_at.is_some());

    // Anonymized rows no longer match the eligibility predicate
    let outcomes = sweeper.run_all().await.unwrap();
    assert_eq!(outcomes[0].affected, 0);

    let ledger = repo.list_ledger(Some(policy.id), 10).await.unwrap();
    assert_eq!(ledger.len(), 2);
    assert_eq!(ledger[0].affected_count, 0);
}

#[tokio::test]
async fn test_audit_log_retention_policy() {
    let app = TestApp::new().await;
    let repo = RetentionRepository::new(&app.db);
    let capture = app.capture();

    let mut input = policy_input("session", RetentionAction::Purge, 30);
    input.target = PolicyTarget::AuditLog;
    let policy = repo.upsert_policy(&input).await.unwrap();

    let stale = capture
        .record(MutationEvent {
            entity_type: "session".to_string(),
            operation: AuditOperation::Created,
            before: None,
            after: Some(snapshot(json!({"id": "s1"}))),
            principal: "svc-auth".to_string(),
            correlation: None,
        })
        .await
        .unwrap()
        .unwrap();
    backdate_audit_record(&app.db, stale.id, days_ago(45)).await;

    capture
        .record(MutationEvent {
            entity_type: "session".to_string(),
            operation: AuditOperation::Created,
            before: None,
            after: Some(snapshot(json!({"id": "s2"}))),
            principal: "svc-auth".to_string(),
            correlation: None,
        })
        .await
        .unwrap();

    let outcomes = app.sweeper().run_all().await.unwrap();
    assert_eq!(outcomes[0].affected, 1);

    let remaining = AuditRepository::new(&app.db)
        .query(&AuditQuery {
            entity_type: Some("session".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].record_id, "s2");

    let ledger = repo.list_ledger(Some(policy.id), 10).await.unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].affected_count, 1);
}

#[tokio::test]
async fn test_run_entity_type_without_policy_is_not_found() {
    let app = TestApp::new().await;

    let err = app.sweeper().run_entity_type("missing").await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn test_scheduler_start_and_stop() {
    let app = TestApp::new().await;

    let mut retention = app.config.retention.clone();
    retention.enabled = true;
    let sweeper = Arc::new(RetentionSweeper::new(
        app.db.clone(),
        app.entities.clone(),
        retention,
    ));

    let state = start_retention_scheduler(sweeper);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(state.is_running().await);

    state.stop().await;
    assert!(!state.is_running().await);
}

#[tokio::test]
async fn test_scheduler_honors_disabled_config() {
    let app = TestApp::new().await;

    // Test config has the scheduler disabled
    let sweeper = Arc::new(RetentionSweeper::new(
        app.db.clone(),
        app.entities.clone(),
        app.config.retention.clone(),
    ));

    let state = start_retention_scheduler(sweeper);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!state.is_running().await);
}
