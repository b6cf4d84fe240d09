//! Retention sweeper
//!
//! Executes registered retention policies: per policy, scan the target store
//! for rows older than the age cutoff, apply the policy's action, append one
//! cleanup ledger entry, and update the policy's last-run timestamp. Policies
//! run concurrently across entity types but never concurrently for the same
//! entity type; an overlapping sweep finds the per-policy lock held and skips
//! that policy for the tick.
//!
//! Sweeps are idempotent: purge removes rows from the eligibility scan,
//! anonymize stamps them out of it, so a re-run after a crash (or an
//! immediate second run) finds zero eligible rows and logs a zero-count
//! ledger entry.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use cron::Schedule;
use futures::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::RetentionConfig;
use crate::db::{AuditRepository, DbPool, EntityStore, RetentionRepository};
use crate::models::{
    NewCleanupLedgerEntry, PolicyTarget, RetentionAction, RetentionPolicy,
};
use crate::services::diff::anonymize_snapshot;
use crate::utils::EngineResult;

/// Result of sweeping one policy
#[derive(Debug)]
pub struct SweepOutcome {
    pub policy_id: Uuid,
    pub entity_type: String,
    pub target: PolicyTarget,
    pub action: RetentionAction,
    /// Rows successfully purged or anonymized
    pub affected: u64,
    /// Rows whose action failed; they stay eligible for the next tick
    pub failed: u64,
    /// Another sweep for this policy was already in flight
    pub skipped: bool,
    /// The wall-clock budget ran out before the scan was exhausted
    pub out_of_budget: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl SweepOutcome {
    fn start(policy: &RetentionPolicy) -> Self {
        Self {
            policy_id: policy.id,
            entity_type: policy.entity_type.clone(),
            target: policy.target,
            action: policy.action,
            affected: 0,
            failed: 0,
            skipped: false,
            out_of_budget: false,
            error: None,
            duration_ms: 0,
        }
    }
}

/// Scheduled retention enforcement over all registered policies
pub struct RetentionSweeper {
    pool: DbPool,
    entities: Arc<dyn EntityStore>,
    config: RetentionConfig,
    /// Per-entity-type sweep locks; held for the duration of scan+act+log
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RetentionSweeper {
    pub fn new(pool: DbPool, entities: Arc<dyn EntityStore>, config: RetentionConfig) -> Self {
        Self {
            pool,
            entities,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Sweep every registered policy, concurrently across entity types.
    pub async fn run_all(&self) -> EngineResult<Vec<SweepOutcome>> {
        let policies = RetentionRepository::new(&self.pool).list_policies().await?;

        info!("Running retention sweep for {} policies", policies.len());

        let outcomes = join_all(
            policies
                .into_iter()
                .map(|policy| self.run_policy(policy)),
        )
        .await;

        Ok(outcomes)
    }

    /// Sweep the policy registered for a single entity type.
    pub async fn run_entity_type(&self, entity_type: &str) -> EngineResult<SweepOutcome> {
        let policy = RetentionRepository::new(&self.pool)
            .get_policy(entity_type)
            .await?
            .ok_or_else(|| {
                crate::utils::EngineError::NotFound(format!(
                    "no retention policy for entity type '{entity_type}'"
                ))
            })?;

        Ok(self.run_policy(policy).await)
    }

    /// Execute one policy: scan, act, append the ledger entry, touch
    /// last-run. Never overlaps with another sweep of the same policy.
    pub async fn run_policy(&self, policy: RetentionPolicy) -> SweepOutcome {
        let mut outcome = SweepOutcome::start(&policy);

        let lock = self.lock_for(&policy.entity_type).await;
        let guard = lock.try_lock();
        if guard.is_err() {
            warn!(
                entity_type = %policy.entity_type,
                "Sweep already in flight for this policy, skipping this tick"
            );
            outcome.skipped = true;
            return outcome;
        }

        let started = Instant::now();
        let cutoff = policy.cutoff(Utc::now());

        info!(
            entity_type = %policy.entity_type,
            action = %policy.action,
            target = %policy.target,
            %cutoff,
            "Starting retention sweep"
        );

        let result = match policy.target {
            PolicyTarget::AuditLog => self
                .sweep_audit_log(&policy, cutoff)
                .await
                .map(|affected| (affected, 0, false)),
            PolicyTarget::Entities => self.sweep_entities(&policy, cutoff, started).await,
        };

        outcome.duration_ms = started.elapsed().as_millis() as u64;

        let (affected, failed, out_of_budget) = match result {
            Ok(counts) => counts,
            Err(e) => {
                error!(
                    entity_type = %policy.entity_type,
                    "Retention sweep failed: {e:#}"
                );
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };

        outcome.affected = affected;
        outcome.failed = failed;
        outcome.out_of_budget = out_of_budget;

        let retention = RetentionRepository::new(&self.pool);
        let entry = retention
            .append_ledger(&NewCleanupLedgerEntry {
                policy_id: Some(policy.id),
                entity_type: policy.entity_type.clone(),
                action: policy.action.into(),
                affected_count: affected as i64,
                failed_count: failed as i64,
                requested_by: None,
            })
            .await;

        if let Err(e) = entry {
            // Without a ledger entry the sweep does not count as completed;
            // the next tick re-runs the same cutoff against rows the action
            // has already made ineligible.
            error!(
                entity_type = %policy.entity_type,
                "Failed to append cleanup ledger entry: {e:#}"
            );
            outcome.error = Some(e.to_string());
            return outcome;
        }

        if let Err(e) = retention
            .touch_last_run(&policy.entity_type, Utc::now())
            .await
        {
            error!(
                entity_type = %policy.entity_type,
                "Failed to update policy last-run timestamp: {e:#}"
            );
        }

        info!(
            entity_type = %policy.entity_type,
            affected,
            failed,
            out_of_budget,
            duration_ms = outcome.duration_ms,
            "Retention sweep complete"
        );

        outcome
    }

    /// Batched scan/act loop against the monitored entity store.
    async fn sweep_entities(
        &self,
        policy: &RetentionPolicy,
        cutoff: DateTime<Utc>,
        started: Instant,
    ) -> anyhow::Result<(u64, u64, bool)> {
        let budget = Duration::from_secs(self.config.time_budget_secs);
        let mut affected = 0u64;
        let mut failed_ids: HashSet<String> = HashSet::new();
        let mut out_of_budget = false;

        loop {
            // The budget is checked between batches; a started batch always
            // finishes before the ledger entry is written.
            if started.elapsed() >= budget {
                warn!(
                    entity_type = %policy.entity_type,
                    "Sweep wall-clock budget exhausted, resuming on next tick"
                );
                out_of_budget = true;
                break;
            }

            let include_anonymized = policy.action == RetentionAction::Purge;
            let rows = self
                .entities
                .scan_eligible(
                    &policy.entity_type,
                    cutoff,
                    include_anonymized,
                    self.config.batch_size,
                )
                .await?;

            let batch: Vec<_> = rows
                .into_iter()
                .filter(|row| !failed_ids.contains(&row.record_id))
                .collect();
            if batch.is_empty() {
                break;
            }

            let mut batch_affected = 0u64;
            for row in batch {
                let result = match policy.action {
                    RetentionAction::Purge => self
                        .entities
                        .purge(&policy.entity_type, &row.record_id)
                        .await
                        .map(|_| ()),
                    RetentionAction::Anonymize => {
                        let snapshot = anonymize_snapshot(
                            &row.snapshot,
                            &policy.identifying_fields,
                            &self.config.sentinel,
                        );
                        self.entities
                            .anonymize(&policy.entity_type, &row.record_id, &snapshot)
                            .await
                            .map(|_| ())
                    }
                };

                match result {
                    Ok(()) => {
                        batch_affected += 1;
                        affected += 1;
                    }
                    Err(e) => {
                        // Excluded from the success count and left eligible
                        // for the next tick.
                        error!(
                            entity_type = %policy.entity_type,
                            record_id = %row.record_id,
                            "Failed to {} record: {e:#}",
                            policy.action
                        );
                        failed_ids.insert(row.record_id);
                    }
                }
            }

            if batch_affected == 0 {
                break;
            }
        }

        Ok((affected, failed_ids.len() as u64, out_of_budget))
    }

    /// Single bounded statement against the audit log itself.
    async fn sweep_audit_log(
        &self,
        policy: &RetentionPolicy,
        cutoff: DateTime<Utc>,
    ) -> anyhow::Result<u64> {
        let repo = AuditRepository::new(&self.pool);
        match policy.action {
            RetentionAction::Purge => repo.purge_older_than(&policy.entity_type, cutoff).await,
            RetentionAction::Anonymize => {
                repo.anonymize_older_than(&policy.entity_type, cutoff, &self.config.sentinel)
                    .await
            }
        }
    }

    async fn lock_for(&self, entity_type: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(entity_type.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Scheduler state for the background sweep task
#[derive(Clone)]
pub struct RetentionSchedulerState {
    running: Arc<RwLock<bool>>,
}

impl RetentionSchedulerState {
    fn new() -> Self {
        Self {
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        info!("Retention scheduler stop requested");
    }
}

/// Start the background retention scheduler.
///
/// Spawns a task that sleeps until the next occurrence of the configured
/// cron schedule, then runs every registered policy.
pub fn start_retention_scheduler(sweeper: Arc<RetentionSweeper>) -> RetentionSchedulerState {
    let state = RetentionSchedulerState::new();

    if !sweeper.config.enabled {
        info!("Retention scheduler disabled by configuration");
        return state;
    }

    let task_state = state.clone();

    tokio::spawn(async move {
        scheduler_task(sweeper, task_state).await;
    });

    info!("Retention scheduler started");
    state
}

async fn scheduler_task(sweeper: Arc<RetentionSweeper>, state: RetentionSchedulerState) {
    {
        let mut running = state.running.write().await;
        *running = true;
    }

    loop {
        let Some(next) = next_occurrence(&sweeper.config.sweep_schedule) else {
            error!(
                schedule = %sweeper.config.sweep_schedule,
                "Invalid sweep schedule, retention scheduler exiting"
            );
            break;
        };

        let wait = (next - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        debug!("Next retention sweep at {next}");
        tokio::time::sleep(wait).await;

        if !state.is_running().await {
            info!("Retention scheduler stopping");
            break;
        }

        match sweeper.run_all().await {
            Ok(outcomes) => {
                let affected: u64 = outcomes.iter().map(|o| o.affected).sum();
                let failed: u64 = outcomes.iter().map(|o| o.failed).sum();
                info!(
                    policies = outcomes.len(),
                    affected, failed, "Scheduled retention sweep finished"
                );
            }
            Err(e) => {
                error!("Scheduled retention sweep failed: {e}");
            }
        }
    }
}

/// Next occurrence of a cron expression, if it is valid
pub fn next_occurrence(cron_expr: &str) -> Option<DateTime<Utc>> {
    let schedule = match Schedule::from_str(cron_expr) {
        Ok(s) => s,
        Err(e) => {
            warn!("Invalid cron expression '{cron_expr}': {e}");
            return None;
        }
    };

    schedule.upcoming(Utc).next()
}
