//! Sync Executor
//!
//! Claims due jobs from the `sync_jobs` queue, dispatches them to the handler
//! registered for their `job_type`, and records the outcome. Successful jobs
//! may hand back a follow-up job which is enqueued in the same transaction
//! that marks the current one succeeded. Failed jobs are re-queued with
//! exponential backoff and jitter until `max_attempts` is reached.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use metrics::{counter, histogram};
use rand::{Rng, thread_rng};
use sea_orm::prelude::*;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use serde_json::json;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{ExecutorConfig, JobRetryPolicyConfig};
use crate::db::to_db_time;
use crate::error::SyncError;
use crate::models::sync_job::{
    self, ActiveModel as SyncJobActiveModel, Entity as SyncJobEntity, STATUS_FAILED,
    STATUS_QUEUED, STATUS_RUNNING, STATUS_SUCCEEDED,
};
use crate::repositories::SyncJobRepository;
use crate::repositories::sync_job::{self as job_queue, NewJob};
use crate::sync_state::MAX_RETRY_AFTER_SECS;

/// What a handler hands back after a successful run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobOutcome {
    /// Enqueued atomically with marking the current job succeeded.
    pub follow_up: Option<NewJob>,
}

impl JobOutcome {
    pub fn done() -> Self {
        Self::default()
    }

    pub fn then(follow_up: NewJob) -> Self {
        Self {
            follow_up: Some(follow_up),
        }
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;

    async fn handle(&self, job: &sync_job::Model) -> Result<JobOutcome, SyncError>;
}

/// Why a job attempt failed.
#[derive(Debug)]
enum JobFailure {
    Handler(SyncError),
    TimedOut(u64),
    UnknownType,
}

impl JobFailure {
    fn message(&self, job: &sync_job::Model) -> String {
        match self {
            JobFailure::Handler(err) => err.to_string(),
            JobFailure::TimedOut(secs) => format!("job timed out after {secs}s"),
            JobFailure::UnknownType => format!("no handler registered for '{}'", job.job_type),
        }
    }

    fn is_permanent(&self) -> bool {
        match self {
            JobFailure::Handler(err) => !err.is_retryable(),
            JobFailure::TimedOut(_) => false,
            JobFailure::UnknownType => true,
        }
    }

    fn sync_error(&self) -> Option<&SyncError> {
        match self {
            JobFailure::Handler(err) => Some(err),
            _ => None,
        }
    }
}

/// Counters for one executor drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    pub claimed: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub failed: u64,
    /// Jobs whose outcome could not be recorded; they stay `running` until reclaimed.
    pub unrecorded: u64,
    /// Stranded `running` jobs put back on the queue.
    pub reclaimed: u64,
}

impl ExecutorStats {
    fn absorb(&mut self, other: ExecutorStats) {
        self.claimed += other.claimed;
        self.succeeded += other.succeeded;
        self.retried += other.retried;
        self.failed += other.failed;
        self.unrecorded += other.unrecorded;
        self.reclaimed += other.reclaimed;
    }
}

/// Slack added on top of the longest time a claimed batch can legitimately
/// hold a job before it is treated as stranded.
pub const RECLAIM_GRACE_SECS: u64 = 60;

#[derive(Clone)]
pub struct JobExecutor {
    db: Arc<DatabaseConnection>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    config: ExecutorConfig,
    retry_policy: JobRetryPolicyConfig,
}

impl JobExecutor {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: ExecutorConfig,
        retry_policy: JobRetryPolicyConfig,
    ) -> Self {
        Self {
            db,
            handlers: HashMap::new(),
            config,
            retry_policy,
        }
    }

    pub fn register(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(handler.job_type(), handler);
        self
    }

    /// Seconds to wait before the next attempt: `base * 2^prior_failures`
    /// capped at `max`, raised to any `Retry-After` hint, plus jitter.
    pub fn calculate_backoff(&self, error: Option<&SyncError>, prior_failures: i32) -> f64 {
        let base = self.retry_policy.base_seconds as f64;
        let max = self.retry_policy.max_seconds as f64;

        let mut backoff = (base * 2_f64.powi(prior_failures.max(0))).min(max);
        if let Some(retry_after) = error.and_then(SyncError::retry_after_secs) {
            backoff = backoff.max(retry_after.min(MAX_RETRY_AFTER_SECS) as f64);
        }

        let jitter_span = self.retry_policy.jitter_factor * backoff;
        let jitter = if jitter_span > 0.0 {
            thread_rng().gen_range(0.0..jitter_span)
        } else {
            0.0
        };
        backoff + jitter
    }

    /// Polls the queue every `tick_ms` until `shutdown` fires.
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(config = ?self.config, "Starting job executor");
        let tick = Duration::from_millis(self.config.tick_ms);

        loop {
            let started = std::time::Instant::now();
            match self.claim_and_run_jobs().await {
                Ok(stats) if stats.claimed > 0 => debug!(?stats, "Executor tick completed"),
                Ok(_) => {}
                Err(err) => error!(error = %err, "Executor tick failed"),
            }

            let elapsed = started.elapsed();
            let wait = tick.saturating_sub(elapsed);
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Job executor shutdown requested");
                    break;
                }
                _ = sleep(wait) => {}
            }
        }

        info!("Job executor stopped");
    }

    /// Runs jobs until no queued job remains, sleeping until the next one
    /// becomes visible. Returns early when `shutdown` fires.
    #[instrument(skip_all)]
    pub async fn run_until_idle(
        &self,
        shutdown: CancellationToken,
    ) -> Result<ExecutorStats, SyncError> {
        let jobs = SyncJobRepository::new(self.db.clone());
        let mut total = ExecutorStats::default();

        while !shutdown.is_cancelled() {
            let stats = self.claim_and_run_jobs().await?;
            total.absorb(stats);
            if stats.claimed > 0 || stats.reclaimed > 0 {
                continue;
            }

            let Some(next_due) = jobs.next_due_at().await? else {
                break;
            };
            let wait = (next_due - Utc::now()).to_std().unwrap_or_default();
            if wait.is_zero() {
                continue;
            }
            debug!(wait_ms = wait.as_millis() as u64, "Waiting for next scheduled job");
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(wait) => {}
            }
        }

        info!(
            claimed = total.claimed,
            succeeded = total.succeeded,
            retried = total.retried,
            failed = total.failed,
            unrecorded = total.unrecorded,
            "Job queue drained"
        );
        Ok(total)
    }

    /// Claims one batch of due jobs and runs them sequentially.
    #[instrument(skip(self), fields(batch_size = self.config.claim_batch))]
    pub async fn claim_and_run_jobs(&self) -> Result<ExecutorStats, SyncError> {
        let reclaimed = self.reclaim_stranded_jobs().await?;
        let jobs = self.claim_jobs().await?;
        let mut stats = ExecutorStats {
            claimed: jobs.len() as u64,
            reclaimed,
            ..ExecutorStats::default()
        };

        for job in jobs {
            let job_id = job.id;
            let job_type = job.job_type.clone();
            match self.run_single_job(job).await {
                Ok(JobResult::Succeeded) => stats.succeeded += 1,
                Ok(JobResult::Retried) => stats.retried += 1,
                Ok(JobResult::Failed) => stats.failed += 1,
                Err(err) => {
                    stats.unrecorded += 1;
                    counter!("gamesync_jobs_total", "job_type" => job_type, "result" => "unrecorded")
                        .increment(1);
                    error!(%job_id, error = %err, "Failed to record job outcome");
                }
            }
        }

        Ok(stats)
    }

    /// Seconds after which a `running` job is considered abandoned by the
    /// worker that claimed it.
    fn stranded_after_secs(&self) -> u64 {
        self.config
            .max_run_seconds
            .saturating_mul(self.config.claim_batch.max(1))
            .saturating_add(RECLAIM_GRACE_SECS)
    }

    /// Puts jobs stuck in `running` past their lease back on the queue, or
    /// fails them when their attempts are used up.
    async fn reclaim_stranded_jobs(&self) -> Result<u64, SyncError> {
        let now = Utc::now();
        let lease = i64::try_from(self.stranded_after_secs()).unwrap_or(i64::MAX);
        let Some(cutoff) = chrono::Duration::try_seconds(lease)
            .and_then(|lease| now.checked_sub_signed(lease))
        else {
            return Ok(0);
        };
        let (now, cutoff) = (to_db_time(now), to_db_time(cutoff));
        let stranded = || {
            sync_job::Column::Status
                .eq(STATUS_RUNNING)
                .and(sync_job::Column::StartedAt.lt(cutoff))
        };
        let reason = json!({
            "message": "job abandoned while running",
            "timestamp": now.to_rfc3339(),
        });

        let txn = self.db.begin().await?;
        let failed = SyncJobEntity::update_many()
            .col_expr(sync_job::Column::Status, Expr::value(STATUS_FAILED))
            .col_expr(sync_job::Column::FinishedAt, Expr::value(now))
            .col_expr(sync_job::Column::UpdatedAt, Expr::value(now))
            .col_expr(sync_job::Column::Error, Expr::value(reason))
            .filter(stranded())
            .filter(sync_job::Column::Attempts.gte(self.config.max_attempts))
            .exec(&txn)
            .await?
            .rows_affected;
        let requeued = SyncJobEntity::update_many()
            .col_expr(sync_job::Column::Status, Expr::value(STATUS_QUEUED))
            .col_expr(sync_job::Column::UpdatedAt, Expr::value(now))
            .filter(stranded())
            .exec(&txn)
            .await?
            .rows_affected;
        txn.commit().await?;

        if failed + requeued > 0 {
            counter!("gamesync_jobs_reclaimed_total").increment(failed + requeued);
            warn!(requeued, failed, "Reclaimed jobs stranded in running state");
        }
        Ok(failed + requeued)
    }

    /// Marks due queued jobs running and returns them, highest priority first.
    async fn claim_jobs(&self) -> Result<Vec<sync_job::Model>, SyncError> {
        let now = to_db_time(Utc::now());
        let txn = self.db.begin().await?;

        let eligible: Vec<Uuid> = SyncJobEntity::find()
            .select_only()
            .column(sync_job::Column::Id)
            .filter(sync_job::Column::Status.eq(STATUS_QUEUED))
            .filter(sync_job::Column::ScheduledAt.lte(now))
            .filter(
                sync_job::Column::RetryAfter
                    .is_null()
                    .or(sync_job::Column::RetryAfter.lte(now)),
            )
            .order_by_desc(sync_job::Column::Priority)
            .order_by_asc(sync_job::Column::ScheduledAt)
            .limit(self.config.claim_batch)
            .into_tuple::<Uuid>()
            .all(&txn)
            .await?;

        if eligible.is_empty() {
            txn.commit().await?;
            return Ok(Vec::new());
        }

        SyncJobEntity::update_many()
            .col_expr(sync_job::Column::Status, Expr::value(STATUS_RUNNING))
            .col_expr(sync_job::Column::StartedAt, Expr::value(now))
            .col_expr(sync_job::Column::UpdatedAt, Expr::value(now))
            .col_expr(
                sync_job::Column::Attempts,
                Expr::col(sync_job::Column::Attempts).add(1),
            )
            .filter(sync_job::Column::Id.is_in(eligible.clone()))
            .filter(sync_job::Column::Status.eq(STATUS_QUEUED))
            .exec(&txn)
            .await?;

        let claimed = SyncJobEntity::find()
            .filter(sync_job::Column::Id.is_in(eligible))
            .filter(sync_job::Column::Status.eq(STATUS_RUNNING))
            .order_by_desc(sync_job::Column::Priority)
            .order_by_asc(sync_job::Column::ScheduledAt)
            .all(&txn)
            .await?;

        txn.commit().await?;
        Ok(claimed)
    }

    #[instrument(skip(self), fields(job_id = %job.id, job_type = %job.job_type, attempt = job.attempts))]
    async fn run_single_job(&self, job: sync_job::Model) -> Result<JobResult, SyncError> {
        let started = std::time::Instant::now();

        let result = match self.handlers.get(job.job_type.as_str()) {
            None => Err(JobFailure::UnknownType),
            Some(handler) => {
                let limit = self.config.max_run_seconds;
                match tokio::time::timeout(Duration::from_secs(limit), handler.handle(&job)).await
                {
                    Ok(Ok(outcome)) => Ok(outcome),
                    Ok(Err(err)) => Err(JobFailure::Handler(err)),
                    Err(_) => Err(JobFailure::TimedOut(limit)),
                }
            }
        };

        histogram!("gamesync_job_duration_ms", "job_type" => job.job_type.clone())
            .record(started.elapsed().as_secs_f64() * 1_000.0);

        match result {
            Ok(outcome) => {
                self.handle_success(&job, outcome).await?;
                counter!("gamesync_jobs_total", "job_type" => job.job_type.clone(), "result" => "succeeded")
                    .increment(1);
                Ok(JobResult::Succeeded)
            }
            Err(failure) => {
                let result = self.handle_failure(&job, &failure).await?;
                let label = match result {
                    JobResult::Retried => "retried",
                    _ => "failed",
                };
                counter!("gamesync_jobs_total", "job_type" => job.job_type.clone(), "result" => label)
                    .increment(1);
                Ok(result)
            }
        }
    }

    async fn handle_success(
        &self,
        job: &sync_job::Model,
        outcome: JobOutcome,
    ) -> Result<(), SyncError> {
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let mut active: SyncJobActiveModel = job.clone().into();
        active.status = Set(STATUS_SUCCEEDED.to_string());
        active.finished_at = Set(Some(to_db_time(now)));
        active.retry_after = Set(None);
        active.updated_at = Set(to_db_time(now));
        active.update(&txn).await?;

        let follow_up = match outcome.follow_up {
            Some(next) => job_queue::enqueue(&txn, next).await?,
            None => None,
        };

        txn.commit().await?;

        debug!(job_id = %job.id, follow_up = ?follow_up, "Job succeeded");
        Ok(())
    }

    async fn handle_failure(
        &self,
        job: &sync_job::Model,
        failure: &JobFailure,
    ) -> Result<JobResult, SyncError> {
        let now = Utc::now();
        let message = failure.message(job);

        // job.attempts already includes the current attempt (incremented during claim)
        let attempts = job.attempts.max(1);
        let exhausted = attempts >= self.config.max_attempts;
        let permanent = failure.is_permanent() || exhausted;

        let mut details = match failure.sync_error() {
            Some(err) => err.to_details(),
            None => json!({ "message": message }),
        };
        details["attempts"] = json!(attempts);
        details["timestamp"] = json!(now.to_rfc3339());

        let mut active: SyncJobActiveModel = job.clone().into();
        active.updated_at = Set(to_db_time(now));

        let result = if permanent {
            active.status = Set(STATUS_FAILED.to_string());
            active.finished_at = Set(Some(to_db_time(now)));
            active.retry_after = Set(None);
            error!(job_id = %job.id, attempts, error = %message, "Job failed permanently");
            JobResult::Failed
        } else {
            let backoff = self.calculate_backoff(failure.sync_error(), attempts - 1);
            let retry_after = now + chrono::Duration::milliseconds((backoff * 1_000.0) as i64);
            details["backoff_seconds"] = json!(backoff);
            active.status = Set(STATUS_QUEUED.to_string());
            active.retry_after = Set(Some(to_db_time(retry_after)));
            warn!(
                job_id = %job.id,
                attempts,
                backoff_seconds = backoff,
                error = %message,
                "Job failed; retrying"
            );
            JobResult::Retried
        };

        active.error = Set(Some(details));
        active.update(self.db.as_ref()).await?;
        Ok(result)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobResult {
    Succeeded,
    Retried,
    Failed,
}
