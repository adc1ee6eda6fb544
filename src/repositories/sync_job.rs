//! # SyncJob Repository
//!
//! Enqueue and inspection helpers for the `sync_jobs` queue. Claiming and
//! completion live in [`crate::sync_executor`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde_json::Value as JsonValue;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::to_db_time;
use crate::error::{SyncError, is_unique_violation};
use crate::models::sync_job::{
    self, ActiveModel, Column, Entity as SyncJob, STATUS_QUEUED, STATUS_RUNNING,
};

/// A job to be inserted into the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub job_type: String,
    pub priority: i16,
    pub scheduled_at: DateTime<Utc>,
    /// At most one queued or running job may carry the same key.
    pub dedupe_key: Option<String>,
    pub payload: Option<JsonValue>,
}

/// Inserts `job`, returning `None` when an equivalent job is already pending.
///
/// The insert runs in a nested transaction (a savepoint when `conn` is already
/// a transaction) so a dedupe conflict does not poison the caller's transaction.
pub async fn enqueue<C>(conn: &C, job: NewJob) -> Result<Option<Uuid>, SyncError>
where
    C: ConnectionTrait + TransactionTrait,
{
    let now = to_db_time(Utc::now());
    let id = Uuid::new_v4();
    let active = ActiveModel {
        id: Set(id),
        job_type: Set(job.job_type.clone()),
        status: Set(STATUS_QUEUED.to_string()),
        priority: Set(job.priority),
        attempts: Set(0),
        scheduled_at: Set(to_db_time(job.scheduled_at)),
        retry_after: Set(None),
        started_at: Set(None),
        finished_at: Set(None),
        dedupe_key: Set(job.dedupe_key.clone()),
        payload: Set(job.payload),
        error: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    };

    let savepoint = conn.begin().await?;
    match SyncJob::insert(active)
        .exec_without_returning(&savepoint)
        .await
    {
        Ok(_) => {
            savepoint.commit().await?;
            info!(
                job_id = %id,
                job_type = %job.job_type,
                scheduled_at = %job.scheduled_at,
                "Enqueued sync job"
            );
            Ok(Some(id))
        }
        Err(err) if is_unique_violation(&err) => {
            savepoint.rollback().await?;
            debug!(
                job_type = %job.job_type,
                dedupe_key = ?job.dedupe_key,
                "Equivalent job already pending; skipping enqueue"
            );
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

#[derive(Clone)]
pub struct SyncJobRepository {
    db: Arc<DatabaseConnection>,
}

impl SyncJobRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn enqueue(&self, job: NewJob) -> Result<Option<Uuid>, SyncError> {
        enqueue(self.db.as_ref(), job).await
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<sync_job::Model>, SyncError> {
        Ok(SyncJob::find_by_id(id).one(self.db.as_ref()).await?)
    }

    /// Jobs of `job_type`, oldest first.
    pub async fn list_by_type(&self, job_type: &str) -> Result<Vec<sync_job::Model>, SyncError> {
        Ok(SyncJob::find()
            .filter(Column::JobType.eq(job_type))
            .order_by_asc(Column::CreatedAt)
            .all(self.db.as_ref())
            .await?)
    }

    /// Number of queued or running jobs.
    pub async fn pending_count(&self) -> Result<u64, SyncError> {
        Ok(SyncJob::find()
            .filter(Column::Status.is_in([STATUS_QUEUED, STATUS_RUNNING]))
            .count(self.db.as_ref())
            .await?)
    }

    /// Earliest instant at which some queued job becomes claimable.
    pub async fn next_due_at(&self) -> Result<Option<DateTime<Utc>>, SyncError> {
        let queued = SyncJob::find()
            .filter(Column::Status.eq(STATUS_QUEUED))
            .all(self.db.as_ref())
            .await?;

        Ok(queued
            .iter()
            .map(|job| {
                let scheduled = job.scheduled_at.with_timezone(&Utc);
                match job.retry_after {
                    Some(retry) => scheduled.max(retry.with_timezone(&Utc)),
                    None => scheduled,
                }
            })
            .min())
    }
}
