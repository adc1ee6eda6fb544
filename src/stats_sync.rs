//! # Stats Sync
//!
//! Refreshes engagement numbers for `steamspy` links as a chain of durable
//! queue jobs. [`StatsSyncCoordinator::dispatch`] selects due links in
//! priority order and enqueues one job for the head of the list; each job
//! carries the ids that follow it and hands the next one back to the
//! executor as a follow-up, so the chain advances one link at a time with
//! `chain_delay_ms` between calls.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::StatsSyncConfig;
use crate::error::SyncError;
use crate::models::external_source_link::{self, SourceKind};
use crate::models::game;
use crate::repositories::source_link::StatsDueWindow;
use crate::repositories::sync_job::NewJob;
use crate::repositories::{SourceLinkRepository, SyncJobRepository};
use crate::sources::StatsSource;
use crate::sync_executor::{JobHandler, JobOutcome};
use crate::sync_state::LinkState;

pub const STATS_SYNC_JOB: &str = "stats_sync";

/// Queue payload of one link in the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsJobPayload {
    pub link_id: Uuid,
    #[serde(default)]
    pub remaining: Vec<Uuid>,
    pub threshold: i32,
}

impl StatsJobPayload {
    /// Job for the head of `links`, or `None` when the list is empty.
    pub fn chain(links: &[Uuid], threshold: i32) -> Option<Self> {
        let (head, rest) = links.split_first()?;
        Some(Self {
            link_id: *head,
            remaining: rest.to_vec(),
            threshold,
        })
    }

    pub fn next(&self) -> Option<Self> {
        Self::chain(&self.remaining, self.threshold)
    }

    pub fn into_job(
        self,
        priority: i16,
        scheduled_at: DateTime<Utc>,
    ) -> Result<NewJob, SyncError> {
        let payload = serde_json::to_value(&self)
            .map_err(|err| SyncError::validation(format!("encoding stats job payload: {err}")))?;
        Ok(NewJob {
            job_type: STATS_SYNC_JOB.to_string(),
            priority,
            scheduled_at,
            dedupe_key: Some(format!("{STATS_SYNC_JOB}:{}", self.link_id)),
            payload: Some(payload),
        })
    }
}

/// Whether `link` needs a stats refresh at `now`.
///
/// Never-synced links are always due; otherwise the link must be older than
/// the window picked by `game_priority`. A failed link additionally waits
/// for its `next_retry_at`.
pub fn is_due(
    link: &external_source_link::Model,
    game_priority: i32,
    window: &StatsDueWindow,
    now: DateTime<Utc>,
) -> bool {
    let state = LinkState::from_model(link);
    if !state.is_retry_eligible(now) {
        return false;
    }
    match state.last_synced_at {
        None => true,
        Some(synced) => {
            let max_age = if game_priority >= window.priority_threshold {
                window.high_priority_max_age
            } else {
                window.default_max_age
            };
            synced < now - max_age
        }
    }
}

fn job_priority(game: &game::Model) -> i16 {
    game.update_priority.clamp(0, i16::MAX as i32) as i16
}

/// Result of [`StatsSyncCoordinator::dispatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub selected: usize,
    /// `None` when nothing was due or a chain for the same head is already pending.
    pub job_id: Option<Uuid>,
}

pub struct StatsSyncCoordinator {
    config: StatsSyncConfig,
    links: SourceLinkRepository,
    jobs: SyncJobRepository,
    stats: Arc<dyn StatsSource>,
}

impl StatsSyncCoordinator {
    pub fn new(
        config: StatsSyncConfig,
        db: Arc<DatabaseConnection>,
        stats: Arc<dyn StatsSource>,
    ) -> Self {
        Self {
            config,
            links: SourceLinkRepository::new(db.clone()),
            jobs: SyncJobRepository::new(db),
            stats,
        }
    }

    pub fn window(&self, threshold: i32) -> StatsDueWindow {
        StatsDueWindow {
            priority_threshold: threshold,
            high_priority_max_age: Duration::days(self.config.high_priority_max_age_days),
            default_max_age: Duration::days(self.config.default_max_age_days),
        }
    }

    /// Selects up to `limit` due links and enqueues the head of the chain.
    #[instrument(skip(self))]
    pub async fn dispatch(
        &self,
        threshold: Option<i32>,
        limit: Option<u64>,
    ) -> Result<DispatchReport, SyncError> {
        let threshold = threshold.unwrap_or(self.config.priority_threshold);
        let limit = limit.unwrap_or(self.config.default_limit);
        let due = self
            .links
            .select_due(SourceKind::SteamSpy, self.window(threshold), Utc::now(), limit)
            .await?;

        let ids: Vec<Uuid> = due.iter().map(|(link, _)| link.id).collect();
        let Some(head) = StatsJobPayload::chain(&ids, threshold) else {
            info!("No stats links due");
            return Ok(DispatchReport {
                selected: 0,
                job_id: None,
            });
        };

        let priority = due.first().map(|(_, game)| job_priority(game)).unwrap_or(0);
        let job_id = self.jobs.enqueue(head.into_job(priority, Utc::now())?).await?;
        info!(selected = ids.len(), threshold, job_id = ?job_id, "Stats chain dispatched");

        Ok(DispatchReport {
            selected: ids.len(),
            job_id,
        })
    }

    /// Refreshes one link. Source failures land on the link's backoff
    /// state; only local errors surface to the caller.
    async fn sync_link(
        &self,
        link: external_source_link::Model,
        game: &game::Model,
        now: DateTime<Utc>,
    ) -> Result<&'static str, SyncError> {
        let app_id = link
            .external_uid
            .as_deref()
            .and_then(|uid| uid.parse::<i64>().ok())
            .or(game.steam_app_id);

        let fetched = match app_id {
            Some(app_id) => self.stats.fetch_stats(app_id).await,
            None => Err(SyncError::validation(format!(
                "stats link {} has no app id",
                link.id
            ))),
        };

        let state = LinkState::from_model(&link);
        match fetched {
            Ok(snapshot) => {
                self.links
                    .apply_state(link, &state.succeed(now), Some(snapshot.to_payload()))
                    .await?;
                debug!(game_id = %game.id, app_id, "Stats refreshed");
                Ok("synced")
            }
            Err(err) => {
                let next = state.fail(&err, now);
                warn!(
                    game_id = %game.id,
                    source = SourceKind::SteamSpy.as_str(),
                    retry_count = next.retry_count,
                    next_retry_at = ?next.next_retry_at,
                    error = %err,
                    "Stats refresh failed"
                );
                self.links.apply_state(link, &next, None).await?;
                Ok("failed")
            }
        }
    }
}

#[async_trait]
impl JobHandler for StatsSyncCoordinator {
    fn job_type(&self) -> &'static str {
        STATS_SYNC_JOB
    }

    async fn handle(&self, job: &crate::models::sync_job::Model) -> Result<JobOutcome, SyncError> {
        let payload: StatsJobPayload = job
            .payload
            .clone()
            .ok_or_else(|| SyncError::validation("stats job without payload"))
            .and_then(|value| {
                serde_json::from_value(value)
                    .map_err(|err| SyncError::validation(format!("bad stats job payload: {err}")))
            })?;

        let now = Utc::now();
        let window = self.window(payload.threshold);
        let result = match self.links.find_with_game(payload.link_id).await? {
            None => "missing",
            Some((link, game)) if !is_due(&link, game.update_priority, &window, now) => {
                debug!(link_id = %link.id, "Stats link no longer due");
                "skipped"
            }
            Some((link, game)) => self.sync_link(link, &game, now).await?,
        };
        counter!("gamesync_stats_sync_total", "result" => result).increment(1);

        let follow_up = payload
            .next()
            .map(|next| {
                let scheduled_at = now
                    + Duration::milliseconds(self.config.chain_delay_ms.min(i64::MAX as u64) as i64);
                next.into_job(job.priority, scheduled_at)
            })
            .transpose()?;
        if follow_up.is_none() {
            info!(link_id = %payload.link_id, "Stats chain finished");
        }

        Ok(JobOutcome { follow_up })
    }
}
