//! # Staleness Scheduler
//!
//! Externally triggered refresh batches. Each batch selects candidates by a
//! staleness rule, caps them in priority order and refreshes them one by one
//! through [`SourceEnricher::enrich_batch`] with a fixed pause between
//! primary-source calls. Per-item failures are counted, never raised.

use std::fmt;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, histogram};
use sea_orm::DatabaseConnection;
use tokio::time::Instant;
use tracing::{info, instrument};

use crate::config::{MAX_DAY_WINDOW, SchedulerConfig};
use crate::enrichment::{EnrichResult, SourceEnricher};
use crate::error::SyncError;
use crate::models::game;
use crate::repositories::GameRepository;
use crate::repositories::game::{CandidateFilter, CandidateOrder, UpsertStatus};
use crate::telemetry::current_run_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    Stale,
    Popular,
    Recent,
    Import,
}

impl BatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchKind::Stale => "refresh-stale",
            BatchKind::Popular => "refresh-popular",
            BatchKind::Recent => "refresh-recent",
            BatchKind::Import => "import",
        }
    }
}

/// Outcome counts of one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub kind: BatchKind,
    pub selected: u64,
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    /// Ids the primary source no longer knows.
    pub skipped: u64,
    pub failed: u64,
}

impl BatchReport {
    pub fn new(kind: BatchKind, selected: usize) -> Self {
        Self {
            kind,
            selected: selected as u64,
            created: 0,
            updated: 0,
            unchanged: 0,
            skipped: 0,
            failed: 0,
        }
    }

    pub fn record(&mut self, result: &EnrichResult) {
        match &result.outcome {
            Ok(outcome) => match outcome.status {
                UpsertStatus::Created => self.created += 1,
                UpsertStatus::Updated => self.updated += 1,
                UpsertStatus::Unchanged => self.unchanged += 1,
            },
            Err(err) if err.is_not_found() => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }

    pub fn succeeded(&self) -> u64 {
        self.created + self.updated + self.unchanged
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.kind.as_str())?;
        for (label, value) in [
            ("selected", self.selected),
            ("created", self.created),
            ("updated", self.updated),
            ("unchanged", self.unchanged),
            ("skipped", self.skipped),
            ("failed", self.failed),
        ] {
            writeln!(f, "  {label:<10} {value:>6}")?;
        }
        Ok(())
    }
}

/// Converts a day count into a window, rejecting negative or oversized values.
fn day_window(field: &str, days: i64) -> Result<Duration, SyncError> {
    if !(0..=MAX_DAY_WINDOW).contains(&days) {
        return Err(SyncError::validation(format!(
            "{field} must be between 0 and {MAX_DAY_WINDOW}, got {days}"
        )));
    }
    Duration::try_days(days)
        .ok_or_else(|| SyncError::validation(format!("{field} out of range: {days}")))
}

fn synced_before(
    min_days: i64,
    force: bool,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, SyncError> {
    let window = day_window("min_days", min_days)?;
    if force {
        return Ok(None);
    }
    now.checked_sub_signed(window)
        .map(Some)
        .ok_or_else(|| SyncError::validation(format!("min_days out of range: {min_days}")))
}

/// `last_synced_at` null or older than `min_days`; oldest first within a priority.
pub fn stale_filter(
    min_days: i64,
    batch_size: u64,
    force: bool,
    now: DateTime<Utc>,
) -> Result<CandidateFilter, SyncError> {
    Ok(CandidateFilter {
        synced_before: synced_before(min_days, force, now)?,
        min_views: None,
        released_between: None,
        order: CandidateOrder::OldestSyncFirst,
        limit: batch_size,
    })
}

/// At least `min_views` views and not synced within `min_days`; most viewed first within a priority.
pub fn popular_filter(
    limit: u64,
    min_views: i64,
    min_days: i64,
    force: bool,
    now: DateTime<Utc>,
) -> Result<CandidateFilter, SyncError> {
    Ok(CandidateFilter {
        synced_before: synced_before(min_days, force, now)?,
        min_views: Some(min_views),
        released_between: None,
        order: CandidateOrder::MostViewedFirst,
        limit,
    })
}

/// Released within `days` of now on either side and not synced within `min_days`.
pub fn recent_filter(
    days: i64,
    limit: u64,
    min_days: i64,
    force: bool,
    now: DateTime<Utc>,
) -> Result<CandidateFilter, SyncError> {
    let span = day_window("days", days)?;
    let out_of_range = || SyncError::validation(format!("days out of range: {days}"));
    let from = now.checked_sub_signed(span).ok_or_else(out_of_range)?;
    let to = now.checked_add_signed(span).ok_or_else(out_of_range)?;
    Ok(CandidateFilter {
        synced_before: synced_before(min_days, force, now)?,
        min_views: None,
        released_between: Some((from, to)),
        order: CandidateOrder::OldestSyncFirst,
        limit,
    })
}

pub struct StalenessScheduler {
    config: SchedulerConfig,
    games: GameRepository,
}

impl StalenessScheduler {
    pub fn new(config: SchedulerConfig, db: Arc<DatabaseConnection>) -> Self {
        Self {
            config,
            games: GameRepository::new(db),
        }
    }

    pub fn delay_for(&self, kind: BatchKind) -> StdDuration {
        let ms = match kind {
            BatchKind::Stale => self.config.stale_delay_ms,
            BatchKind::Popular => self.config.popular_delay_ms,
            BatchKind::Recent | BatchKind::Import => self.config.recent_delay_ms,
        };
        StdDuration::from_millis(ms)
    }

    pub async fn select_stale(
        &self,
        min_days: i64,
        batch_size: u64,
        force: bool,
    ) -> Result<Vec<game::Model>, SyncError> {
        let filter = stale_filter(min_days, batch_size, force, Utc::now())?;
        self.games.select_candidates(&filter).await
    }

    pub async fn select_popular(
        &self,
        limit: u64,
        min_views: i64,
        force: bool,
    ) -> Result<Vec<game::Model>, SyncError> {
        let filter = popular_filter(limit, min_views, self.config.popular_min_days, force, Utc::now())?;
        self.games.select_candidates(&filter).await
    }

    pub async fn select_recent(
        &self,
        days: i64,
        limit: u64,
        force: bool,
    ) -> Result<Vec<game::Model>, SyncError> {
        let filter = recent_filter(days, limit, self.config.recent_min_days, force, Utc::now())?;
        self.games.select_candidates(&filter).await
    }

    /// Refreshes `candidates` in the order given.
    #[instrument(skip_all, fields(kind = kind.as_str(), run_id = %current_run_id().unwrap_or_default()))]
    pub async fn run_batch(
        &self,
        kind: BatchKind,
        candidates: &[game::Model],
        enricher: &SourceEnricher,
    ) -> BatchReport {
        let ids: Vec<i64> = candidates.iter().map(|game| game.igdb_id).collect();
        self.run_ids(kind, &ids, enricher).await
    }

    /// Refreshes primary ids directly, for imports that may name unknown games.
    pub async fn run_ids(
        &self,
        kind: BatchKind,
        igdb_ids: &[i64],
        enricher: &SourceEnricher,
    ) -> BatchReport {
        let started = Instant::now();
        let mut report = BatchReport::new(kind, igdb_ids.len());
        if igdb_ids.is_empty() {
            return report;
        }

        info!(selected = igdb_ids.len(), "Starting refresh batch");
        for result in enricher.enrich_batch(igdb_ids, self.delay_for(kind)).await {
            report.record(&result);
        }

        counter!("gamesync_batch_items_total", "kind" => kind.as_str(), "result" => "succeeded")
            .increment(report.succeeded());
        counter!("gamesync_batch_items_total", "kind" => kind.as_str(), "result" => "skipped")
            .increment(report.skipped);
        counter!("gamesync_batch_items_total", "kind" => kind.as_str(), "result" => "failed")
            .increment(report.failed);
        histogram!("gamesync_batch_duration_ms", "kind" => kind.as_str())
            .record(started.elapsed().as_secs_f64() * 1_000.0);

        info!(
            selected = report.selected,
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            skipped = report.skipped,
            failed = report.failed,
            "Refresh batch completed"
        );
        report
    }

    pub async fn refresh_stale(
        &self,
        enricher: &SourceEnricher,
        min_days: i64,
        batch_size: u64,
        force: bool,
    ) -> Result<BatchReport, SyncError> {
        let candidates = self.select_stale(min_days, batch_size, force).await?;
        Ok(self.run_batch(BatchKind::Stale, &candidates, enricher).await)
    }

    pub async fn refresh_popular(
        &self,
        enricher: &SourceEnricher,
        limit: u64,
        min_views: i64,
        force: bool,
    ) -> Result<BatchReport, SyncError> {
        let candidates = self.select_popular(limit, min_views, force).await?;
        Ok(self.run_batch(BatchKind::Popular, &candidates, enricher).await)
    }

    pub async fn refresh_recent(
        &self,
        enricher: &SourceEnricher,
        days: i64,
        limit: u64,
        force: bool,
    ) -> Result<BatchReport, SyncError> {
        let candidates = self.select_recent(days, limit, force).await?;
        Ok(self.run_batch(BatchKind::Recent, &candidates, enricher).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::external_source_link::SourceKind;
    use crate::enrichment::EnrichOutcome;
    use uuid::Uuid;

    fn ok(status: UpsertStatus) -> EnrichResult {
        EnrichResult {
            igdb_id: 1,
            outcome: Ok(EnrichOutcome {
                game_id: Uuid::new_v4(),
                igdb_id: 1,
                name: "Game".into(),
                status,
                steam_app_id: None,
            }),
        }
    }

    #[test]
    fn report_counts_outcomes() {
        let mut report = BatchReport::new(BatchKind::Stale, 4);
        report.record(&ok(UpsertStatus::Updated));
        report.record(&ok(UpsertStatus::Unchanged));
        report.record(&EnrichResult {
            igdb_id: 2,
            outcome: Err(SyncError::not_found(SourceKind::Igdb, 2)),
        });
        report.record(&EnrichResult {
            igdb_id: 3,
            outcome: Err(SyncError::upstream(SourceKind::Igdb, "boom")),
        });

        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 1);
        assert!(report.to_string().contains("failed"));
    }

    #[test]
    fn force_drops_staleness_filter() {
        let now = Utc::now();
        assert!(stale_filter(30, 10, true, now).unwrap().synced_before.is_none());
        assert_eq!(
            stale_filter(30, 10, false, now).unwrap().synced_before,
            Some(now - Duration::days(30))
        );
    }

    #[test]
    fn recent_window_spans_both_sides() {
        let now = Utc::now();
        let (from, to) = recent_filter(30, 10, 14, false, now)
            .unwrap()
            .released_between
            .unwrap();
        assert_eq!(from, now - Duration::days(30));
        assert_eq!(to, now + Duration::days(30));
    }

    #[test]
    fn out_of_range_day_windows_are_rejected() {
        let now = Utc::now();
        for days in [-5, MAX_DAY_WINDOW + 1, 1_000_000_000, i64::MAX] {
            assert!(matches!(
                stale_filter(days, 10, false, now),
                Err(SyncError::Validation(_))
            ));
            assert!(stale_filter(days, 10, true, now).is_err());
            assert!(recent_filter(days, 10, 14, false, now).is_err());
            assert!(popular_filter(10, 1, days, false, now).is_err());
        }
        assert!(stale_filter(0, 10, false, now).is_ok());
        assert!(stale_filter(MAX_DAY_WINDOW, 10, false, now).is_ok());
    }
}
