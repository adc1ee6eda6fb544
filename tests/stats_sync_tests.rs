//! Stats refresh chain: selection, queue hand-off and link backoff.

mod test_utils;

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use gamesync::config::{ExecutorConfig, JobRetryPolicyConfig, StatsSyncConfig};
use gamesync::models::external_source_link::{self, SourceKind, SyncStatus};
use gamesync::models::sync_job::{STATUS_QUEUED, STATUS_SUCCEEDED};
use gamesync::repositories::source_link::{self, LinkTarget};
use gamesync::repositories::{SourceLinkRepository, SyncJobRepository};
use gamesync::stats_sync::{STATS_SYNC_JOB, StatsSyncCoordinator};
use gamesync::sync_executor::JobExecutor;
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use test_utils::{FakeStats, Failure, GameFixture, setup_test_db_arc};

fn stats_config() -> StatsSyncConfig {
    StatsSyncConfig {
        priority_threshold: 50,
        high_priority_max_age_days: 7,
        default_max_age_days: 30,
        chain_delay_ms: 0,
        default_limit: 100,
    }
}

fn executor(db: Arc<DatabaseConnection>, coordinator: StatsSyncCoordinator) -> JobExecutor {
    JobExecutor::new(db, ExecutorConfig::default(), JobRetryPolicyConfig::default())
        .register(Arc::new(coordinator))
}

/// Inserts a game with a pending stats link for `app_id`.
async fn linked_game(
    db: &DatabaseConnection,
    igdb_id: i64,
    priority: i32,
    app_id: i64,
) -> Result<external_source_link::Model> {
    let game = GameFixture::new(igdb_id)
        .priority(priority)
        .steam(app_id)
        .insert(db)
        .await?;
    let target = LinkTarget::new(game.id, SourceKind::SteamSpy).with_uid(app_id);
    Ok(source_link::ensure(db, &target).await?)
}

async fn reload(
    db: &Arc<DatabaseConnection>,
    link: &external_source_link::Model,
) -> Result<external_source_link::Model> {
    Ok(SourceLinkRepository::new(db.clone())
        .find(link.game_id, SourceKind::SteamSpy)
        .await?
        .expect("link exists"))
}

#[tokio::test]
async fn chain_visits_every_link_once_in_priority_order() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let low = linked_game(&db, 1, 10, 100).await?;
    let high = linked_game(&db, 2, 90, 200).await?;
    let mid = linked_game(&db, 3, 50, 300).await?;

    let stats = Arc::new(FakeStats::default());
    let coordinator = StatsSyncCoordinator::new(stats_config(), db.clone(), stats.clone());
    let report = coordinator.dispatch(None, None).await?;
    assert_eq!(report.selected, 3);
    assert!(report.job_id.is_some());

    let coordinator = StatsSyncCoordinator::new(stats_config(), db.clone(), stats.clone());
    let run = executor(db.clone(), coordinator)
        .run_until_idle(CancellationToken::new())
        .await?;
    assert_eq!(run.claimed, 3);
    assert_eq!(run.succeeded, 3);
    assert_eq!(stats.calls(), vec![200, 300, 100]);

    for link in [&low, &high, &mid] {
        let link = reload(&db, link).await?;
        assert_eq!(link.status(), SyncStatus::Synced);
        assert_eq!(link.payload.as_ref().unwrap()["positive"], 10);
    }

    let jobs = SyncJobRepository::new(db.clone())
        .list_by_type(STATS_SYNC_JOB)
        .await?;
    assert_eq!(jobs.len(), 3);
    assert!(jobs.iter().all(|job| job.status == STATUS_SUCCEEDED));
    Ok(())
}

#[tokio::test]
async fn failures_back_off_without_breaking_the_chain() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let first = linked_game(&db, 1, 90, 100).await?;
    let broken = linked_game(&db, 2, 80, 200).await?;
    let limited = linked_game(&db, 3, 70, 300).await?;

    let stats = Arc::new(
        FakeStats::default()
            .failing(200, Failure::Upstream("502 bad gateway".into()))
            .failing(300, Failure::RateLimited(None)),
    );
    let coordinator = StatsSyncCoordinator::new(stats_config(), db.clone(), stats.clone());
    coordinator.dispatch(None, None).await?;

    let started = Utc::now();
    executor(
        db.clone(),
        StatsSyncCoordinator::new(stats_config(), db.clone(), stats.clone()),
    )
    .run_until_idle(CancellationToken::new())
    .await?;
    assert_eq!(stats.calls(), vec![100, 200, 300]);

    assert_eq!(reload(&db, &first).await?.status(), SyncStatus::Synced);

    let broken = reload(&db, &broken).await?;
    assert_eq!(broken.status(), SyncStatus::Failed);
    assert_eq!(broken.retry_count, 1);
    let wait = broken.next_retry_at.unwrap().with_timezone(&Utc) - started;
    assert!(wait >= Duration::minutes(59) && wait <= Duration::minutes(61));
    assert!(broken.last_error.as_deref().unwrap().contains("502"));

    let limited = reload(&db, &limited).await?;
    let wait = limited.next_retry_at.unwrap().with_timezone(&Utc) - started;
    assert!(wait >= Duration::minutes(239) && wait <= Duration::minutes(241));

    // failed links wait for their retry time; synced ones are fresh
    let again = coordinator.dispatch(None, None).await?;
    assert_eq!(again.selected, 0);
    assert!(again.job_id.is_none());
    Ok(())
}

#[tokio::test]
async fn priority_decides_the_staleness_window() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let now = Utc::now();
    for (igdb_id, priority, app_id) in [(1, 90, 100), (2, 10, 200)] {
        let link = linked_game(&db, igdb_id, priority, app_id).await?;
        let state = gamesync::sync_state::LinkState::default().succeed(now - Duration::days(10));
        source_link::apply_state(db.as_ref(), link, &state, None).await?;
    }

    let coordinator =
        StatsSyncCoordinator::new(stats_config(), db.clone(), Arc::new(FakeStats::default()));
    // raising the threshold moves the busy game onto the long window
    assert_eq!(coordinator.dispatch(Some(95), None).await?.selected, 0);
    assert_eq!(coordinator.dispatch(None, None).await?.selected, 1);
    Ok(())
}

#[tokio::test]
async fn pending_chain_is_not_dispatched_twice() -> Result<()> {
    let db = setup_test_db_arc().await?;
    linked_game(&db, 1, 90, 100).await?;
    linked_game(&db, 2, 10, 200).await?;

    let coordinator =
        StatsSyncCoordinator::new(stats_config(), db.clone(), Arc::new(FakeStats::default()));
    let first = coordinator.dispatch(None, None).await?;
    let second = coordinator.dispatch(None, None).await?;

    assert!(first.job_id.is_some());
    assert!(second.job_id.is_none());

    let jobs = SyncJobRepository::new(db.clone())
        .list_by_type(STATS_SYNC_JOB)
        .await?;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, STATUS_QUEUED);
    Ok(())
}

#[tokio::test]
async fn limit_caps_the_chain() -> Result<()> {
    let db = setup_test_db_arc().await?;
    for (igdb_id, priority) in [(1, 10), (2, 20), (3, 30), (4, 40)] {
        linked_game(&db, igdb_id, priority, igdb_id * 100).await?;
    }

    let stats = Arc::new(FakeStats::default());
    let coordinator = StatsSyncCoordinator::new(stats_config(), db.clone(), stats.clone());
    assert_eq!(coordinator.dispatch(None, Some(2)).await?.selected, 2);

    executor(
        db.clone(),
        StatsSyncCoordinator::new(stats_config(), db.clone(), stats.clone()),
    )
    .run_until_idle(CancellationToken::new())
    .await?;
    assert_eq!(stats.calls(), vec![400, 300]);
    Ok(())
}
