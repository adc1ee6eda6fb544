//! Candidate selection and batch reporting for the refresh commands.

mod test_utils;

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use gamesync::enrichment::{ImageResolver, SourceEnricher};
use gamesync::priority::WeightedPriorityScorer;
use gamesync::scheduler::{BatchKind, StalenessScheduler};
use serde_json::json;
use test_utils::{
    FakeMetadata, FakeStorefront, Failure, GameFixture, fast_scheduler_config, setup_test_db_arc,
};

fn ids(games: &[gamesync::models::game::Model]) -> Vec<i64> {
    games.iter().map(|g| g.igdb_id).collect()
}

#[tokio::test]
async fn capped_batch_takes_highest_priorities() -> Result<()> {
    let db = setup_test_db_arc().await?;
    GameFixture::new(1).priority(10).insert(&db).await?;
    GameFixture::new(2).priority(90).insert(&db).await?;
    GameFixture::new(3).priority(50).insert(&db).await?;

    let scheduler = StalenessScheduler::new(fast_scheduler_config(), db.clone());
    let selected = scheduler.select_stale(14, 2, false).await?;

    assert_eq!(ids(&selected), vec![2, 3]);
    Ok(())
}

#[tokio::test]
async fn staleness_threshold_is_respected() -> Result<()> {
    let db = setup_test_db_arc().await?;
    GameFixture::new(20)
        .synced(Utc::now() - Duration::days(20))
        .insert(&db)
        .await?;

    let scheduler = StalenessScheduler::new(fast_scheduler_config(), db.clone());
    assert_eq!(ids(&scheduler.select_stale(14, 10, false).await?), vec![20]);
    assert!(scheduler.select_stale(30, 10, false).await?.is_empty());
    assert_eq!(ids(&scheduler.select_stale(30, 10, true).await?), vec![20]);
    Ok(())
}

#[tokio::test]
async fn negative_or_huge_windows_are_validation_errors() -> Result<()> {
    let db = setup_test_db_arc().await?;
    GameFixture::new(30).synced(Utc::now()).insert(&db).await?;

    let scheduler = StalenessScheduler::new(fast_scheduler_config(), db.clone());
    let err = scheduler.select_stale(-5, 10, false).await.unwrap_err();
    assert_eq!(err.kind_label(), "validation");
    assert!(scheduler.select_stale(1_000_000_000, 10, false).await.is_err());
    assert!(scheduler.select_recent(i64::MAX, 10, false).await.is_err());
    // a just-synced game stays out of the stale batch
    assert!(scheduler.select_stale(1, 10, false).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn never_synced_games_come_first_within_a_priority() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let now = Utc::now();
    GameFixture::new(1).synced(now - Duration::days(40)).insert(&db).await?;
    GameFixture::new(2).insert(&db).await?;
    GameFixture::new(3).synced(now - Duration::days(90)).insert(&db).await?;

    let scheduler = StalenessScheduler::new(fast_scheduler_config(), db.clone());
    assert_eq!(ids(&scheduler.select_stale(30, 10, false).await?), vec![2, 3, 1]);
    Ok(())
}

#[tokio::test]
async fn popular_requires_views_and_orders_by_them() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let now = Utc::now();
    GameFixture::new(1).views(5).insert(&db).await?;
    GameFixture::new(2).views(500).insert(&db).await?;
    GameFixture::new(3).views(50).insert(&db).await?;
    // synced yesterday, inside the popular window
    GameFixture::new(4)
        .views(10_000)
        .synced(now - Duration::days(1))
        .insert(&db)
        .await?;

    let scheduler = StalenessScheduler::new(fast_scheduler_config(), db.clone());
    assert_eq!(ids(&scheduler.select_popular(10, 10, false).await?), vec![2, 3]);
    assert_eq!(ids(&scheduler.select_popular(10, 10, true).await?), vec![4, 2, 3]);
    Ok(())
}

#[tokio::test]
async fn recent_window_includes_upcoming_titles() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let now = Utc::now();
    GameFixture::new(1).released(now - Duration::days(10)).insert(&db).await?;
    GameFixture::new(2).released(now + Duration::days(12)).insert(&db).await?;
    GameFixture::new(3).released(now - Duration::days(400)).insert(&db).await?;
    GameFixture::new(4).insert(&db).await?;

    let scheduler = StalenessScheduler::new(fast_scheduler_config(), db.clone());
    let mut selected = ids(&scheduler.select_recent(30, 10, false).await?);
    selected.sort_unstable();
    assert_eq!(selected, vec![1, 2]);
    Ok(())
}

#[tokio::test]
async fn batch_counts_outcomes_without_aborting() -> Result<()> {
    let db = setup_test_db_arc().await?;
    GameFixture::new(1).priority(30).insert(&db).await?;
    GameFixture::new(2).priority(20).insert(&db).await?;
    GameFixture::new(3).priority(10).insert(&db).await?;

    let metadata = Arc::new(
        FakeMetadata::default()
            .with(1, json!({"id": 1, "name": "Refreshed"}))
            .failing(2, Failure::RateLimited(Some(60)))
            .failing(3, Failure::NotFound),
    );
    let enricher = SourceEnricher::new(
        db.clone(),
        metadata.clone(),
        Arc::new(FakeStorefront::default()),
        ImageResolver::new(None),
        Arc::new(WeightedPriorityScorer::default()),
    );

    let scheduler = StalenessScheduler::new(fast_scheduler_config(), db.clone());
    let report = scheduler.refresh_stale(&enricher, 14, 10, false).await?;

    assert_eq!(report.kind, BatchKind::Stale);
    assert_eq!(report.selected, 3);
    assert_eq!(report.updated, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(metadata.calls(), vec![1, 2, 3]);

    // the refreshed game is no longer stale
    let remaining = ids(&scheduler.select_stale(14, 10, false).await?);
    assert_eq!(remaining, vec![2, 3]);
    Ok(())
}

#[tokio::test]
async fn empty_selection_reports_nothing() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let enricher = SourceEnricher::new(
        db.clone(),
        Arc::new(FakeMetadata::default()),
        Arc::new(FakeStorefront::default()),
        ImageResolver::new(None),
        Arc::new(WeightedPriorityScorer::default()),
    );

    let scheduler = StalenessScheduler::new(fast_scheduler_config(), db.clone());
    let report = scheduler.refresh_recent(&enricher, 30, 10, false).await?;
    assert_eq!(report.selected, 0);
    assert_eq!(report.succeeded(), 0);
    Ok(())
}
