mod test_utils;

use anyhow::Result;
use chrono::Utc;
use gamesync::priority::{PriorityScorer, PrioritySignals, WeightedPriorityScorer};
use gamesync::repositories::GameRepository;
use test_utils::{GameFixture, setup_test_db_arc};
use uuid::Uuid;

#[tokio::test]
async fn recording_a_view_bumps_count_and_priority() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let now = Utc::now();
    let game = GameFixture::new(1942)
        .views(98)
        .synced(now)
        .insert(&db)
        .await?;

    let repo = GameRepository::new(db.clone());
    let scorer = WeightedPriorityScorer::default();
    let priority = repo.record_view(game.id, &scorer, now).await?;

    let stored = repo.find_by_id(game.id).await?.unwrap();
    assert_eq!(stored.view_count, 99);
    assert_eq!(priority, Some(stored.update_priority));
    assert_eq!(
        stored.update_priority,
        scorer.score(&PrioritySignals::from_game(&stored), now)
    );
    assert!(stored.update_priority >= scorer.score(&PrioritySignals::from_game(&game), now));
    Ok(())
}

#[tokio::test]
async fn recording_a_view_for_unknown_game_is_a_no_op() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let repo = GameRepository::new(db.clone());

    let priority = repo
        .record_view(Uuid::new_v4(), &WeightedPriorityScorer::default(), Utc::now())
        .await?;
    assert_eq!(priority, None);
    Ok(())
}

#[tokio::test]
async fn lookup_by_primary_id() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let game = GameFixture::new(740).steam(620).insert(&db).await?;

    let repo = GameRepository::new(db.clone());
    let found = repo.find_by_igdb_id(740).await?.unwrap();
    assert_eq!(found.id, game.id);
    assert_eq!(found.steam_app_id, Some(620));
    assert!(repo.find_by_igdb_id(741).await?.is_none());
    Ok(())
}
