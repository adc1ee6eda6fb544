//! Game repository
//!
//! Upserts keyed on the primary-source id, candidate selection for the
//! refresh batches, and the view-tracking boundary.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, NullOrdering, OnConflict, Order};
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde_json::Value as JsonValue;
use tracing::debug;
use uuid::Uuid;

use crate::db::to_db_time;
use crate::error::SyncError;
use crate::models::game::{self, Column, Entity as Game};
use crate::priority::{PriorityScorer, PrioritySignals};

/// Content written by one enrichment pass.
#[derive(Debug, Clone, PartialEq)]
pub struct GameUpsert {
    pub igdb_id: i64,
    pub name: String,
    pub slug: Option<String>,
    pub release_date: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub storyline: Option<String>,
    pub rating: Option<f64>,
    pub cover_image: Option<String>,
    pub hero_image: Option<String>,
    pub logo_image: Option<String>,
    pub steam_app_id: Option<i64>,
    pub screenshots: Option<JsonValue>,
    pub videos: Option<JsonValue>,
    pub similar_games: Option<JsonValue>,
    pub storefront_payload: Option<JsonValue>,
    pub source_payload: Option<JsonValue>,
}

impl GameUpsert {
    /// True when persisting `self` would not change any content column of `existing`.
    pub fn matches(&self, existing: &game::Model) -> bool {
        self.igdb_id == existing.igdb_id
            && self.name == existing.name
            && self.slug == existing.slug
            && self.release_date == existing.release_date.map(|d| d.with_timezone(&Utc))
            && self.summary == existing.summary
            && self.storyline == existing.storyline
            && self.rating == existing.rating
            && self.cover_image == existing.cover_image
            && self.hero_image == existing.hero_image
            && self.logo_image == existing.logo_image
            && self.steam_app_id == existing.steam_app_id
            && self.screenshots == existing.screenshots
            && self.videos == existing.videos
            && self.similar_games == existing.similar_games
            && self.storefront_payload == existing.storefront_payload
            && self.source_payload == existing.source_payload
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertStatus {
    Created,
    Updated,
    Unchanged,
}

impl UpsertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpsertStatus::Created => "created",
            UpsertStatus::Updated => "updated",
            UpsertStatus::Unchanged => "unchanged",
        }
    }
}

/// Secondary ordering applied after `update_priority DESC`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOrder {
    /// Never-synced first, then oldest sync.
    OldestSyncFirst,
    MostViewedFirst,
}

/// Declarative candidate filter for refresh batches.
#[derive(Debug, Clone)]
pub struct CandidateFilter {
    /// Keep games never synced or last synced before this instant.
    pub synced_before: Option<DateTime<Utc>>,
    pub min_views: Option<i64>,
    /// Inclusive release date window.
    pub released_between: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub order: CandidateOrder,
    pub limit: u64,
}

#[derive(Clone)]
pub struct GameRepository {
    db: Arc<DatabaseConnection>,
}

impl GameRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<game::Model>, SyncError> {
        Ok(Game::find_by_id(id).one(self.db.as_ref()).await?)
    }

    pub async fn find_by_igdb_id(&self, igdb_id: i64) -> Result<Option<game::Model>, SyncError> {
        Ok(Game::find()
            .filter(Column::IgdbId.eq(igdb_id))
            .one(self.db.as_ref())
            .await?)
    }

    /// Insert-or-update keyed on `igdb_id`.
    ///
    /// Engagement columns (`view_count`, `priority_boost`) and `created_at` are
    /// never touched on update. `updated_at` only moves when content changed.
    pub async fn upsert(
        &self,
        record: GameUpsert,
        now: DateTime<Utc>,
    ) -> Result<(game::Model, UpsertStatus), SyncError> {
        let existing = self.find_by_igdb_id(record.igdb_id).await?;
        let status = match &existing {
            None => UpsertStatus::Created,
            Some(model) if record.matches(model) => UpsertStatus::Unchanged,
            Some(_) => UpsertStatus::Updated,
        };
        let updated_at = match (&existing, status) {
            (Some(model), UpsertStatus::Unchanged) => model.updated_at,
            _ => to_db_time(now),
        };
        let igdb_id = record.igdb_id;

        let active = game::ActiveModel {
            id: Set(existing.as_ref().map(|m| m.id).unwrap_or_else(Uuid::new_v4)),
            igdb_id: Set(record.igdb_id),
            name: Set(record.name),
            slug: Set(record.slug),
            release_date: Set(record.release_date.map(to_db_time)),
            summary: Set(record.summary),
            storyline: Set(record.storyline),
            rating: Set(record.rating),
            cover_image: Set(record.cover_image),
            hero_image: Set(record.hero_image),
            logo_image: Set(record.logo_image),
            steam_app_id: Set(record.steam_app_id),
            screenshots: Set(record.screenshots),
            videos: Set(record.videos),
            similar_games: Set(record.similar_games),
            storefront_payload: Set(record.storefront_payload),
            source_payload: Set(record.source_payload),
            view_count: Set(0),
            priority_boost: Set(0),
            update_priority: Set(0),
            last_synced_at: Set(Some(to_db_time(now))),
            created_at: Set(to_db_time(now)),
            updated_at: Set(updated_at),
        };

        Game::insert(active)
            .on_conflict(
                OnConflict::column(Column::IgdbId)
                    .update_columns([
                        Column::Name,
                        Column::Slug,
                        Column::ReleaseDate,
                        Column::Summary,
                        Column::Storyline,
                        Column::Rating,
                        Column::CoverImage,
                        Column::HeroImage,
                        Column::LogoImage,
                        Column::SteamAppId,
                        Column::Screenshots,
                        Column::Videos,
                        Column::SimilarGames,
                        Column::StorefrontPayload,
                        Column::SourcePayload,
                        Column::LastSyncedAt,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await?;

        let model = self.find_by_igdb_id(igdb_id).await?.ok_or_else(|| {
            DbErr::RecordNotFound(format!("game with igdb id {igdb_id} after upsert"))
        })?;

        debug!(igdb_id, game_id = %model.id, status = status.as_str(), "Game upserted");
        Ok((model, status))
    }

    pub async fn set_priority(&self, game_id: Uuid, priority: i32) -> Result<(), SyncError> {
        Game::update_many()
            .col_expr(Column::UpdatePriority, Expr::value(priority))
            .filter(Column::Id.eq(game_id))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Recomputes and stores `update_priority` from the row's current signals.
    pub async fn refresh_priority(
        &self,
        game: &game::Model,
        scorer: &dyn PriorityScorer,
        now: DateTime<Utc>,
    ) -> Result<i32, SyncError> {
        let priority = scorer.score(&PrioritySignals::from_game(game), now);
        if priority != game.update_priority {
            self.set_priority(game.id, priority).await?;
        }
        Ok(priority)
    }

    /// View-tracking boundary: counts one view and recomputes the priority.
    ///
    /// Returns the new priority, or `None` when the game does not exist.
    pub async fn record_view(
        &self,
        game_id: Uuid,
        scorer: &dyn PriorityScorer,
        now: DateTime<Utc>,
    ) -> Result<Option<i32>, SyncError> {
        let result = Game::update_many()
            .col_expr(Column::ViewCount, Expr::col(Column::ViewCount).add(1))
            .filter(Column::Id.eq(game_id))
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected == 0 {
            return Ok(None);
        }

        let Some(game) = self.find_by_id(game_id).await? else {
            return Ok(None);
        };
        let priority = self.refresh_priority(&game, scorer, now).await?;
        Ok(Some(priority))
    }

    /// Games matching `filter`, ordered by priority then the requested tie-breaker.
    pub async fn select_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> Result<Vec<game::Model>, SyncError> {
        let mut query = Game::find();

        if let Some(before) = filter.synced_before {
            query = query.filter(
                Condition::any()
                    .add(Column::LastSyncedAt.is_null())
                    .add(Column::LastSyncedAt.lt(to_db_time(before))),
            );
        }
        if let Some(min_views) = filter.min_views {
            query = query.filter(Column::ViewCount.gte(min_views));
        }
        if let Some((from, to)) = filter.released_between {
            query = query.filter(Column::ReleaseDate.between(to_db_time(from), to_db_time(to)));
        }

        query = query.order_by_desc(Column::UpdatePriority);
        query = match filter.order {
            CandidateOrder::OldestSyncFirst => {
                query.order_by_with_nulls(Column::LastSyncedAt, Order::Asc, NullOrdering::First)
            }
            CandidateOrder::MostViewedFirst => query.order_by_desc(Column::ViewCount),
        };

        Ok(query
            .order_by_asc(Column::IgdbId)
            .limit(filter.limit)
            .all(self.db.as_ref())
            .await?)
    }
}
