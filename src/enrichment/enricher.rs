//! Fetch, merge and persist pipeline for one batch of primary ids.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, histogram};
use sea_orm::DatabaseConnection;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::images::ImageResolver;
use super::payload::{GameRelations, PartialGame};
use super::relations::RelationReconciler;
use crate::error::SyncError;
use crate::models::external_source_link::SourceKind;
use crate::models::game;
use crate::priority::PriorityScorer;
use crate::repositories::GameRepository;
use crate::repositories::game::UpsertStatus;
use crate::repositories::source_link::{self, LinkTarget};
use crate::sources::{IgdbRecord, MetadataSource, StorefrontDetails, StorefrontSource, steam};
use crate::telemetry::current_run_id;

/// Result of persisting one game.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichOutcome {
    pub game_id: Uuid,
    pub igdb_id: i64,
    pub name: String,
    pub status: UpsertStatus,
    pub steam_app_id: Option<i64>,
}

/// Per-id result of [`SourceEnricher::enrich_batch`].
#[derive(Debug)]
pub struct EnrichResult {
    pub igdb_id: i64,
    pub outcome: Result<EnrichOutcome, SyncError>,
}

struct Fetched {
    record: IgdbRecord,
    existing: Option<game::Model>,
    steam_app_id: Option<i64>,
}

/// Rebuilds a shared batch-level error for one entity.
fn for_entity(err: &SyncError, origin: SourceKind) -> SyncError {
    match err {
        SyncError::NotFound { origin, id } => SyncError::NotFound {
            origin: *origin,
            id: id.clone(),
        },
        SyncError::Upstream {
            origin,
            status,
            message,
        } => SyncError::Upstream {
            origin: *origin,
            status: *status,
            message: message.clone(),
        },
        SyncError::RateLimited {
            origin,
            retry_after_secs,
        } => SyncError::RateLimited {
            origin: *origin,
            retry_after_secs: *retry_after_secs,
        },
        other => SyncError::upstream(origin, other.to_string()),
    }
}

pub struct SourceEnricher {
    db: Arc<DatabaseConnection>,
    games: GameRepository,
    metadata: Arc<dyn MetadataSource>,
    storefront: Arc<dyn StorefrontSource>,
    images: ImageResolver,
    relations: RelationReconciler,
    scorer: Arc<dyn PriorityScorer>,
}

impl SourceEnricher {
    pub fn new(
        db: Arc<DatabaseConnection>,
        metadata: Arc<dyn MetadataSource>,
        storefront: Arc<dyn StorefrontSource>,
        images: ImageResolver,
        scorer: Arc<dyn PriorityScorer>,
    ) -> Self {
        Self {
            games: GameRepository::new(db.clone()),
            relations: RelationReconciler::new(db.clone()),
            db,
            metadata,
            storefront,
            images,
            scorer,
        }
    }

    /// On-demand lookup of a single game.
    pub async fn enrich_one(&self, igdb_id: i64) -> Result<EnrichOutcome, SyncError> {
        self.enrich_batch(&[igdb_id], Duration::ZERO)
            .await
            .pop()
            .map(|result| result.outcome)
            .unwrap_or_else(|| Err(SyncError::not_found(SourceKind::Igdb, igdb_id)))
    }

    /// Fetches primary records sequentially (pausing `delay` between calls),
    /// makes one storefront call for every discovered app id, then persists
    /// each game. Failures are reported per id; the batch always completes.
    #[instrument(skip_all, fields(batch = igdb_ids.len(), run_id = %current_run_id().unwrap_or_default()))]
    pub async fn enrich_batch(&self, igdb_ids: &[i64], delay: Duration) -> Vec<EnrichResult> {
        let started = Instant::now();
        let mut fetched: Vec<(i64, Result<Fetched, SyncError>)> = Vec::with_capacity(igdb_ids.len());

        for (index, igdb_id) in igdb_ids.iter().copied().enumerate() {
            if index > 0 && !delay.is_zero() {
                sleep(delay).await;
            }
            fetched.push((igdb_id, self.fetch(igdb_id).await));
        }

        let app_ids: BTreeSet<i64> = fetched
            .iter()
            .filter_map(|(_, result)| result.as_ref().ok()?.steam_app_id)
            .collect();
        let storefront = self.fetch_storefront(app_ids).await;

        let mut results = Vec::with_capacity(fetched.len());
        for (igdb_id, result) in fetched {
            let outcome = match result {
                Ok(fetched) => self.persist(fetched, &storefront).await,
                Err(err) => Err(err),
            };
            match &outcome {
                Ok(outcome) => {
                    counter!("gamesync_enrich_total", "status" => outcome.status.as_str())
                        .increment(1);
                }
                Err(err) => {
                    counter!("gamesync_enrich_total", "status" => err.kind_label()).increment(1);
                    warn!(
                        igdb_id,
                        source = err.origin().map(|s| s.as_str()).unwrap_or("local"),
                        error = %err,
                        "Enrichment failed"
                    );
                }
            }
            results.push(EnrichResult { igdb_id, outcome });
        }

        histogram!("gamesync_enrich_batch_duration_ms")
            .record(started.elapsed().as_secs_f64() * 1000.0);
        results
    }

    async fn fetch(&self, igdb_id: i64) -> Result<Fetched, SyncError> {
        if igdb_id <= 0 {
            return Err(SyncError::validation(format!("invalid primary id {igdb_id}")));
        }
        let record = self.metadata.fetch_game(igdb_id).await?;
        let existing = self.games.find_by_igdb_id(igdb_id).await?;
        let steam_app_id = super::storefront_id::discover(&record.game)
            .or_else(|| existing.as_ref().and_then(|g| g.steam_app_id));
        Ok(Fetched {
            record,
            existing,
            steam_app_id,
        })
    }

    async fn fetch_storefront(
        &self,
        app_ids: BTreeSet<i64>,
    ) -> Result<HashMap<i64, StorefrontDetails>, SyncError> {
        if app_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let ids: Vec<i64> = app_ids.into_iter().collect();
        match self.storefront.fetch_details(&ids).await {
            Ok(details) => Ok(details),
            Err(err) => {
                warn!(requested = ids.len(), error = %err, "Storefront batch failed; continuing without it");
                Err(err)
            }
        }
    }

    async fn persist(
        &self,
        fetched: Fetched,
        storefront: &Result<HashMap<i64, StorefrontDetails>, SyncError>,
    ) -> Result<EnrichOutcome, SyncError> {
        let now = Utc::now();
        let Fetched {
            record,
            existing,
            steam_app_id,
        } = fetched;

        let mut partial = PartialGame::from_igdb(&record);
        partial.steam_app_id = steam_app_id;
        let relations = GameRelations::from_igdb(&record.game);

        let storefront_result = steam_app_id.map(|app_id| match storefront {
            Ok(map) => map
                .get(&app_id)
                .ok_or_else(|| SyncError::not_found(SourceKind::Steam, app_id)),
            Err(err) => Err(for_entity(err, SourceKind::Steam)),
        });
        if let Some(Ok(details)) = &storefront_result {
            partial.merge_storefront(details);
        }
        if let Some(existing) = &existing {
            partial.carry_over(existing);
        }
        self.images.resolve(&mut partial).await;

        let (model, status) = self.games.upsert(partial.into_upsert(), now).await?;
        self.relations.reconcile(model.id, &relations).await?;

        let mut primary_link = LinkTarget::new(model.id, SourceKind::Igdb).with_uid(model.igdb_id);
        if let Some(url) = record.game.url.as_deref() {
            primary_link = primary_link.with_url(url);
        }
        source_link::record_success(self.db.as_ref(), &primary_link, None, now).await?;

        if let Some(app_id) = steam_app_id {
            let target = LinkTarget::new(model.id, SourceKind::Steam)
                .with_uid(app_id)
                .with_url(steam::store_url(app_id));
            match storefront_result {
                Some(Ok(details)) => {
                    source_link::record_success(
                        self.db.as_ref(),
                        &target,
                        Some(details.to_payload()),
                        now,
                    )
                    .await?;
                }
                Some(Err(err)) => {
                    debug!(igdb_id = model.igdb_id, app_id, error = %err, "Storefront link failed");
                    source_link::record_failure(self.db.as_ref(), &target, &err, now).await?;
                }
                None => {}
            }

            let stats = LinkTarget::new(model.id, SourceKind::SteamSpy).with_uid(app_id);
            source_link::ensure(self.db.as_ref(), &stats).await?;
        }

        let priority = self
            .games
            .refresh_priority(&model, self.scorer.as_ref(), now)
            .await?;

        info!(
            igdb_id = model.igdb_id,
            game_id = %model.id,
            status = status.as_str(),
            priority,
            "Game enriched"
        );

        Ok(EnrichOutcome {
            game_id: model.id,
            igdb_id: model.igdb_id,
            name: model.name,
            status,
            steam_app_id,
        })
    }
}
