//! Process-wide wiring: configuration, database pool, HTTP client and the
//! source clients built from them.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use reqwest::Client;
use sea_orm::DatabaseConnection;
use tracing::info;

use crate::config::AppConfig;
use crate::db;
use crate::enrichment::{ImageResolver, SourceEnricher};
use crate::priority::{PriorityScorer, WeightedPriorityScorer};
use crate::scheduler::StalenessScheduler;
use crate::sources::http::build_client;
use crate::sources::igdb::IgdbClient;
use crate::sources::steam::SteamStoreClient;
use crate::sources::steamgriddb::SteamGridDbClient;
use crate::sources::steamspy::SteamSpyClient;
use crate::sources::token::TokenCache;
use crate::sources::{ImageSource, MetadataSource, StatsSource, StorefrontSource};
use crate::stats_sync::StatsSyncCoordinator;
use crate::sync_executor::JobExecutor;

pub struct AppContext {
    pub config: AppConfig,
    pub db: Arc<DatabaseConnection>,
    http: Client,
    scorer: Arc<dyn PriorityScorer>,
}

impl AppContext {
    /// Connects to the database, applying migrations first when `auto_migrate` is set.
    pub async fn connect(config: AppConfig) -> Result<Self> {
        let pool = db::init_pool(&config)
            .await
            .context("initializing database connection pool")?;
        if config.auto_migrate {
            db::migrate(&pool).await?;
        }
        let http = build_client(&config.sources).context("building HTTP client")?;
        let scorer: Arc<dyn PriorityScorer> =
            Arc::new(WeightedPriorityScorer::new(config.priority.clone()));

        Ok(Self {
            config,
            db: Arc::new(pool),
            http,
            scorer,
        })
    }

    pub fn scorer(&self) -> Arc<dyn PriorityScorer> {
        self.scorer.clone()
    }

    pub fn metadata_source(&self) -> Result<Arc<dyn MetadataSource>> {
        let sources = &self.config.sources;
        let (Some(client_id), Some(client_secret)) = (
            sources.igdb_client_id.clone(),
            sources.igdb_client_secret.clone(),
        ) else {
            bail!(
                "IGDB credentials are missing; set GAMESYNC_IGDB_CLIENT_ID and GAMESYNC_IGDB_CLIENT_SECRET"
            );
        };
        let tokens = Arc::new(TokenCache::new(
            self.http.clone(),
            sources.twitch_token_url.clone(),
            client_id,
            client_secret,
        ));
        Ok(Arc::new(IgdbClient::new(
            self.http.clone(),
            sources.igdb_api_base.clone(),
            tokens,
        )))
    }

    pub fn storefront_source(&self) -> Arc<dyn StorefrontSource> {
        let sources = &self.config.sources;
        Arc::new(SteamStoreClient::new(
            self.http.clone(),
            sources.steam_store_base.clone(),
            sources.steam_country.clone(),
            sources.steam_language.clone(),
        ))
    }

    /// `None` when no image API key is configured.
    pub fn image_source(&self) -> Option<Arc<dyn ImageSource>> {
        let sources = &self.config.sources;
        let key = sources.steamgriddb_api_key.clone()?;
        Some(Arc::new(SteamGridDbClient::new(
            self.http.clone(),
            sources.steamgriddb_api_base.clone(),
            key,
        )))
    }

    pub fn stats_source(&self) -> Arc<dyn StatsSource> {
        Arc::new(SteamSpyClient::new(
            self.http.clone(),
            self.config.sources.steamspy_api_base.clone(),
        ))
    }

    pub fn enricher(&self) -> Result<SourceEnricher> {
        let images = ImageResolver::new(self.image_source());
        if !images.is_enabled() {
            info!("No image API key configured; artwork backfill disabled");
        }
        Ok(SourceEnricher::new(
            self.db.clone(),
            self.metadata_source()?,
            self.storefront_source(),
            images,
            self.scorer(),
        ))
    }

    pub fn scheduler(&self) -> StalenessScheduler {
        StalenessScheduler::new(self.config.scheduler.clone(), self.db.clone())
    }

    pub fn stats_coordinator(&self) -> StatsSyncCoordinator {
        StatsSyncCoordinator::new(
            self.config.stats.clone(),
            self.db.clone(),
            self.stats_source(),
        )
    }

    /// Executor with every job handler registered.
    pub fn executor(&self) -> JobExecutor {
        JobExecutor::new(
            self.db.clone(),
            self.config.executor.clone(),
            self.config.job_retry.clone(),
        )
        .register(Arc::new(self.stats_coordinator()))
    }
}
