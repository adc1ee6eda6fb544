//! SteamGridDB artwork client.
//!
//! A game is resolved to its SteamGridDB id first (by storefront app id, then
//! by name search) and the resolution is cached, so the three artwork kinds
//! for one game cost a single lookup.

use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use lru::LruCache;
use reqwest::Client;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::debug;

use super::{ImageKind, ImageQuery, ImageSource, http};
use crate::error::SyncError;
use crate::models::external_source_link::SourceKind;

const RESOLUTION_CACHE_SIZE: usize = 512;
const COVER_DIMENSIONS: &str = "600x900";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct GridGame {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct GridAsset {
    #[serde(default)]
    url: Option<String>,
}

pub struct SteamGridDbClient {
    http: Client,
    api_base: String,
    api_key: String,
    resolved: Arc<RwLock<LruCache<String, Option<i64>>>>,
}

impl SteamGridDbClient {
    pub fn new(http: Client, api_base: String, api_key: String) -> Self {
        let capacity = NonZeroUsize::new(RESOLUTION_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Self {
            http,
            api_base,
            api_key,
            resolved: Arc::new(RwLock::new(LruCache::new(capacity))),
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, &str)],
        id: &str,
    ) -> Result<Option<T>, SyncError> {
        let url = http::endpoint(SourceKind::SteamGridDb, &self.api_base, segments)?;
        let request = self
            .http
            .get(url)
            .query(query)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key));

        let response = match http::send(SourceKind::SteamGridDb, id, request).await {
            Ok(response) => response,
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err),
        };
        let envelope: Envelope<T> = http::decode_json(SourceKind::SteamGridDb, response).await?;
        if !envelope.success {
            return Ok(None);
        }
        Ok(envelope.data)
    }

    /// Resolves the SteamGridDB game id, caching misses as well as hits.
    async fn resolve_game(&self, query: ImageQuery<'_>) -> Result<Option<i64>, SyncError> {
        let key = match query.steam_app_id {
            Some(app_id) => format!("steam:{app_id}"),
            None => format!("name:{}", query.name.trim().to_lowercase()),
        };

        {
            let mut cache = self.resolved.write().await;
            if let Some(hit) = cache.get(&key) {
                return Ok(*hit);
            }
        }

        let mut resolved = None;
        if let Some(app_id) = query.steam_app_id {
            let app_id = app_id.to_string();
            resolved = self
                .get::<GridGame>(&["games", "steam", &app_id], &[], &app_id)
                .await?
                .map(|game| game.id);
        }
        if resolved.is_none() && !query.name.trim().is_empty() {
            resolved = self
                .get::<Vec<GridGame>>(&["search", "autocomplete", query.name.trim()], &[], query.name)
                .await?
                .and_then(|games| games.into_iter().next())
                .map(|game| game.id);
        }

        debug!(
            igdb_id = query.igdb_id,
            grid_id = ?resolved,
            "Resolved artwork game id"
        );
        self.resolved.write().await.put(key, resolved);
        Ok(resolved)
    }
}

#[async_trait]
impl ImageSource for SteamGridDbClient {
    async fn find_image(
        &self,
        kind: ImageKind,
        query: ImageQuery<'_>,
    ) -> Result<Option<String>, SyncError> {
        let Some(grid_id) = self.resolve_game(query).await? else {
            return Ok(None);
        };
        let grid_id = grid_id.to_string();

        let (collection, params): (&str, &[(&str, &str)]) = match kind {
            ImageKind::Cover => ("grids", &[("dimensions", COVER_DIMENSIONS)]),
            ImageKind::Hero => ("heroes", &[]),
            ImageKind::Logo => ("logos", &[]),
        };

        let assets = self
            .get::<Vec<GridAsset>>(&[collection, "game", &grid_id], params, &grid_id)
            .await?
            .unwrap_or_default();

        Ok(assets
            .into_iter()
            .filter_map(|asset| asset.url)
            .find(|url| !url.trim().is_empty()))
    }
}
