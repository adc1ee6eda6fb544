//! IGDB client.
//!
//! Queries are plain-text bodies POSTed to `/{endpoint}` with the Twitch
//! client id and a bearer token from [`TokenCache`].

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use super::MetadataSource;
use super::http;
use super::token::TokenCache;
use crate::error::SyncError;
use crate::models::external_source_link::SourceKind;

const IMAGE_BASE: &str = "https://images.igdb.com/igdb/image/upload";

/// Field projection for one game. Nested relations are expanded only as far
/// as the pipeline reads them.
pub const GAME_FIELDS: &str = "id,name,slug,summary,storyline,first_release_date,\
total_rating,aggregated_rating,url,\
cover.image_id,artworks.image_id,screenshots.image_id,videos.video_id,videos.name,\
similar_games,\
platforms.id,platforms.name,genres.id,genres.name,game_modes.id,game_modes.name,\
involved_companies.company.id,involved_companies.company.name,\
involved_companies.developer,involved_companies.publisher,\
game_engines.id,game_engines.name,player_perspectives.id,player_perspectives.name,\
external_games.category,external_games.uid,external_games.url,websites.url";

/// A nested field that arrives either as a bare id or as an expanded object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Expanded<T> {
    Id(i64),
    Object(T),
}

impl<T> Expanded<T> {
    pub fn object(&self) -> Option<&T> {
        match self {
            Expanded::Id(_) => None,
            Expanded::Object(value) => Some(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NamedRef {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

impl Expanded<NamedRef> {
    pub fn id(&self) -> i64 {
        match self {
            Expanded::Id(id) => *id,
            Expanded::Object(named) => named.id,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.object().and_then(|named| named.name.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Media {
    #[serde(default)]
    pub image_id: Option<String>,
    #[serde(default)]
    pub video_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InvolvedCompany {
    #[serde(default)]
    pub company: Option<Expanded<NamedRef>>,
    #[serde(default)]
    pub developer: Option<bool>,
    #[serde(default)]
    pub publisher: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExternalGame {
    #[serde(default)]
    pub category: Option<i64>,
    /// Usually a string, occasionally a number.
    #[serde(default)]
    pub uid: Option<JsonValue>,
    #[serde(default)]
    pub url: Option<String>,
}

impl ExternalGame {
    pub fn uid(&self) -> Option<String> {
        match self.uid.as_ref()? {
            JsonValue::String(value) => Some(value.trim().to_string()),
            JsonValue::Number(value) => Some(value.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Website {
    #[serde(default)]
    pub url: Option<String>,
}

/// One game as returned by `POST /games` with [`GAME_FIELDS`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IgdbGame {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub storyline: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub first_release_date: Option<i64>,
    #[serde(default)]
    pub total_rating: Option<f64>,
    #[serde(default)]
    pub aggregated_rating: Option<f64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub cover: Option<Expanded<Media>>,
    #[serde(default)]
    pub artworks: Vec<Expanded<Media>>,
    #[serde(default)]
    pub screenshots: Vec<Expanded<Media>>,
    #[serde(default)]
    pub videos: Vec<Expanded<Media>>,
    #[serde(default)]
    pub similar_games: Vec<Expanded<NamedRef>>,
    #[serde(default)]
    pub platforms: Vec<Expanded<NamedRef>>,
    #[serde(default)]
    pub genres: Vec<Expanded<NamedRef>>,
    #[serde(default)]
    pub game_modes: Vec<Expanded<NamedRef>>,
    #[serde(default)]
    pub involved_companies: Vec<Expanded<InvolvedCompany>>,
    #[serde(default)]
    pub game_engines: Vec<Expanded<NamedRef>>,
    #[serde(default)]
    pub player_perspectives: Vec<Expanded<NamedRef>>,
    #[serde(default)]
    pub external_games: Vec<Expanded<ExternalGame>>,
    #[serde(default)]
    pub websites: Vec<Expanded<Website>>,
}

/// Parsed game plus the raw object it came from.
#[derive(Debug, Clone)]
pub struct IgdbRecord {
    pub game: IgdbGame,
    pub raw: JsonValue,
}

impl IgdbRecord {
    pub fn from_raw(raw: JsonValue) -> Result<Self, SyncError> {
        let game = serde_json::from_value(raw.clone()).map_err(|err| {
            SyncError::upstream(SourceKind::Igdb, format!("malformed game payload: {err}"))
        })?;
        Ok(Self { game, raw })
    }
}

/// CDN url for an image id at the given size preset (e.g. `t_cover_big`).
pub fn image_url(image_id: &str, size: &str) -> String {
    format!("{IMAGE_BASE}/{size}/{image_id}.jpg")
}

pub struct IgdbClient {
    http: Client,
    api_base: String,
    tokens: Arc<TokenCache>,
}

impl IgdbClient {
    pub fn new(http: Client, api_base: String, tokens: Arc<TokenCache>) -> Self {
        Self {
            http,
            api_base,
            tokens,
        }
    }

    /// Runs one query against `endpoint`. A 401 drops the cached token and
    /// retries once with a fresh one.
    pub async fn query(
        &self,
        endpoint: &str,
        body: &str,
        id: &str,
    ) -> Result<Vec<JsonValue>, SyncError> {
        let url = http::endpoint(SourceKind::Igdb, &self.api_base, &[endpoint])?;
        let mut refreshed = false;

        loop {
            let token = self.tokens.access_token().await?;
            let response = self
                .http
                .post(url.clone())
                .header("Client-ID", self.tokens.client_id())
                .header(AUTHORIZATION, format!("Bearer {token}"))
                .header(CONTENT_TYPE, "text/plain")
                .body(body.to_string())
                .send()
                .await
                .map_err(|err| http::transport_error(SourceKind::Igdb, err))?;

            if response.status() == StatusCode::UNAUTHORIZED && !refreshed {
                warn!(endpoint, "Primary source rejected token; refreshing");
                self.tokens.invalidate().await;
                refreshed = true;
                continue;
            }

            let response = http::check_status(SourceKind::Igdb, id, response).await?;
            return http::decode_json(SourceKind::Igdb, response).await;
        }
    }
}

#[async_trait]
impl MetadataSource for IgdbClient {
    async fn fetch_game(&self, igdb_id: i64) -> Result<IgdbRecord, SyncError> {
        let body = format!("fields {GAME_FIELDS}; where id = {igdb_id}; limit 1;");
        let rows = self.query("games", &body, &igdb_id.to_string()).await?;
        let Some(raw) = rows.into_iter().next() else {
            return Err(SyncError::not_found(SourceKind::Igdb, igdb_id));
        };
        debug!(igdb_id, "Fetched primary record");
        IgdbRecord::from_raw(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_refs_accept_ids_and_objects() {
        let record = IgdbRecord::from_raw(json!({
            "id": 1942,
            "name": "The Witcher 3",
            "platforms": [6, {"id": 48, "name": "PlayStation 4"}],
            "involved_companies": [
                {"company": {"id": 908, "name": "CD Projekt RED"}, "developer": true, "publisher": false},
                77
            ],
            "external_games": [{"category": 1, "uid": 292030}]
        }))
        .unwrap();

        let platforms: Vec<(i64, Option<&str>)> = record
            .game
            .platforms
            .iter()
            .map(|p| (p.id(), p.name()))
            .collect();
        assert_eq!(platforms, vec![(6, None), (48, Some("PlayStation 4"))]);
        assert_eq!(record.game.involved_companies.len(), 2);
        assert!(record.game.involved_companies[1].object().is_none());

        let external = record.game.external_games[0].object().unwrap();
        assert_eq!(external.uid().as_deref(), Some("292030"));
    }

    #[test]
    fn missing_id_is_malformed() {
        let err = IgdbRecord::from_raw(json!({"name": "no id"})).unwrap_err();
        assert_eq!(err.kind_label(), "upstream");
    }
}
