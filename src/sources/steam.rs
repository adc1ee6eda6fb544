//! Steam storefront client (`/api/appdetails`).

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use tracing::{debug, warn};

use super::StorefrontSource;
use super::http;
use crate::error::SyncError;
use crate::models::external_source_link::SourceKind;

#[derive(Debug, Deserialize)]
struct AppDetailsEnvelope {
    success: bool,
    #[serde(default)]
    data: Option<JsonValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PriceOverview {
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub initial: Option<i64>,
    #[serde(rename = "final", default)]
    pub final_price: Option<i64>,
    #[serde(default)]
    pub discount_percent: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PlatformFlags {
    #[serde(default)]
    pub windows: bool,
    #[serde(default)]
    pub mac: bool,
    #[serde(default)]
    pub linux: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReleaseInfo {
    #[serde(default)]
    pub coming_soon: bool,
    #[serde(default)]
    pub date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
struct Total {
    #[serde(default)]
    total: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
struct Score {
    #[serde(default)]
    score: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
struct AppData {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    short_description: Option<String>,
    #[serde(default)]
    header_image: Option<String>,
    #[serde(default)]
    background: Option<String>,
    #[serde(default)]
    is_free: Option<bool>,
    #[serde(default)]
    price_overview: Option<PriceOverview>,
    #[serde(default)]
    platforms: Option<PlatformFlags>,
    #[serde(default)]
    release_date: Option<ReleaseInfo>,
    #[serde(default)]
    recommendations: Option<Total>,
    #[serde(default)]
    metacritic: Option<Score>,
}

/// Storefront detail for one app id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorefrontDetails {
    pub app_id: i64,
    pub name: Option<String>,
    pub short_description: Option<String>,
    pub header_image: Option<String>,
    pub background: Option<String>,
    pub is_free: Option<bool>,
    pub price: Option<PriceOverview>,
    pub platforms: Option<PlatformFlags>,
    pub release: Option<ReleaseInfo>,
    pub review_count: Option<i64>,
    pub metacritic_score: Option<i64>,
}

impl StorefrontDetails {
    fn from_data(app_id: i64, data: AppData) -> Self {
        Self {
            app_id,
            name: data.name,
            short_description: data.short_description.filter(|s| !s.trim().is_empty()),
            header_image: data.header_image.filter(|s| !s.trim().is_empty()),
            background: data.background.filter(|s| !s.trim().is_empty()),
            is_free: data.is_free,
            price: data.price_overview,
            platforms: data.platforms,
            release: data.release_date,
            review_count: data.recommendations.and_then(|r| r.total),
            metacritic_score: data.metacritic.and_then(|m| m.score),
        }
    }

    /// Compact payload persisted on the game and the storefront link.
    pub fn to_payload(&self) -> JsonValue {
        json!({
            "app_id": self.app_id,
            "name": self.name,
            "is_free": self.is_free,
            "price": self.price.as_ref().map(|p| json!({
                "currency": p.currency,
                "initial": p.initial,
                "final": p.final_price,
                "discount_percent": p.discount_percent,
            })),
            "platforms": self.platforms.as_ref().map(|p| json!({
                "windows": p.windows,
                "mac": p.mac,
                "linux": p.linux,
            })),
            "review_count": self.review_count,
            "metacritic_score": self.metacritic_score,
            "release_date": self.release.as_ref().and_then(|r| r.date.clone()),
            "coming_soon": self.release.as_ref().map(|r| r.coming_soon),
        })
    }
}

/// Public store page of an app.
pub fn store_url(app_id: i64) -> String {
    format!("https://store.steampowered.com/app/{app_id}/")
}

pub struct SteamStoreClient {
    http: Client,
    store_base: String,
    country: String,
    language: String,
}

impl SteamStoreClient {
    pub fn new(http: Client, store_base: String, country: String, language: String) -> Self {
        Self {
            http,
            store_base,
            country,
            language,
        }
    }
}

/// Decodes the id-keyed `{success, data}` map, dropping unsuccessful or unparseable entries.
pub fn parse_app_details(
    body: HashMap<String, JsonValue>,
) -> HashMap<i64, StorefrontDetails> {
    let mut details = HashMap::with_capacity(body.len());
    for (key, value) in body {
        let Ok(app_id) = key.parse::<i64>() else {
            warn!(key, "Storefront returned a non-numeric app id key");
            continue;
        };
        let envelope: AppDetailsEnvelope = match serde_json::from_value(value) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(app_id, error = %err, "Malformed storefront envelope");
                continue;
            }
        };
        if !envelope.success {
            debug!(app_id, "Storefront reported no data");
            continue;
        }
        let Some(data) = envelope.data else {
            continue;
        };
        match serde_json::from_value::<AppData>(data) {
            Ok(data) => {
                details.insert(app_id, StorefrontDetails::from_data(app_id, data));
            }
            Err(err) => warn!(app_id, error = %err, "Malformed storefront data"),
        }
    }
    details
}

#[async_trait]
impl StorefrontSource for SteamStoreClient {
    async fn fetch_details(
        &self,
        app_ids: &[i64],
    ) -> Result<HashMap<i64, StorefrontDetails>, SyncError> {
        if app_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let ids = app_ids
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let url = http::endpoint(SourceKind::Steam, &self.store_base, &["api", "appdetails"])?;
        let request = self.http.get(url).query(&[
            ("appids", ids.as_str()),
            ("cc", self.country.as_str()),
            ("l", self.language.as_str()),
        ]);

        let response = http::send(SourceKind::Steam, &ids, request).await?;
        let body: HashMap<String, JsonValue> =
            http::decode_json(SourceKind::Steam, response).await?;
        let details = parse_app_details(body);
        debug!(
            requested = app_ids.len(),
            returned = details.len(),
            "Fetched storefront details"
        );
        Ok(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsuccessful_entries_are_dropped() {
        let body: HashMap<String, JsonValue> = serde_json::from_value(json!({
            "440": {
                "success": true,
                "data": {
                    "name": "Team Fortress 2",
                    "is_free": true,
                    "header_image": "https://cdn.example/440/header.jpg",
                    "short_description": "",
                    "platforms": {"windows": true, "mac": false, "linux": true},
                    "release_date": {"coming_soon": false, "date": "10 Oct, 2007"},
                    "recommendations": {"total": 1000}
                }
            },
            "999999": {"success": false}
        }))
        .unwrap();

        let details = parse_app_details(body);
        assert_eq!(details.len(), 1);
        let tf2 = &details[&440];
        assert_eq!(tf2.short_description, None);
        assert_eq!(tf2.review_count, Some(1000));
        assert_eq!(tf2.to_payload()["release_date"], "10 Oct, 2007");
    }
}
