//! SteamSpy statistics client (`/api.php?request=appdetails`).

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use super::{StatsSource, http};
use crate::error::SyncError;
use crate::models::external_source_link::SourceKind;

#[derive(Debug, Deserialize)]
struct AppDetails {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    owners: Option<String>,
    #[serde(default)]
    positive: Option<i64>,
    #[serde(default)]
    negative: Option<i64>,
    #[serde(default)]
    ccu: Option<i64>,
    #[serde(default)]
    average_forever: Option<i64>,
}

/// Engagement numbers for one app id.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub app_id: i64,
    /// Owner range as reported, e.g. `"1,000,000 .. 2,000,000"`.
    pub owners: Option<String>,
    pub positive: Option<i64>,
    pub negative: Option<i64>,
    pub ccu: Option<i64>,
    pub average_forever: Option<i64>,
}

impl StatsSnapshot {
    pub fn to_payload(&self) -> JsonValue {
        json!({
            "app_id": self.app_id,
            "owners": self.owners,
            "positive": self.positive,
            "negative": self.negative,
            "ccu": self.ccu,
            "average_forever": self.average_forever,
        })
    }
}

/// Unknown app ids come back as a 200 with an empty name rather than a 404.
pub fn parse_app_details(app_id: i64, body: JsonValue) -> Result<StatsSnapshot, SyncError> {
    let details: AppDetails = serde_json::from_value(body).map_err(|err| {
        SyncError::upstream(SourceKind::SteamSpy, format!("malformed stats payload: {err}"))
    })?;

    if let Some(error) = details.error.filter(|e| !e.trim().is_empty()) {
        return Err(SyncError::upstream(SourceKind::SteamSpy, error));
    }
    if details.name.as_deref().is_none_or(|name| name.trim().is_empty()) {
        return Err(SyncError::not_found(SourceKind::SteamSpy, app_id));
    }

    Ok(StatsSnapshot {
        app_id,
        owners: details.owners,
        positive: details.positive,
        negative: details.negative,
        ccu: details.ccu,
        average_forever: details.average_forever,
    })
}

pub struct SteamSpyClient {
    http: Client,
    api_base: String,
}

impl SteamSpyClient {
    pub fn new(http: Client, api_base: String) -> Self {
        Self { http, api_base }
    }
}

#[async_trait]
impl StatsSource for SteamSpyClient {
    async fn fetch_stats(&self, app_id: i64) -> Result<StatsSnapshot, SyncError> {
        let url = http::endpoint(SourceKind::SteamSpy, &self.api_base, &["api.php"])?;
        let app = app_id.to_string();
        let request = self
            .http
            .get(url)
            .query(&[("request", "appdetails"), ("appid", app.as_str())]);
        let response = http::send(SourceKind::SteamSpy, &app, request).await?;
        let body: JsonValue = http::decode_json(SourceKind::SteamSpy, response).await?;
        parse_app_details(app_id, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_name_is_not_found() {
        let err = parse_app_details(7, json!({"appid": 7, "name": null})).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn error_field_is_upstream() {
        let err = parse_app_details(7, json!({"error": "rate limit exceeded"})).unwrap_err();
        assert_eq!(err.kind_label(), "upstream");
        assert!(err.is_retryable());
    }

    #[test]
    fn parses_counts() {
        let snapshot = parse_app_details(
            440,
            json!({
                "appid": 440,
                "name": "Team Fortress 2",
                "owners": "50,000,000 .. 100,000,000",
                "positive": 900000,
                "negative": 60000,
                "ccu": 70000,
                "average_forever": 9000
            }),
        )
        .unwrap();
        assert_eq!(snapshot.ccu, Some(70000));
        assert_eq!(snapshot.to_payload()["owners"], "50,000,000 .. 100,000,000");
    }
}
