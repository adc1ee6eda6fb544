//! Client-credentials token cache for the primary catalog API.
//!
//! One instance per process, shared through `Arc`. The token is reused until
//! shortly before its advertised expiry and dropped on a 401.

use std::time::{Duration, Instant};

use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::SyncError;
use crate::models::external_source_link::SourceKind;
use crate::sources::http;

/// Seconds shaved off the advertised lifetime so a token is never used at the edge.
const EXPIRY_MARGIN_SECS: u64 = 30;

/// Longest lifetime trusted from the token endpoint.
const MAX_TOKEN_TTL_SECS: u64 = 90 * 24 * 3600;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

pub struct TokenCache {
    http: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(http: Client, token_url: String, client_id: String, client_secret: String) -> Self {
        Self {
            http,
            token_url,
            client_id,
            client_secret,
            token: Mutex::new(None),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns a valid access token, fetching a new one when none is cached or it expired.
    pub async fn access_token(&self) -> Result<String, SyncError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref()
            && token.expires_at > Instant::now()
        {
            return Ok(token.access_token.clone());
        }

        let fresh = self.request_token().await?;
        let access_token = fresh.access_token.clone();
        *guard = Some(fresh);
        Ok(access_token)
    }

    /// Drops the cached token so the next call fetches a new one.
    pub async fn invalidate(&self) {
        let mut guard = self.token.lock().await;
        if guard.take().is_some() {
            debug!("Primary source token invalidated");
        }
    }

    async fn request_token(&self) -> Result<CachedToken, SyncError> {
        let request = self.http.post(&self.token_url).query(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "client_credentials"),
        ]);
        let response = http::send(SourceKind::Igdb, "oauth-token", request).await?;
        let token: TokenResponse = http::decode_json(SourceKind::Igdb, response).await?;

        let ttl = token_ttl(token.expires_in);
        info!(ttl_secs = ttl.as_secs(), "Fetched primary source access token");

        let now = Instant::now();
        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: now.checked_add(ttl).unwrap_or(now),
        })
    }
}

fn token_ttl(expires_in: u64) -> Duration {
    let secs = expires_in
        .min(MAX_TOKEN_TTL_SECS)
        .saturating_sub(EXPIRY_MARGIN_SECS)
        .max(EXPIRY_MARGIN_SECS);
    Duration::from_secs(secs)
}
