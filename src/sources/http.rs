//! Shared HTTP plumbing for the source clients.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::SourcesConfig;
use crate::error::SyncError;
use crate::models::external_source_link::SourceKind;

/// Builds the client shared by all sources: bounded timeout and a fixed user agent.
pub fn build_client(config: &SourcesConfig) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(Duration::from_millis(config.http_timeout_ms))
        .user_agent(config.user_agent.clone())
        .build()
}

/// Appends path segments to `base`, percent-encoding each one.
pub fn endpoint(origin: SourceKind, base: &str, segments: &[&str]) -> Result<Url, SyncError> {
    let mut url = Url::parse(base)
        .map_err(|err| SyncError::upstream(origin, format!("invalid base url '{base}': {err}")))?;
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| SyncError::upstream(origin, format!("base url '{base}' has no path")))?;
        path.pop_if_empty();
        for segment in segments {
            path.push(segment);
        }
    }
    Ok(url)
}

/// Maps a transport failure (including timeouts) to an upstream error.
pub fn transport_error(origin: SourceKind, err: reqwest::Error) -> SyncError {
    let message = if err.is_timeout() {
        format!("request timed out: {err}")
    } else {
        format!("transport error: {err}")
    };
    SyncError::upstream(origin, message)
}

fn retry_after_secs(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

/// Passes 2xx responses through; maps 404, 429 and everything else to [`SyncError`].
pub async fn check_status(
    origin: SourceKind,
    id: &str,
    response: Response,
) -> Result<Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::NOT_FOUND => Err(SyncError::not_found(origin, id)),
        StatusCode::TOO_MANY_REQUESTS => Err(SyncError::RateLimited {
            origin,
            retry_after_secs: retry_after_secs(&response),
        }),
        _ => {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            Err(SyncError::Upstream {
                origin,
                status: Some(status.as_u16()),
                message: format!("unexpected status {status}: {snippet}"),
            })
        }
    }
}

/// Reads the body as JSON, treating decode failures as upstream errors.
pub async fn decode_json<T: DeserializeOwned>(
    origin: SourceKind,
    response: Response,
) -> Result<T, SyncError> {
    let text = response
        .text()
        .await
        .map_err(|err| transport_error(origin, err))?;
    serde_json::from_str(&text)
        .map_err(|err| SyncError::upstream(origin, format!("malformed response: {err}")))
}

/// Sends a prepared request and applies status mapping.
pub async fn send(
    origin: SourceKind,
    id: &str,
    request: reqwest::RequestBuilder,
) -> Result<Response, SyncError> {
    let response = request
        .send()
        .await
        .map_err(|err| transport_error(origin, err))?;
    check_status(origin, id, response).await
}
