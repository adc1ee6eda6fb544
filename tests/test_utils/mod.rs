//! Test utilities for database testing.
//!
//! In-memory SQLite with all migrations applied, catalog fixtures and
//! scripted stand-ins for the external sources.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gamesync::config::{AppConfig, SchedulerConfig};
use gamesync::db::{init_pool, to_db_time};
use gamesync::error::SyncError;
use gamesync::models::external_source_link::SourceKind;
use gamesync::models::game;
use gamesync::sources::{
    IgdbRecord, ImageKind, ImageQuery, ImageSource, MetadataSource, StatsSnapshot, StatsSource,
    StorefrontDetails, StorefrontSource,
};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let config = AppConfig {
        database_url: "sqlite::memory:".to_string(),
        ..AppConfig::default()
    };
    let db = init_pool(&config).await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

pub async fn setup_test_db_arc() -> Result<Arc<DatabaseConnection>> {
    Ok(Arc::new(setup_test_db().await?))
}

/// Scheduler settings without inter-request pauses.
pub fn fast_scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        stale_delay_ms: 0,
        popular_delay_ms: 0,
        recent_delay_ms: 0,
        ..SchedulerConfig::default()
    }
}

/// Builder for rows inserted straight into `games`.
#[derive(Debug, Clone)]
pub struct GameFixture {
    pub igdb_id: i64,
    pub name: String,
    pub update_priority: i32,
    pub view_count: i64,
    pub steam_app_id: Option<i64>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub release_date: Option<DateTime<Utc>>,
    pub cover_image: Option<String>,
}

impl GameFixture {
    pub fn new(igdb_id: i64) -> Self {
        Self {
            igdb_id,
            name: format!("Game {igdb_id}"),
            update_priority: 0,
            view_count: 0,
            steam_app_id: None,
            last_synced_at: None,
            release_date: None,
            cover_image: None,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.update_priority = priority;
        self
    }

    pub fn views(mut self, views: i64) -> Self {
        self.view_count = views;
        self
    }

    pub fn steam(mut self, app_id: i64) -> Self {
        self.steam_app_id = Some(app_id);
        self
    }

    pub fn synced(mut self, at: DateTime<Utc>) -> Self {
        self.last_synced_at = Some(at);
        self
    }

    pub fn released(mut self, at: DateTime<Utc>) -> Self {
        self.release_date = Some(at);
        self
    }

    pub fn cover(mut self, url: &str) -> Self {
        self.cover_image = Some(url.to_string());
        self
    }

    pub async fn insert(self, db: &DatabaseConnection) -> Result<game::Model> {
        let now = to_db_time(Utc::now());
        let active = game::ActiveModel {
            id: Set(Uuid::new_v4()),
            igdb_id: Set(self.igdb_id),
            name: Set(self.name),
            slug: Set(None),
            release_date: Set(self.release_date.map(to_db_time)),
            summary: Set(None),
            storyline: Set(None),
            rating: Set(None),
            cover_image: Set(self.cover_image),
            hero_image: Set(None),
            logo_image: Set(None),
            steam_app_id: Set(self.steam_app_id),
            screenshots: Set(None),
            videos: Set(None),
            similar_games: Set(None),
            storefront_payload: Set(None),
            source_payload: Set(None),
            view_count: Set(self.view_count),
            priority_boost: Set(0),
            update_priority: Set(self.update_priority),
            last_synced_at: Set(self.last_synced_at.map(to_db_time)),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(active.insert(db).await?)
    }
}

/// Canned failure a fake source replays; [`SyncError`] itself is not `Clone`.
#[derive(Debug, Clone)]
pub enum Failure {
    NotFound,
    Upstream(String),
    RateLimited(Option<u64>),
}

impl Failure {
    pub fn into_error(self, origin: SourceKind, id: i64) -> SyncError {
        match self {
            Failure::NotFound => SyncError::not_found(origin, id),
            Failure::Upstream(message) => SyncError::upstream(origin, message),
            Failure::RateLimited(retry_after_secs) => SyncError::RateLimited {
                origin,
                retry_after_secs,
            },
        }
    }
}

/// Primary source serving raw JSON records by id.
#[derive(Default)]
pub struct FakeMetadata {
    records: Mutex<HashMap<i64, Result<JsonValue, Failure>>>,
    pub calls: Mutex<Vec<i64>>,
}

impl FakeMetadata {
    pub fn with(self, id: i64, raw: JsonValue) -> Self {
        self.records.lock().unwrap().insert(id, Ok(raw));
        self
    }

    pub fn failing(self, id: i64, failure: Failure) -> Self {
        self.records.lock().unwrap().insert(id, Err(failure));
        self
    }

    pub fn set(&self, id: i64, raw: JsonValue) {
        self.records.lock().unwrap().insert(id, Ok(raw));
    }

    pub fn calls(&self) -> Vec<i64> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetadataSource for FakeMetadata {
    async fn fetch_game(&self, igdb_id: i64) -> Result<IgdbRecord, SyncError> {
        self.calls.lock().unwrap().push(igdb_id);
        let entry = self.records.lock().unwrap().get(&igdb_id).cloned();
        match entry {
            Some(Ok(raw)) => IgdbRecord::from_raw(raw),
            Some(Err(failure)) => Err(failure.into_error(SourceKind::Igdb, igdb_id)),
            None => Err(SyncError::not_found(SourceKind::Igdb, igdb_id)),
        }
    }
}

/// Storefront returning preset details; records each batched request.
#[derive(Default)]
pub struct FakeStorefront {
    details: Mutex<HashMap<i64, StorefrontDetails>>,
    failure: Mutex<Option<Failure>>,
    pub requests: Mutex<Vec<Vec<i64>>>,
}

impl FakeStorefront {
    pub fn with(self, details: StorefrontDetails) -> Self {
        self.details.lock().unwrap().insert(details.app_id, details);
        self
    }

    /// Every batch call fails with `failure`.
    pub fn failing(self, failure: Failure) -> Self {
        *self.failure.lock().unwrap() = Some(failure);
        self
    }

    pub fn requests(&self) -> Vec<Vec<i64>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorefrontSource for FakeStorefront {
    async fn fetch_details(
        &self,
        app_ids: &[i64],
    ) -> Result<HashMap<i64, StorefrontDetails>, SyncError> {
        self.requests.lock().unwrap().push(app_ids.to_vec());
        if let Some(failure) = self.failure.lock().unwrap().clone() {
            let first = app_ids.first().copied().unwrap_or_default();
            return Err(failure.into_error(SourceKind::Steam, first));
        }
        let details = self.details.lock().unwrap();
        Ok(app_ids
            .iter()
            .filter_map(|id| details.get(id).map(|d| (*id, d.clone())))
            .collect())
    }
}

/// Artwork source answering every lookup with a url derived from the kind,
/// unless that kind was scripted to fail.
#[derive(Default)]
pub struct FakeImages {
    failures: Mutex<HashMap<ImageKind, Failure>>,
    pub requested: Mutex<Vec<ImageKind>>,
}

impl FakeImages {
    pub fn failing(self, kind: ImageKind, failure: Failure) -> Self {
        self.failures.lock().unwrap().insert(kind, failure);
        self
    }

    pub fn requested(&self) -> Vec<ImageKind> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageSource for FakeImages {
    async fn find_image(
        &self,
        kind: ImageKind,
        query: ImageQuery<'_>,
    ) -> Result<Option<String>, SyncError> {
        self.requested.lock().unwrap().push(kind);
        if let Some(failure) = self.failures.lock().unwrap().get(&kind).cloned() {
            return Err(failure.into_error(SourceKind::SteamGridDb, query.igdb_id));
        }
        Ok(Some(format!("https://grid.test/{}/{}.png", kind.as_str(), query.igdb_id)))
    }
}

/// Stats source with a per-app scripted reply; unscripted ids succeed.
#[derive(Default)]
pub struct FakeStats {
    failures: Mutex<HashMap<i64, Failure>>,
    pub calls: Mutex<Vec<i64>>,
}

impl FakeStats {
    pub fn failing(self, app_id: i64, failure: Failure) -> Self {
        self.failures.lock().unwrap().insert(app_id, failure);
        self
    }

    pub fn calls(&self) -> Vec<i64> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatsSource for FakeStats {
    async fn fetch_stats(&self, app_id: i64) -> Result<StatsSnapshot, SyncError> {
        self.calls.lock().unwrap().push(app_id);
        if let Some(failure) = self.failures.lock().unwrap().get(&app_id).cloned() {
            return Err(failure.into_error(SourceKind::SteamSpy, app_id));
        }
        Ok(StatsSnapshot {
            app_id,
            owners: Some("1,000 .. 2,000".into()),
            positive: Some(10),
            negative: Some(1),
            ccu: Some(3),
            average_forever: Some(60),
        })
    }
}
