//! ExternalSourceLink entity model
//!
//! One row per (game, source) pair recording where the game lives upstream and
//! how its last synchronization went.

use std::fmt;
use std::str::FromStr;

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::game::Entity as Game;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "external_source_links")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub game_id: Uuid,

    /// Source slug, see [`SourceKind`]
    pub source: String,

    /// Identifier of the game at the source (e.g. storefront app id)
    pub external_uid: Option<String>,

    pub external_url: Option<String>,

    /// One of `pending`, `synced`, `failed`
    pub sync_status: String,

    /// Consecutive failures since the last success
    pub retry_count: i32,

    pub last_attempted_at: Option<DateTimeWithTimeZone>,

    pub last_synced_at: Option<DateTimeWithTimeZone>,

    /// Earliest time a failed link may be retried
    pub next_retry_at: Option<DateTimeWithTimeZone>,

    pub last_error: Option<String>,

    /// Last successful payload from this source
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub payload: Option<JsonValue>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "Game",
        from = "Column::GameId",
        to = "super::game::Column::Id"
    )]
    Game,
}

impl Related<Game> for Entity {
    fn to() -> RelationDef {
        Relation::Game.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// The external systems the pipeline talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Primary metadata catalog
    Igdb,
    /// Storefront details
    Steam,
    /// Artwork
    SteamGridDb,
    /// Engagement statistics
    SteamSpy,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Igdb => "igdb",
            SourceKind::Steam => "steam",
            SourceKind::SteamGridDb => "steamgriddb",
            SourceKind::SteamSpy => "steamspy",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "igdb" => Ok(SourceKind::Igdb),
            "steam" => Ok(SourceKind::Steam),
            "steamgriddb" => Ok(SourceKind::SteamGridDb),
            "steamspy" => Ok(SourceKind::SteamSpy),
            other => Err(format!("unknown source '{other}'")),
        }
    }
}

/// Persisted link status values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Pending,
    Synced,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
        }
    }

    /// Unknown strings are treated as pending so a bad row is retried rather than ignored.
    pub fn parse(value: &str) -> Self {
        match value {
            "synced" => SyncStatus::Synced,
            "failed" => SyncStatus::Failed,
            _ => SyncStatus::Pending,
        }
    }
}

impl Model {
    pub fn status(&self) -> SyncStatus {
        SyncStatus::parse(&self.sync_status)
    }

    pub fn source_kind(&self) -> Option<SourceKind> {
        self.source.parse().ok()
    }
}
