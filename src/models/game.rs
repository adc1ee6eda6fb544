//! Game entity model
//!
//! SeaORM entity for the `games` table. One row per primary-source id; rows are
//! upserted by the enricher and never hard-deleted.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "games")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Primary-source (IGDB) id, immutable once assigned
    #[sea_orm(unique)]
    pub igdb_id: i64,

    pub name: String,

    pub slug: Option<String>,

    /// `None` means unknown or TBA
    pub release_date: Option<DateTimeWithTimeZone>,

    pub summary: Option<String>,

    pub storyline: Option<String>,

    /// Aggregated rating (0-100) from the primary source
    #[sea_orm(column_type = "Double", nullable)]
    pub rating: Option<f64>,

    pub cover_image: Option<String>,

    pub hero_image: Option<String>,

    pub logo_image: Option<String>,

    /// Storefront app id discovered through the fallback chain
    pub steam_app_id: Option<i64>,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub screenshots: Option<JsonValue>,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub videos: Option<JsonValue>,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub similar_games: Option<JsonValue>,

    /// Last storefront detail payload (price, platforms, reviews)
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub storefront_payload: Option<JsonValue>,

    /// Raw primary-source payload as last fetched
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub source_payload: Option<JsonValue>,

    /// Incremented only by view tracking
    pub view_count: i64,

    /// Manual editorial boost added to the computed priority
    pub priority_boost: i32,

    pub update_priority: i32,

    pub last_synced_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::external_source_link::Entity")]
    ExternalSourceLinks,
}

impl Related<super::external_source_link::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ExternalSourceLinks.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
