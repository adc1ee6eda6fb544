//! # External Sources
//!
//! Clients for the four upstream APIs. Each is consumed through a trait so the
//! enrichment pipeline and tests can substitute their own implementation.
//!
//! | Trait | Client | Upstream |
//! |-------|--------|----------|
//! | [`MetadataSource`] | [`igdb::IgdbClient`] | IGDB |
//! | [`StorefrontSource`] | [`steam::SteamStoreClient`] | Steam storefront |
//! | [`ImageSource`] | [`steamgriddb::SteamGridDbClient`] | SteamGridDB |
//! | [`StatsSource`] | [`steamspy::SteamSpyClient`] | SteamSpy |

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;

use crate::error::SyncError;

pub mod http;
pub mod igdb;
pub mod steam;
pub mod steamgriddb;
pub mod steamspy;
pub mod token;

pub use igdb::IgdbRecord;
pub use steam::StorefrontDetails;
pub use steamspy::StatsSnapshot;

/// Primary metadata catalog.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetches one game by primary id. Missing ids are [`SyncError::NotFound`].
    async fn fetch_game(&self, igdb_id: i64) -> Result<IgdbRecord, SyncError>;
}

/// Storefront details, fetched for many app ids in one call.
#[async_trait]
pub trait StorefrontSource: Send + Sync {
    /// Ids the storefront reports as unsuccessful are absent from the map.
    async fn fetch_details(
        &self,
        app_ids: &[i64],
    ) -> Result<HashMap<i64, StorefrontDetails>, SyncError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
    Cover,
    Hero,
    Logo,
}

impl ImageKind {
    pub const ALL: [ImageKind; 3] = [ImageKind::Cover, ImageKind::Hero, ImageKind::Logo];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageKind::Cover => "cover",
            ImageKind::Hero => "hero",
            ImageKind::Logo => "logo",
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Disambiguation keys for an artwork lookup.
#[derive(Debug, Clone, Copy)]
pub struct ImageQuery<'a> {
    pub name: &'a str,
    pub steam_app_id: Option<i64>,
    pub igdb_id: i64,
}

/// Artwork lookups.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Returns one image url or `None` when the source has nothing for this game.
    async fn find_image(
        &self,
        kind: ImageKind,
        query: ImageQuery<'_>,
    ) -> Result<Option<String>, SyncError>;
}

/// Engagement statistics keyed by storefront app id.
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn fetch_stats(&self, app_id: i64) -> Result<StatsSnapshot, SyncError>;
}
