//! Merge buffer between fetched payloads and the persisted game row.
//!
//! Primary values are authoritative. Storefront values and previously stored
//! images only fill fields that are still empty.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Value as JsonValue, json};
use tracing::warn;

use super::storefront_id;
use crate::error::SyncError;
use crate::models::game;
use crate::models::reference::{CompanyRoles, ReferenceItem, ReferenceKind};
use crate::repositories::game::GameUpsert;
use crate::sources::igdb::{self, Expanded, IgdbGame, NamedRef};
use crate::sources::{IgdbRecord, ImageKind, StorefrontDetails};

const STOREFRONT_DATE_FORMATS: [&str; 5] = ["%d %b, %Y", "%b %d, %Y", "%d %B, %Y", "%B %d, %Y", "%Y-%m-%d"];

/// Parses the storefront's free-form release date string (e.g. `"10 Oct, 2007"`).
pub fn parse_storefront_date(raw: &str) -> Result<DateTime<Utc>, SyncError> {
    let trimmed = raw.trim();
    STOREFRONT_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| SyncError::validation(format!("unparseable storefront date '{trimmed}'")))
}

fn non_blank(value: Option<&String>) -> Option<String> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty()).map(str::to_string)
}

fn fill<T: Clone>(slot: &mut Option<T>, value: Option<&T>) {
    if slot.is_none() {
        *slot = value.cloned();
    }
}

/// A game as assembled from one enrichment pass, before persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialGame {
    pub igdb_id: i64,
    pub name: Option<String>,
    pub slug: Option<String>,
    pub release_date: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub storyline: Option<String>,
    pub rating: Option<f64>,
    pub cover_image: Option<String>,
    pub hero_image: Option<String>,
    pub logo_image: Option<String>,
    pub steam_app_id: Option<i64>,
    pub screenshots: Option<JsonValue>,
    pub videos: Option<JsonValue>,
    pub similar_games: Option<JsonValue>,
    pub storefront_payload: Option<JsonValue>,
    pub source_payload: Option<JsonValue>,
}

impl PartialGame {
    pub fn from_igdb(record: &IgdbRecord) -> Self {
        let game = &record.game;

        let cover_image = game
            .cover
            .as_ref()
            .and_then(|c| c.object())
            .and_then(|c| c.image_id.as_deref())
            .map(|id| igdb::image_url(id, "t_cover_big"));
        let hero_image = game
            .artworks
            .iter()
            .filter_map(|a| a.object())
            .find_map(|a| a.image_id.as_deref())
            .map(|id| igdb::image_url(id, "t_1080p"));

        let screenshots: Vec<String> = game
            .screenshots
            .iter()
            .filter_map(|s| s.object())
            .filter_map(|s| s.image_id.as_deref())
            .map(|id| igdb::image_url(id, "t_screenshot_big"))
            .collect();
        let videos: Vec<JsonValue> = game
            .videos
            .iter()
            .filter_map(|v| v.object())
            .filter_map(|v| {
                v.video_id.as_deref().map(|id| {
                    json!({
                        "video_id": id,
                        "name": v.name,
                        "url": format!("https://www.youtube.com/watch?v={id}"),
                    })
                })
            })
            .collect();
        let similar: Vec<i64> = game.similar_games.iter().map(Expanded::<NamedRef>::id).collect();

        Self {
            igdb_id: game.id,
            name: non_blank(game.name.as_ref()),
            slug: non_blank(game.slug.as_ref()),
            release_date: game
                .first_release_date
                .and_then(|secs| DateTime::from_timestamp(secs, 0)),
            summary: non_blank(game.summary.as_ref()),
            storyline: non_blank(game.storyline.as_ref()),
            rating: game.total_rating.or(game.aggregated_rating),
            cover_image,
            hero_image,
            logo_image: None,
            steam_app_id: storefront_id::discover(game),
            screenshots: (!screenshots.is_empty()).then(|| json!(screenshots)),
            videos: (!videos.is_empty()).then(|| json!(videos)),
            similar_games: (!similar.is_empty()).then(|| json!(similar)),
            storefront_payload: None,
            source_payload: Some(record.raw.clone()),
        }
    }

    /// Fills still-empty fields from storefront details. Present values are kept.
    pub fn merge_storefront(&mut self, details: &StorefrontDetails) {
        fill(&mut self.name, details.name.as_ref());
        fill(&mut self.cover_image, details.header_image.as_ref());
        fill(&mut self.hero_image, details.background.as_ref());
        fill(&mut self.summary, details.short_description.as_ref());

        if self.release_date.is_none()
            && let Some(raw) = details.release.as_ref().and_then(|r| r.date.as_deref())
            && !raw.trim().is_empty()
        {
            match parse_storefront_date(raw) {
                Ok(date) => self.release_date = Some(date),
                Err(err) => warn!(
                    igdb_id = self.igdb_id,
                    app_id = details.app_id,
                    error = %err,
                    "Ignoring storefront release date"
                ),
            }
        }

        self.storefront_payload = Some(details.to_payload());
    }

    /// Keeps images and the storefront id already stored on `existing` where
    /// this pass produced nothing.
    pub fn carry_over(&mut self, existing: &game::Model) {
        fill(&mut self.cover_image, existing.cover_image.as_ref());
        fill(&mut self.hero_image, existing.hero_image.as_ref());
        fill(&mut self.logo_image, existing.logo_image.as_ref());
        fill(&mut self.steam_app_id, existing.steam_app_id.as_ref());
        fill(&mut self.storefront_payload, existing.storefront_payload.as_ref());
    }

    pub fn image(&self, kind: ImageKind) -> Option<&String> {
        match kind {
            ImageKind::Cover => self.cover_image.as_ref(),
            ImageKind::Hero => self.hero_image.as_ref(),
            ImageKind::Logo => self.logo_image.as_ref(),
        }
    }

    /// Sets an image only when the slot is empty.
    pub fn fill_image(&mut self, kind: ImageKind, url: String) {
        let slot = match kind {
            ImageKind::Cover => &mut self.cover_image,
            ImageKind::Hero => &mut self.hero_image,
            ImageKind::Logo => &mut self.logo_image,
        };
        if slot.is_none() {
            *slot = Some(url);
        }
    }

    pub fn missing_images(&self) -> Vec<ImageKind> {
        ImageKind::ALL
            .into_iter()
            .filter(|kind| self.image(*kind).is_none())
            .collect()
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("IGDB #{}", self.igdb_id))
    }

    pub fn into_upsert(self) -> GameUpsert {
        let name = self.display_name();
        GameUpsert {
            igdb_id: self.igdb_id,
            name,
            slug: self.slug,
            release_date: self.release_date,
            summary: self.summary,
            storyline: self.storyline,
            rating: self.rating,
            cover_image: self.cover_image,
            hero_image: self.hero_image,
            logo_image: self.logo_image,
            steam_app_id: self.steam_app_id,
            screenshots: self.screenshots,
            videos: self.videos,
            similar_games: self.similar_games,
            storefront_payload: self.storefront_payload,
            source_payload: self.source_payload,
        }
    }
}

/// Nested reference items grouped by kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameRelations {
    sets: BTreeMap<ReferenceKind, Vec<ReferenceItem>>,
}

fn named_items(refs: &[Expanded<NamedRef>]) -> Vec<ReferenceItem> {
    refs.iter()
        .map(|r| ReferenceItem::new(r.id(), r.name().map(str::to_string)))
        .collect()
}

impl GameRelations {
    pub fn from_igdb(game: &IgdbGame) -> Self {
        let companies = game
            .involved_companies
            .iter()
            .filter_map(|ic| ic.object())
            .filter_map(|ic| {
                let company = ic.company.as_ref()?;
                let roles = CompanyRoles {
                    developer: ic.developer.unwrap_or(false),
                    publisher: ic.publisher.unwrap_or(false),
                };
                Some(
                    ReferenceItem::new(company.id(), company.name().map(str::to_string))
                        .with_roles(roles),
                )
            })
            .collect();

        let mut sets = BTreeMap::new();
        sets.insert(ReferenceKind::Platform, named_items(&game.platforms));
        sets.insert(ReferenceKind::Genre, named_items(&game.genres));
        sets.insert(ReferenceKind::GameMode, named_items(&game.game_modes));
        sets.insert(ReferenceKind::Company, companies);
        sets.insert(ReferenceKind::Engine, named_items(&game.game_engines));
        sets.insert(ReferenceKind::Perspective, named_items(&game.player_perspectives));
        Self { sets }
    }

    pub fn items(&self, kind: ReferenceKind) -> &[ReferenceItem] {
        self.sets.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::steam::ReleaseInfo;

    fn record(value: JsonValue) -> IgdbRecord {
        IgdbRecord::from_raw(value).unwrap()
    }

    #[test]
    fn storefront_dates_in_known_formats() {
        let expected = NaiveDate::from_ymd_opt(2007, 10, 10)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc();
        for raw in ["10 Oct, 2007", "Oct 10, 2007", "10 October, 2007", "2007-10-10"] {
            assert_eq!(parse_storefront_date(raw).unwrap(), expected, "{raw}");
        }
        assert!(parse_storefront_date("Coming soon").is_err());
    }

    #[test]
    fn storefront_only_fills_gaps() {
        let mut partial = PartialGame::from_igdb(&record(json!({
            "id": 7,
            "name": "Portal",
            "summary": "Primary summary",
            "cover": {"id": 1, "image_id": "co1"}
        })));
        let details = StorefrontDetails {
            app_id: 400,
            name: Some("Portal (Storefront)".into()),
            short_description: Some("Storefront blurb".into()),
            header_image: Some("https://cdn.example/header.jpg".into()),
            background: Some("https://cdn.example/bg.jpg".into()),
            release: Some(ReleaseInfo {
                coming_soon: false,
                date: Some("TBA".into()),
            }),
            ..StorefrontDetails::default()
        };

        partial.merge_storefront(&details);

        assert_eq!(partial.name.as_deref(), Some("Portal"));
        assert_eq!(partial.summary.as_deref(), Some("Primary summary"));
        assert_eq!(
            partial.cover_image.as_deref(),
            Some("https://images.igdb.com/igdb/image/upload/t_cover_big/co1.jpg")
        );
        assert_eq!(partial.hero_image.as_deref(), Some("https://cdn.example/bg.jpg"));
        assert_eq!(partial.release_date, None);
        assert!(partial.storefront_payload.is_some());
    }

    #[test]
    fn companies_keep_roles_and_skip_bare_ids() {
        let game = record(json!({
            "id": 7,
            "involved_companies": [
                {"company": {"id": 56, "name": "Valve"}, "developer": true, "publisher": true},
                991
            ],
            "genres": [{"id": 31, "name": "Adventure"}, 5]
        }))
        .game;
        let relations = GameRelations::from_igdb(&game);

        let companies = relations.items(ReferenceKind::Company);
        assert_eq!(companies.len(), 1);
        assert!(companies[0].roles.developer && companies[0].roles.publisher);

        let genres = relations.items(ReferenceKind::Genre);
        assert_eq!(genres[1].external_id, 5);
        assert_eq!(genres[1].name, None);
    }

    #[test]
    fn missing_name_defaults_at_the_boundary() {
        let partial = PartialGame::from_igdb(&record(json!({"id": 99})));
        assert_eq!(partial.name, None);
        assert_eq!(partial.into_upsert().name, "IGDB #99");
    }
}
