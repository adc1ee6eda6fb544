//! Artwork backfill.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, warn};

use super::payload::PartialGame;
use crate::sources::{ImageQuery, ImageSource};

/// Requests each missing image kind independently; never replaces a present one.
#[derive(Clone)]
pub struct ImageResolver {
    source: Option<Arc<dyn ImageSource>>,
}

impl ImageResolver {
    /// `None` disables lookups entirely; missing images stay empty.
    pub fn new(source: Option<Arc<dyn ImageSource>>) -> Self {
        Self { source }
    }

    pub fn is_enabled(&self) -> bool {
        self.source.is_some()
    }

    pub async fn resolve(&self, game: &mut PartialGame) {
        let Some(source) = self.source.as_ref() else {
            return;
        };

        let name = game.display_name();
        for kind in game.missing_images() {
            let query = ImageQuery {
                name: &name,
                steam_app_id: game.steam_app_id,
                igdb_id: game.igdb_id,
            };
            match source.find_image(kind, query).await {
                Ok(Some(url)) => {
                    counter!("gamesync_image_lookups_total", "kind" => kind.as_str(), "result" => "found")
                        .increment(1);
                    game.fill_image(kind, url);
                }
                Ok(None) => {
                    counter!("gamesync_image_lookups_total", "kind" => kind.as_str(), "result" => "missing")
                        .increment(1);
                    debug!(igdb_id = game.igdb_id, kind = %kind, "No artwork available");
                }
                Err(err) => {
                    counter!("gamesync_image_lookups_total", "kind" => kind.as_str(), "result" => "error")
                        .increment(1);
                    warn!(
                        igdb_id = game.igdb_id,
                        kind = %kind,
                        error = %err,
                        "Artwork lookup failed; leaving field empty"
                    );
                }
            }
        }
    }
}
