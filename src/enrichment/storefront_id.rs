//! Storefront app id discovery.
//!
//! Typed external records win over URL scraping; the first match in each
//! stage is taken.

use std::sync::LazyLock;

use regex::Regex;

use crate::sources::igdb::IgdbGame;

/// `external_games.category` value for Steam.
pub const STEAM_CATEGORY: i64 = 1;

static APP_PATH: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"/app/(\d+)").ok());

/// App id embedded in a storefront URL such as `https://store.steampowered.com/app/440/`.
pub fn app_id_from_url(url: &str) -> Option<i64> {
    let captures = APP_PATH.as_ref()?.captures(url)?;
    captures.get(1)?.as_str().parse().ok()
}

fn numeric_uid(uid: &str) -> Option<i64> {
    if uid.is_empty() || !uid.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    uid.parse().ok()
}

/// Runs the fallback chain: Steam external record with a numeric uid, then any
/// external or website URL carrying `/app/<digits>`.
pub fn discover(game: &IgdbGame) -> Option<i64> {
    let externals = || game.external_games.iter().filter_map(|e| e.object());

    let typed = externals()
        .filter(|e| e.category == Some(STEAM_CATEGORY))
        .find_map(|e| e.uid().as_deref().and_then(numeric_uid));
    if typed.is_some() {
        return typed;
    }

    externals()
        .filter_map(|e| e.url.as_deref())
        .chain(
            game.websites
                .iter()
                .filter_map(|w| w.object())
                .filter_map(|w| w.url.as_deref()),
        )
        .find_map(app_id_from_url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::IgdbRecord;
    use serde_json::json;

    fn game(value: serde_json::Value) -> IgdbGame {
        IgdbRecord::from_raw(value).unwrap().game
    }

    #[test]
    fn typed_record_wins_over_urls() {
        let game = game(json!({
            "id": 1,
            "external_games": [
                {"category": 5, "uid": "abc"},
                {"category": 1, "uid": "220"}
            ],
            "websites": [{"url": "https://store.steampowered.com/app/440/"}]
        }));
        assert_eq!(discover(&game), Some(220));
    }

    #[test]
    fn non_numeric_uid_falls_back_to_url() {
        let game = game(json!({
            "id": 1,
            "external_games": [{"category": 1, "uid": "tf2-legacy"}],
            "websites": [
                {"url": "https://example.com/"},
                {"url": "https://store.steampowered.com/app/440/"}
            ]
        }));
        assert_eq!(discover(&game), Some(440));
    }

    #[test]
    fn nothing_found_is_none() {
        let game = game(json!({"id": 1, "websites": [{"url": "https://gog.com/game/x"}]}));
        assert_eq!(discover(&game), None);
    }
}
