//! Refresh priority scoring.
//!
//! The score orders refresh candidates. Only its ordering properties matter,
//! so the formula sits behind [`PriorityScorer`] and can be swapped.

use chrono::{DateTime, Utc};

use crate::config::PriorityConfig;
use crate::models::game;

/// Engagement and freshness inputs for one game.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrioritySignals {
    pub view_count: i64,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub priority_boost: i32,
}

impl PrioritySignals {
    pub fn from_game(game: &game::Model) -> Self {
        Self {
            view_count: game.view_count,
            last_synced_at: game.last_synced_at.map(|t| t.with_timezone(&Utc)),
            priority_boost: game.priority_boost,
        }
    }
}

pub trait PriorityScorer: Send + Sync {
    /// Score is non-negative and non-decreasing in `view_count`.
    fn score(&self, signals: &PrioritySignals, now: DateTime<Utc>) -> i32;
}

/// Log-scaled views plus linear staleness plus the manual boost.
#[derive(Debug, Clone)]
pub struct WeightedPriorityScorer {
    config: PriorityConfig,
}

impl WeightedPriorityScorer {
    pub fn new(config: PriorityConfig) -> Self {
        Self { config }
    }
}

impl Default for WeightedPriorityScorer {
    fn default() -> Self {
        Self::new(PriorityConfig::default())
    }
}

impl PriorityScorer for WeightedPriorityScorer {
    fn score(&self, signals: &PrioritySignals, now: DateTime<Utc>) -> i32 {
        let views = signals.view_count.max(0) as f64;
        let view_score =
            ((views + 1.0).log10() * self.config.view_weight).min(self.config.view_cap as f64);

        let staleness_score = match signals.last_synced_at {
            Some(synced) => {
                let days = (now - synced).num_days().max(0) as f64;
                (days * self.config.staleness_per_day).min(self.config.staleness_cap as f64)
            }
            None => self.config.staleness_cap as f64,
        };

        let total = view_score.floor() as i32 + staleness_score.floor() as i32;
        total.saturating_add(signals.priority_boost).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn signals(view_count: i64) -> PrioritySignals {
        PrioritySignals {
            view_count,
            last_synced_at: Some(Utc::now()),
            priority_boost: 0,
        }
    }

    #[test]
    fn more_views_never_lower_the_score() {
        let scorer = WeightedPriorityScorer::default();
        let now = Utc::now();
        let mut previous = 0;
        for views in [0, 1, 5, 10, 100, 1_000, 100_000, 10_000_000] {
            let score = scorer.score(&signals(views), now);
            assert!(score >= previous, "{views} views scored {score} < {previous}");
            previous = score;
        }
    }

    #[test]
    fn staleness_raises_priority_up_to_cap() {
        let scorer = WeightedPriorityScorer::default();
        let now = Utc::now();
        let fresh = scorer.score(&signals(10), now);
        let stale = scorer.score(
            &PrioritySignals {
                last_synced_at: Some(now - Duration::days(400)),
                ..signals(10)
            },
            now,
        );
        let never = scorer.score(
            &PrioritySignals {
                last_synced_at: None,
                ..signals(10)
            },
            now,
        );
        assert!(stale > fresh);
        assert_eq!(stale, never);
    }

    #[test]
    fn boost_is_additive_and_score_is_clamped() {
        let scorer = WeightedPriorityScorer::default();
        let now = Utc::now();
        let base = scorer.score(&signals(50), now);
        let boosted = scorer.score(
            &PrioritySignals {
                priority_boost: 25,
                ..signals(50)
            },
            now,
        );
        assert_eq!(boosted, base + 25);

        let negative = scorer.score(
            &PrioritySignals {
                priority_boost: -1_000,
                ..signals(50)
            },
            now,
        );
        assert_eq!(negative, 0);
    }
}
