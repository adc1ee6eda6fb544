//! External source link state machine.
//!
//! Transitions are pure: they take the persisted state plus an outcome and
//! return the next state. Repositories apply the result to the row.

use chrono::{DateTime, Duration, Utc};

use crate::error::SyncError;
use crate::models::external_source_link::{Model as LinkModel, SyncStatus};

/// Upstream `Retry-After` hints are honoured up to one year.
pub const MAX_RETRY_AFTER_SECS: u64 = 365 * 24 * 3600;

/// Delay before a link with `retry_count` consecutive failures may be retried.
///
/// 1 → 1h, 2 → 4h, 3 → 24h, 4 and beyond → 168h.
pub fn backoff_for(retry_count: i32) -> Duration {
    match retry_count {
        i32::MIN..=1 => Duration::hours(1),
        2 => Duration::hours(4),
        3 => Duration::hours(24),
        _ => Duration::hours(168),
    }
}

/// Snapshot of the mutable sync fields of one link.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkState {
    pub status: SyncStatus,
    pub retry_count: i32,
    pub last_attempted_at: Option<DateTime<Utc>>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for LinkState {
    fn default() -> Self {
        Self {
            status: SyncStatus::Pending,
            retry_count: 0,
            last_attempted_at: None,
            last_synced_at: None,
            next_retry_at: None,
            last_error: None,
        }
    }
}

impl LinkState {
    pub fn from_model(model: &LinkModel) -> Self {
        Self {
            status: model.status(),
            retry_count: model.retry_count,
            last_attempted_at: model.last_attempted_at.map(|t| t.with_timezone(&Utc)),
            last_synced_at: model.last_synced_at.map(|t| t.with_timezone(&Utc)),
            next_retry_at: model.next_retry_at.map(|t| t.with_timezone(&Utc)),
            last_error: model.last_error.clone(),
        }
    }

    /// `pending|failed|synced --success--> synced`
    pub fn succeed(&self, now: DateTime<Utc>) -> Self {
        Self {
            status: SyncStatus::Synced,
            retry_count: 0,
            last_attempted_at: Some(now),
            last_synced_at: Some(now),
            next_retry_at: None,
            last_error: None,
        }
    }

    /// `any --failure--> failed`, scheduling the next attempt.
    ///
    /// Rate-limited failures wait one tier longer and never less than the
    /// upstream `Retry-After` hint.
    pub fn fail(&self, error: &SyncError, now: DateTime<Utc>) -> Self {
        let retry_count = self.retry_count.saturating_add(1);
        let mut delay = if error.is_rate_limited() {
            backoff_for(retry_count.saturating_add(1))
        } else {
            backoff_for(retry_count)
        };
        if let Some(hint) = error.retry_after_secs() {
            let hint = hint.min(MAX_RETRY_AFTER_SECS) as i64;
            delay = delay.max(Duration::seconds(hint));
        }

        Self {
            status: SyncStatus::Failed,
            retry_count,
            last_attempted_at: Some(now),
            last_synced_at: self.last_synced_at,
            next_retry_at: Some(now + delay),
            last_error: Some(error.to_string()),
        }
    }

    /// A failed link waits for its backoff to elapse; other states are always eligible.
    pub fn is_retry_eligible(&self, now: DateTime<Utc>) -> bool {
        match (self.status, self.next_retry_at) {
            (SyncStatus::Failed, Some(next)) => next <= now,
            _ => true,
        }
    }
}
