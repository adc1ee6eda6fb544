//! External source link repository
//!
//! Persists the per-(game, source) sync state. State transitions come from
//! [`crate::sync_state::LinkState`]; this module only reads and writes rows.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::{NullOrdering, OnConflict, Order};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::db::to_db_time;
use crate::error::SyncError;
use crate::models::external_source_link::{
    self, ActiveModel, Column, Entity as ExternalSourceLink, SourceKind, SyncStatus,
};
use crate::models::game::{self, Entity as Game};
use crate::sync_state::LinkState;

/// Where a game lives at one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTarget {
    pub game_id: Uuid,
    pub source: SourceKind,
    pub external_uid: Option<String>,
    pub external_url: Option<String>,
}

impl LinkTarget {
    pub fn new(game_id: Uuid, source: SourceKind) -> Self {
        Self {
            game_id,
            source,
            external_uid: None,
            external_url: None,
        }
    }

    pub fn with_uid(mut self, uid: impl ToString) -> Self {
        self.external_uid = Some(uid.to_string());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.external_url = Some(url.into());
        self
    }
}

/// Staleness windows for stats links.
#[derive(Debug, Clone, Copy)]
pub struct StatsDueWindow {
    pub priority_threshold: i32,
    pub high_priority_max_age: Duration,
    pub default_max_age: Duration,
}

pub async fn find<C>(
    conn: &C,
    game_id: Uuid,
    source: SourceKind,
) -> Result<Option<external_source_link::Model>, SyncError>
where
    C: ConnectionTrait,
{
    Ok(ExternalSourceLink::find()
        .filter(Column::GameId.eq(game_id))
        .filter(Column::Source.eq(source.as_str()))
        .one(conn)
        .await?)
}

/// Creates the link in `pending` state if missing; refreshes uid/url otherwise.
///
/// Sync status and backoff of an existing link are left untouched.
pub async fn ensure<C>(
    conn: &C,
    target: &LinkTarget,
) -> Result<external_source_link::Model, SyncError>
where
    C: ConnectionTrait,
{
    let now = to_db_time(Utc::now());
    let active = ActiveModel {
        id: Set(Uuid::new_v4()),
        game_id: Set(target.game_id),
        source: Set(target.source.as_str().to_string()),
        external_uid: Set(target.external_uid.clone()),
        external_url: Set(target.external_url.clone()),
        sync_status: Set(SyncStatus::Pending.as_str().to_string()),
        retry_count: Set(0),
        last_attempted_at: Set(None),
        last_synced_at: Set(None),
        next_retry_at: Set(None),
        last_error: Set(None),
        payload: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    };

    let mut on_conflict = OnConflict::columns([Column::GameId, Column::Source]);
    if target.external_uid.is_some() || target.external_url.is_some() {
        on_conflict.update_columns([Column::ExternalUid, Column::ExternalUrl, Column::UpdatedAt]);
    } else {
        on_conflict.do_nothing();
    }

    let result = ExternalSourceLink::insert(active)
        .on_conflict(on_conflict)
        .exec_without_returning(conn)
        .await;
    match result {
        Ok(_) | Err(DbErr::RecordNotInserted) => {}
        Err(err) => return Err(err.into()),
    }

    find(conn, target.game_id, target.source)
        .await?
        .ok_or_else(|| {
            DbErr::RecordNotFound(format!(
                "{} link for game {} after ensure",
                target.source, target.game_id
            ))
            .into()
        })
}

/// Writes `state` (and optionally a payload) onto an existing link row.
pub async fn apply_state<C>(
    conn: &C,
    link: external_source_link::Model,
    state: &LinkState,
    payload: Option<JsonValue>,
) -> Result<external_source_link::Model, SyncError>
where
    C: ConnectionTrait,
{
    let mut active: ActiveModel = link.into();
    active.sync_status = Set(state.status.as_str().to_string());
    active.retry_count = Set(state.retry_count);
    active.last_attempted_at = Set(state.last_attempted_at.map(to_db_time));
    active.last_synced_at = Set(state.last_synced_at.map(to_db_time));
    active.next_retry_at = Set(state.next_retry_at.map(to_db_time));
    active.last_error = Set(state.last_error.clone());
    if payload.is_some() {
        active.payload = Set(payload);
    }
    active.updated_at = Set(to_db_time(Utc::now()));
    Ok(active.update(conn).await?)
}

/// `--success--> synced` for the link described by `target`, creating it if needed.
pub async fn record_success<C>(
    conn: &C,
    target: &LinkTarget,
    payload: Option<JsonValue>,
    now: DateTime<Utc>,
) -> Result<external_source_link::Model, SyncError>
where
    C: ConnectionTrait,
{
    let link = ensure(conn, target).await?;
    let state = LinkState::from_model(&link).succeed(now);
    apply_state(conn, link, &state, payload).await
}

/// `--failure--> failed` for the link described by `target`, creating it if needed.
pub async fn record_failure<C>(
    conn: &C,
    target: &LinkTarget,
    error: &SyncError,
    now: DateTime<Utc>,
) -> Result<external_source_link::Model, SyncError>
where
    C: ConnectionTrait,
{
    let link = ensure(conn, target).await?;
    let state = LinkState::from_model(&link).fail(error, now);
    apply_state(conn, link, &state, None).await
}

#[derive(Clone)]
pub struct SourceLinkRepository {
    db: Arc<DatabaseConnection>,
}

impl SourceLinkRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find(
        &self,
        game_id: Uuid,
        source: SourceKind,
    ) -> Result<Option<external_source_link::Model>, SyncError> {
        find(self.db.as_ref(), game_id, source).await
    }

    pub async fn find_with_game(
        &self,
        link_id: Uuid,
    ) -> Result<Option<(external_source_link::Model, game::Model)>, SyncError> {
        let row = ExternalSourceLink::find_by_id(link_id)
            .find_also_related(Game)
            .one(self.db.as_ref())
            .await?;
        Ok(row.and_then(|(link, game)| game.map(|game| (link, game))))
    }

    pub async fn apply_state(
        &self,
        link: external_source_link::Model,
        state: &LinkState,
        payload: Option<JsonValue>,
    ) -> Result<external_source_link::Model, SyncError> {
        apply_state(self.db.as_ref(), link, state, payload).await
    }

    /// Links of `source` that are due under `window`, highest game priority first,
    /// then oldest sync first.
    ///
    /// Due means never synced or older than the priority-dependent window, and
    /// not a failed link still waiting for its `next_retry_at`.
    pub async fn select_due(
        &self,
        source: SourceKind,
        window: StatsDueWindow,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<(external_source_link::Model, game::Model)>, SyncError> {
        let high_cutoff = to_db_time(now - window.high_priority_max_age);
        let default_cutoff = to_db_time(now - window.default_max_age);

        let stale = Condition::any()
            .add(Column::LastSyncedAt.is_null())
            .add(
                Condition::all()
                    .add(game::Column::UpdatePriority.gte(window.priority_threshold))
                    .add(Column::LastSyncedAt.lt(high_cutoff)),
            )
            .add(
                Condition::all()
                    .add(game::Column::UpdatePriority.lt(window.priority_threshold))
                    .add(Column::LastSyncedAt.lt(default_cutoff)),
            );

        let backoff_elapsed = Condition::any()
            .add(Column::SyncStatus.ne(SyncStatus::Failed.as_str()))
            .add(Column::NextRetryAt.is_null())
            .add(Column::NextRetryAt.lte(to_db_time(now)));

        let rows = ExternalSourceLink::find()
            .find_also_related(Game)
            .filter(Column::Source.eq(source.as_str()))
            .filter(stale)
            .filter(backoff_elapsed)
            .order_by_desc(game::Column::UpdatePriority)
            .order_by_with_nulls(Column::LastSyncedAt, Order::Asc, NullOrdering::First)
            .order_by_asc(Column::Id)
            .limit(limit)
            .all(self.db.as_ref())
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(link, game)| game.map(|game| (link, game)))
            .collect())
    }
}
