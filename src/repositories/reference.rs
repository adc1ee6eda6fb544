//! Reference lookup repository
//!
//! Find-or-create for the six lookup tables and replacement of a game's
//! association set. Functions take any [`ConnectionTrait`] so callers can
//! compose them inside one transaction.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use sea_orm::sea_query::{Alias, Expr, OnConflict, Query};
use sea_orm::{ConnectionTrait, DbErr};
use uuid::Uuid;

use crate::db::to_db_time;
use crate::error::SyncError;
use crate::models::reference::{CompanyRoles, ReferenceItem, ReferenceKind};

fn build_err(err: sea_orm::sea_query::error::Error) -> DbErr {
    DbErr::Custom(format!("failed to build reference statement: {err}"))
}

/// Collapses duplicate external ids, keeping the first real name and OR-ing roles.
pub fn dedupe_items(items: &[ReferenceItem]) -> Vec<ReferenceItem> {
    let mut merged: BTreeMap<i64, ReferenceItem> = BTreeMap::new();
    for item in items {
        merged
            .entry(item.external_id)
            .and_modify(|existing| {
                if existing.name.is_none() {
                    existing.name = item.name.clone();
                }
                existing.roles = existing.roles.merge(item.roles);
            })
            .or_insert_with(|| item.clone());
    }
    merged.into_values().collect()
}

/// Ensures one row per external id and returns `external_id -> local id`.
///
/// Inserts use `ON CONFLICT (external_id) DO NOTHING`, so concurrent callers
/// discovering the same id converge on a single row. A stored placeholder name
/// is upgraded when `items` carries a real one; real names are kept.
pub async fn find_or_create<C>(
    conn: &C,
    kind: ReferenceKind,
    items: &[ReferenceItem],
) -> Result<HashMap<i64, Uuid>, SyncError>
where
    C: ConnectionTrait,
{
    if items.is_empty() {
        return Ok(HashMap::new());
    }

    let table = Alias::new(kind.table());
    let backend = conn.get_database_backend();
    let now = to_db_time(Utc::now());

    for item in items {
        let name = item
            .name
            .clone()
            .unwrap_or_else(|| kind.placeholder_name(item.external_id));

        let insert = Query::insert()
            .into_table(table.clone())
            .columns([
                Alias::new("id"),
                Alias::new("external_id"),
                Alias::new("name"),
                Alias::new("created_at"),
            ])
            .values([
                Uuid::new_v4().into(),
                item.external_id.into(),
                name.clone().into(),
                now.into(),
            ])
            .map_err(build_err)?
            .on_conflict(
                OnConflict::column(Alias::new("external_id"))
                    .do_nothing()
                    .to_owned(),
            )
            .to_owned();
        conn.execute(backend.build(&insert)).await?;

        if item.name.is_some() {
            let upgrade = Query::update()
                .table(table.clone())
                .value(Alias::new("name"), name)
                .and_where(Expr::col(Alias::new("external_id")).eq(item.external_id))
                .and_where(
                    Expr::col(Alias::new("name")).eq(kind.placeholder_name(item.external_id)),
                )
                .to_owned();
            conn.execute(backend.build(&upgrade)).await?;
        }
    }

    let external_ids: Vec<i64> = items.iter().map(|item| item.external_id).collect();
    let select = Query::select()
        .columns([Alias::new("id"), Alias::new("external_id")])
        .from(table)
        .and_where(Expr::col(Alias::new("external_id")).is_in(external_ids))
        .to_owned();

    let rows = conn.query_all(backend.build(&select)).await?;
    let mut ids = HashMap::with_capacity(rows.len());
    for row in rows {
        let id: Uuid = row.try_get("", "id")?;
        let external_id: i64 = row.try_get("", "external_id")?;
        ids.insert(external_id, id);
    }
    Ok(ids)
}

/// Replaces the association set of `kind` for `game_id` with exactly `links`.
///
/// Callers run this inside a transaction so the delete and inserts land together.
pub async fn replace_links<C>(
    conn: &C,
    kind: ReferenceKind,
    game_id: Uuid,
    links: &[(Uuid, CompanyRoles)],
) -> Result<(), SyncError>
where
    C: ConnectionTrait,
{
    let table = Alias::new(kind.join_table());
    let backend = conn.get_database_backend();

    let delete = Query::delete()
        .from_table(table.clone())
        .and_where(Expr::col(Alias::new("game_id")).eq(game_id))
        .to_owned();
    conn.execute(backend.build(&delete)).await?;

    if links.is_empty() {
        return Ok(());
    }

    let mut insert = Query::insert();
    insert.into_table(table);
    if kind == ReferenceKind::Company {
        insert.columns([
            Alias::new("game_id"),
            Alias::new("reference_id"),
            Alias::new("developer"),
            Alias::new("publisher"),
        ]);
        for (reference_id, roles) in links {
            insert
                .values([
                    game_id.into(),
                    (*reference_id).into(),
                    roles.developer.into(),
                    roles.publisher.into(),
                ])
                .map_err(build_err)?;
        }
    } else {
        insert.columns([Alias::new("game_id"), Alias::new("reference_id")]);
        for (reference_id, _) in links {
            insert
                .values([game_id.into(), (*reference_id).into()])
                .map_err(build_err)?;
        }
    }
    conn.execute(backend.build(&insert)).await?;
    Ok(())
}

/// External ids currently linked to `game_id` for `kind`, ascending.
pub async fn linked_external_ids<C>(
    conn: &C,
    kind: ReferenceKind,
    game_id: Uuid,
) -> Result<Vec<i64>, SyncError>
where
    C: ConnectionTrait,
{
    let join = Alias::new(kind.join_table());
    let reference = Alias::new(kind.table());
    let select = Query::select()
        .column((reference.clone(), Alias::new("external_id")))
        .from(join.clone())
        .inner_join(
            reference.clone(),
            Expr::col((reference.clone(), Alias::new("id")))
                .equals((join.clone(), Alias::new("reference_id"))),
        )
        .and_where(Expr::col((join, Alias::new("game_id"))).eq(game_id))
        .order_by((reference, Alias::new("external_id")), sea_orm::sea_query::Order::Asc)
        .to_owned();

    let rows = conn
        .query_all(conn.get_database_backend().build(&select))
        .await?;
    rows.into_iter()
        .map(|row| row.try_get::<i64>("", "external_id").map_err(SyncError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_collapse_with_roles_merged() {
        let items = vec![
            ReferenceItem::new(7, None).with_roles(CompanyRoles {
                developer: true,
                publisher: false,
            }),
            ReferenceItem::new(3, Some("Valve".into())),
            ReferenceItem::new(7, Some("Valve".into())).with_roles(CompanyRoles {
                developer: false,
                publisher: true,
            }),
        ];

        let merged = dedupe_items(&items);
        assert_eq!(merged.len(), 2);
        let seven = merged.iter().find(|i| i.external_id == 7).unwrap();
        assert_eq!(seven.name.as_deref(), Some("Valve"));
        assert!(seven.roles.developer && seven.roles.publisher);
    }
}
