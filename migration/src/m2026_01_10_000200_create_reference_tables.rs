//! Migration to create reference lookup tables and their game join tables.
//!
//! Every reference kind gets a small table keyed by a unique external id plus a
//! join table whose primary key is `(game_id, reference_id)`. Company links also
//! carry developer/publisher role flags.

use sea_orm_migration::prelude::*;

/// `(reference table, join table)` pairs in creation order.
const REFERENCE_TABLES: &[(&str, &str)] = &[
    ("platforms", "game_platforms"),
    ("genres", "game_genres"),
    ("game_modes", "game_game_modes"),
    ("companies", "game_companies"),
    ("game_engines", "game_game_engines"),
    ("player_perspectives", "game_player_perspectives"),
];

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for (table, join_table) in REFERENCE_TABLES {
            manager
                .create_table(
                    Table::create()
                        .table(Alias::new(*table))
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Reference::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(Reference::ExternalId)
                                .big_integer()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Reference::Name).text().not_null())
                        .col(
                            ColumnDef::new(Reference::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null()
                                .default(Expr::current_timestamp()),
                        )
                        .to_owned(),
                )
                .await?;

            let mut join = Table::create();
            join.table(Alias::new(*join_table))
                .if_not_exists()
                .col(ColumnDef::new(GameReference::GameId).uuid().not_null())
                .col(ColumnDef::new(GameReference::ReferenceId).uuid().not_null());

            if *join_table == "game_companies" {
                join.col(
                    ColumnDef::new(GameReference::Developer)
                        .boolean()
                        .not_null()
                        .default(false),
                )
                .col(
                    ColumnDef::new(GameReference::Publisher)
                        .boolean()
                        .not_null()
                        .default(false),
                );
            }

            join.primary_key(
                Index::create()
                    .col(GameReference::GameId)
                    .col(GameReference::ReferenceId),
            )
            .foreign_key(
                ForeignKey::create()
                    .name(format!("fk_{join_table}_game_id"))
                    .from(Alias::new(*join_table), GameReference::GameId)
                    .to(Games::Table, Games::Id)
                    .on_delete(ForeignKeyAction::Cascade),
            )
            .foreign_key(
                ForeignKey::create()
                    .name(format!("fk_{join_table}_reference_id"))
                    .from(Alias::new(*join_table), GameReference::ReferenceId)
                    .to(Alias::new(*table), Reference::Id)
                    .on_delete(ForeignKeyAction::Cascade),
            );

            manager.create_table(join.to_owned()).await?;

            manager
                .create_index(
                    Index::create()
                        .name(format!("idx_{join_table}_reference_id"))
                        .table(Alias::new(*join_table))
                        .col(GameReference::ReferenceId)
                        .to_owned(),
                )
                .await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for (table, join_table) in REFERENCE_TABLES.iter().rev() {
            manager
                .drop_table(Table::drop().table(Alias::new(*join_table)).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Alias::new(*table)).to_owned())
                .await?;
        }
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Reference {
    Id,
    ExternalId,
    Name,
    CreatedAt,
}

#[derive(DeriveIden)]
enum GameReference {
    GameId,
    ReferenceId,
    Developer,
    Publisher,
}

#[derive(DeriveIden)]
enum Games {
    Table,
    Id,
}
