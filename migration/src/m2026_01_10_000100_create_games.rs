//! Migration to create the games table.
//!
//! One row per primary-source game id. Metadata blobs are stored as JSON and the
//! staleness columns drive batch refresh selection.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Statement;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Games::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Games::Id).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(Games::IgdbId)
                            .big_integer()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Games::Name).text().not_null())
                    .col(ColumnDef::new(Games::Slug).text().null())
                    .col(
                        ColumnDef::new(Games::ReleaseDate)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Games::Summary).text().null())
                    .col(ColumnDef::new(Games::Storyline).text().null())
                    .col(ColumnDef::new(Games::Rating).double().null())
                    .col(ColumnDef::new(Games::CoverImage).text().null())
                    .col(ColumnDef::new(Games::HeroImage).text().null())
                    .col(ColumnDef::new(Games::LogoImage).text().null())
                    .col(ColumnDef::new(Games::SteamAppId).big_integer().null())
                    .col(ColumnDef::new(Games::Screenshots).json_binary().null())
                    .col(ColumnDef::new(Games::Videos).json_binary().null())
                    .col(ColumnDef::new(Games::SimilarGames).json_binary().null())
                    .col(ColumnDef::new(Games::StorefrontPayload).json_binary().null())
                    .col(ColumnDef::new(Games::SourcePayload).json_binary().null())
                    .col(
                        ColumnDef::new(Games::ViewCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Games::PriorityBoost)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Games::UpdatePriority)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Games::LastSyncedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Games::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Games::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Candidate selection always sorts by priority first
        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "CREATE INDEX IF NOT EXISTS idx_games_priority_last_synced ON games (update_priority DESC, last_synced_at)".to_string(),
            ))
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_games_release_date")
                    .table(Games::Table)
                    .col(Games::ReleaseDate)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_games_view_count")
                    .table(Games::Table)
                    .col(Games::ViewCount)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for name in [
            "idx_games_priority_last_synced",
            "idx_games_release_date",
            "idx_games_view_count",
        ] {
            manager
                .drop_index(Index::drop().name(name).to_owned())
                .await?;
        }

        manager
            .drop_table(Table::drop().table(Games::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Games {
    Table,
    Id,
    IgdbId,
    Name,
    Slug,
    ReleaseDate,
    Summary,
    Storyline,
    Rating,
    CoverImage,
    HeroImage,
    LogoImage,
    SteamAppId,
    Screenshots,
    Videos,
    SimilarGames,
    StorefrontPayload,
    SourcePayload,
    ViewCount,
    PriorityBoost,
    UpdatePriority,
    LastSyncedAt,
    CreatedAt,
    UpdatedAt,
}
