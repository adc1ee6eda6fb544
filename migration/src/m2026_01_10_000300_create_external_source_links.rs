//! Migration to create the external_source_links table.
//!
//! Tracks per-(game, source) synchronization state and the backoff schedule for
//! failed fetches.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ExternalSourceLinks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ExternalSourceLinks::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ExternalSourceLinks::GameId).uuid().not_null())
                    .col(ColumnDef::new(ExternalSourceLinks::Source).text().not_null())
                    .col(ColumnDef::new(ExternalSourceLinks::ExternalUid).text().null())
                    .col(ColumnDef::new(ExternalSourceLinks::ExternalUrl).text().null())
                    .col(
                        ColumnDef::new(ExternalSourceLinks::SyncStatus)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(ExternalSourceLinks::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ExternalSourceLinks::LastAttemptedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ExternalSourceLinks::LastSyncedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ExternalSourceLinks::NextRetryAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(ExternalSourceLinks::LastError).text().null())
                    .col(ColumnDef::new(ExternalSourceLinks::Payload).json_binary().null())
                    .col(
                        ColumnDef::new(ExternalSourceLinks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ExternalSourceLinks::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_external_source_links_game_id")
                            .from(ExternalSourceLinks::Table, ExternalSourceLinks::GameId)
                            .to(Games::Table, Games::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_external_source_links_game_source")
                    .table(ExternalSourceLinks::Table)
                    .col(ExternalSourceLinks::GameId)
                    .col(ExternalSourceLinks::Source)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Retry selection scans by source and due time
        manager
            .create_index(
                Index::create()
                    .name("idx_external_source_links_source_status_retry")
                    .table(ExternalSourceLinks::Table)
                    .col(ExternalSourceLinks::Source)
                    .col(ExternalSourceLinks::SyncStatus)
                    .col(ExternalSourceLinks::NextRetryAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_external_source_links_source_status_retry")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("uq_external_source_links_game_source")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(ExternalSourceLinks::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ExternalSourceLinks {
    Table,
    Id,
    GameId,
    Source,
    ExternalUid,
    ExternalUrl,
    SyncStatus,
    RetryCount,
    LastAttemptedAt,
    LastSyncedAt,
    NextRetryAt,
    LastError,
    Payload,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Games {
    Table,
    Id,
}
