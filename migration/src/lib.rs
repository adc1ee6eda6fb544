//! Database migrations for the game catalog.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2026_01_10_000100_create_games;
mod m2026_01_10_000200_create_reference_tables;
mod m2026_01_10_000300_create_external_source_links;
mod m2026_01_10_000400_create_sync_jobs;
mod m2026_01_10_000500_add_sync_job_dedupe_guard;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_01_10_000100_create_games::Migration),
            Box::new(m2026_01_10_000200_create_reference_tables::Migration),
            Box::new(m2026_01_10_000300_create_external_source_links::Migration),
            Box::new(m2026_01_10_000400_create_sync_jobs::Migration),
            Box::new(m2026_01_10_000500_add_sync_job_dedupe_guard::Migration),
        ]
    }
}
