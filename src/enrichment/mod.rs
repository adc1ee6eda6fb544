//! # Enrichment
//!
//! Turns primary ids into persisted games: primary fetch, storefront id
//! discovery and batched storefront fetch, gap-filling merge, artwork
//! backfill, idempotent upsert and reference reconciliation.

pub mod enricher;
pub mod images;
pub mod payload;
pub mod relations;
pub mod storefront_id;

pub use enricher::{EnrichOutcome, EnrichResult, SourceEnricher};
pub use images::ImageResolver;
pub use payload::{GameRelations, PartialGame, parse_storefront_date};
pub use relations::RelationReconciler;
