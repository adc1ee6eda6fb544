//! # Data Models
//!
//! SeaORM entities for the catalog tables plus the reference-kind descriptor
//! used for the six lookup tables.

pub mod external_source_link;
pub mod game;
pub mod reference;
pub mod sync_job;

pub use external_source_link::Entity as ExternalSourceLink;
pub use game::Entity as Game;
pub use sync_job::Entity as SyncJob;
