//! # Repository Layer
//!
//! Repositories encapsulate SeaORM access for the catalog tables. Free
//! functions taking a generic connection are used where callers need to
//! compose writes inside their own transaction.

pub mod game;
pub mod reference;
pub mod source_link;
pub mod sync_job;

pub use game::GameRepository;
pub use source_link::SourceLinkRepository;
pub use sync_job::SyncJobRepository;
