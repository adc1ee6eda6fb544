//! # gamesync
//!
//! Keeps a local game catalog in sync with a primary metadata source, a
//! storefront, an artwork source and an engagement stats source.

pub mod cli;
pub mod config;
pub mod context;
pub mod db;
pub mod enrichment;
pub mod error;
pub mod models;
pub mod priority;
pub mod repositories;
pub mod scheduler;
pub mod sources;
pub mod stats_sync;
pub mod sync_executor;
pub mod sync_state;
pub mod telemetry;
pub use migration;
