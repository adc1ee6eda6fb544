//! Command-line surface of `gamesync`.
//!
//! Every command exits successfully once its batch completes, whatever the
//! per-item outcomes were. Only setup problems (arguments, configuration,
//! database) produce an error.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{AppConfig, MAX_DAY_WINDOW};
use crate::context::AppContext;
use crate::db;
use crate::error::SyncError;
use crate::models::game;
use crate::scheduler::{BatchKind, BatchReport};

#[derive(Parser, Debug)]
#[command(name = "gamesync")]
#[command(about = "Keep the game catalog in sync with its upstream sources", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Bypass the staleness filter.
#[derive(Args, Debug, Clone, Copy)]
pub struct ForceArg {
    #[arg(long)]
    pub force: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Look up games by primary id and store them
    Enrich {
        #[arg(required = true, value_name = "IGDB_ID")]
        ids: Vec<i64>,
    },

    /// Import a list of primary ids
    Import {
        /// File with ids separated by newlines or commas; `#` starts a comment
        #[arg(long, conflicts_with = "ids", required_unless_present = "ids")]
        file: Option<PathBuf>,

        /// Comma-separated ids
        #[arg(long, value_delimiter = ',')]
        ids: Option<Vec<i64>>,
    },

    /// Refresh games not synced for a while
    RefreshStale {
        #[arg(long, value_parser = clap::value_parser!(i64).range(0..=MAX_DAY_WINDOW))]
        min_days: Option<i64>,

        #[arg(long)]
        batch_size: Option<u64>,

        #[command(flatten)]
        force: ForceArg,
    },

    /// Refresh the most viewed games
    RefreshPopular {
        #[arg(long)]
        limit: Option<u64>,

        #[arg(long)]
        min_views: Option<i64>,

        #[command(flatten)]
        force: ForceArg,
    },

    /// Refresh games released recently or about to be
    RefreshRecent {
        /// Window on either side of today
        #[arg(long, value_parser = clap::value_parser!(i64).range(0..=MAX_DAY_WINDOW))]
        days: Option<i64>,

        #[arg(long)]
        limit: Option<u64>,

        #[command(flatten)]
        force: ForceArg,
    },

    /// Queue a stats refresh chain for due links
    #[command(alias = "sync-quaternary")]
    SyncStats {
        /// Games at or above this priority use the short staleness window
        #[arg(long)]
        threshold: Option<i32>,

        #[arg(long)]
        limit: Option<u64>,

        /// Drain the queue in-process after dispatching
        #[arg(long)]
        run: bool,
    },

    /// Run the job queue worker
    Work {
        /// Exit once no queued job remains
        #[arg(long)]
        until_idle: bool,
    },

    /// Apply database migrations
    Migrate,
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Enrich { .. } => "enrich",
            Commands::Import { .. } => "import",
            Commands::RefreshStale { .. } => "refresh-stale",
            Commands::RefreshPopular { .. } => "refresh-popular",
            Commands::RefreshRecent { .. } => "refresh-recent",
            Commands::SyncStats { .. } => "sync-stats",
            Commands::Work { .. } => "work",
            Commands::Migrate => "migrate",
        }
    }
}

/// Parses ids separated by whitespace or commas, dropping duplicates and
/// `#` comments. Order of first appearance is kept.
pub fn parse_id_list(input: &str) -> Result<Vec<i64>, SyncError> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();

    for line in input.lines() {
        let content = line.split('#').next().unwrap_or_default();
        for token in content.split(|c: char| c == ',' || c.is_whitespace()) {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let id = validate_id(
                token
                    .parse::<i64>()
                    .map_err(|_| SyncError::validation(format!("'{token}' is not a valid id")))?,
            )?;
            if seen.insert(id) {
                ids.push(id);
            }
        }
    }

    Ok(ids)
}

fn validate_id(id: i64) -> Result<i64, SyncError> {
    if id <= 0 {
        return Err(SyncError::validation(format!("id must be positive, got {id}")));
    }
    Ok(id)
}

fn validate_ids(ids: &[i64]) -> Result<Vec<i64>, SyncError> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(ids.len());
    for &id in ids {
        if seen.insert(validate_id(id)?) {
            unique.push(id);
        }
    }
    Ok(unique)
}

fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received; finishing current job");
            child.cancel();
        }
    });
    token
}

fn print_report(report: &BatchReport) {
    println!("{report}");
}

async fn refresh(
    ctx: &AppContext,
    kind: BatchKind,
    candidates: Vec<game::Model>,
) -> Result<()> {
    if candidates.is_empty() {
        println!("{}: no candidates", kind.as_str());
        return Ok(());
    }
    let enricher = ctx.enricher()?;
    let report = ctx.scheduler().run_batch(kind, &candidates, &enricher).await;
    print_report(&report);
    Ok(())
}

pub async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    if let Commands::Migrate = cli.command {
        let pool = db::init_pool(&config).await?;
        db::migrate(&pool).await?;
        println!("migrations applied");
        return Ok(());
    }

    let ctx = AppContext::connect(config).await?;
    let scheduler_config = ctx.config.scheduler.clone();

    match cli.command {
        Commands::Enrich { ids } => {
            let ids = validate_ids(&ids)?;
            let enricher = ctx.enricher()?;
            for id in ids {
                match enricher.enrich_one(id).await {
                    Ok(outcome) => println!(
                        "{id}\t{}\t{}\t{}",
                        outcome.status.as_str(),
                        outcome.game_id,
                        outcome.name
                    ),
                    Err(err) => println!("{id}\t{}\t{err}", err.kind_label()),
                }
            }
        }
        Commands::Import { file, ids } => {
            let ids = match (file, ids) {
                (Some(path), _) => {
                    let contents = tokio::fs::read_to_string(&path)
                        .await
                        .with_context(|| format!("reading id list {}", path.display()))?;
                    parse_id_list(&contents)?
                }
                (None, Some(ids)) => validate_ids(&ids)?,
                (None, None) => Vec::new(),
            };
            if ids.is_empty() {
                println!("import: no ids given");
                return Ok(());
            }
            let enricher = ctx.enricher()?;
            let report = ctx.scheduler().run_ids(BatchKind::Import, &ids, &enricher).await;
            print_report(&report);
        }
        Commands::RefreshStale {
            min_days,
            batch_size,
            force,
        } => {
            let candidates = ctx
                .scheduler()
                .select_stale(
                    min_days.unwrap_or(scheduler_config.stale_min_days),
                    batch_size.unwrap_or(scheduler_config.stale_batch_size),
                    force.force,
                )
                .await?;
            refresh(&ctx, BatchKind::Stale, candidates).await?;
        }
        Commands::RefreshPopular {
            limit,
            min_views,
            force,
        } => {
            let candidates = ctx
                .scheduler()
                .select_popular(
                    limit.unwrap_or(scheduler_config.popular_limit),
                    min_views.unwrap_or(scheduler_config.popular_min_views),
                    force.force,
                )
                .await?;
            refresh(&ctx, BatchKind::Popular, candidates).await?;
        }
        Commands::RefreshRecent { days, limit, force } => {
            let candidates = ctx
                .scheduler()
                .select_recent(
                    days.unwrap_or(scheduler_config.recent_days),
                    limit.unwrap_or(scheduler_config.recent_limit),
                    force.force,
                )
                .await?;
            refresh(&ctx, BatchKind::Recent, candidates).await?;
        }
        Commands::SyncStats {
            threshold,
            limit,
            run,
        } => {
            let report = ctx.stats_coordinator().dispatch(threshold, limit).await?;
            if report.selected == 0 {
                println!("sync-stats: no links due");
                return Ok(());
            }
            match report.job_id {
                Some(job_id) => println!("sync-stats: {} links queued as job {job_id}", report.selected),
                None => {
                    warn!("A chain for the same link is already pending");
                    println!("sync-stats: chain already pending");
                }
            }
            if run {
                let stats = ctx.executor().run_until_idle(shutdown_on_ctrl_c()).await?;
                println!(
                    "sync-stats: {} jobs run, {} succeeded, {} retried, {} failed",
                    stats.claimed, stats.succeeded, stats.retried, stats.failed
                );
            }
        }
        Commands::Work { until_idle } => {
            let executor = ctx.executor();
            let shutdown = shutdown_on_ctrl_c();
            if until_idle {
                let stats = executor.run_until_idle(shutdown).await?;
                println!(
                    "work: {} jobs run, {} succeeded, {} retried, {} failed",
                    stats.claimed, stats.succeeded, stats.retried, stats.failed
                );
            } else {
                executor.run(shutdown).await;
            }
        }
        Commands::Migrate => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn id_list_accepts_mixed_separators_and_comments() {
        let ids = parse_id_list("1942, 1020\n# backlog\n  740 1942 # dup\n\n").unwrap();
        assert_eq!(ids, vec![1942, 1020, 740]);
    }

    #[test]
    fn id_list_rejects_garbage_and_non_positive() {
        assert!(parse_id_list("12, abc").is_err());
        assert!(parse_id_list("0").is_err());
        assert!(parse_id_list("-5").is_err());
    }

    #[test]
    fn legacy_stats_alias_parses() {
        let cli = Cli::try_parse_from(["gamesync", "sync-quaternary", "--threshold", "40"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::SyncStats {
                threshold: Some(40),
                ..
            }
        ));
    }

    #[test]
    fn import_requires_a_source() {
        assert!(Cli::try_parse_from(["gamesync", "import"]).is_err());
        assert!(Cli::try_parse_from(["gamesync", "import", "--ids", "1,2,3"]).is_ok());
    }
}
