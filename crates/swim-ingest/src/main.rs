//! Swim Ingest - batch stages for the results pipeline

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::PgPool;
use swim_common::logging::{init_logging, LogConfig, LogLevel};
use swim_common::time::format_hundredths;
use swim_ingest::discovery::run_discover;
use swim_ingest::fetcher::Fetcher;
use swim_ingest::http::SourceClient;
use swim_ingest::mount::FileMount;
use swim_ingest::scraper::Scraper;
use swim_ingest::stages::{
    ArchiveStage, EntryOutcome, FetchStage, ImportStage, ScrapeStage, StageReport, StageRunner,
};
use swim_ingest::{archive, db, registry, Config, FileStatus, IngestError};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "swim-ingest")]
#[command(author, version, about = "Swim meet results ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Exit 0 even when some entries ended in a failure status
    #[arg(long, global = true)]
    allow_partial: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Override DATABASE_URL
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Override LENEX_DIR
    #[arg(long, global = true)]
    lenex_dir: Option<PathBuf>,

    /// Override BATCH_LIMIT
    #[arg(long, global = true)]
    batch_limit: Option<i64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply database migrations
    Migrate,

    /// Register finished meets from the results site index
    Discover,

    /// Download results files for pending entries
    Fetch,

    /// Copy downloaded files to the off-site archive
    Backup,

    /// Import archived results files into the schema
    Import,

    /// Scrape meets that have no results file
    Scrape {
        /// Only this event
        #[arg(long)]
        event_id: Option<i64>,

        /// Parse and summarize without touching the database
        #[arg(long, requires = "event_id")]
        dry_run: bool,
    },

    /// Move a failed or scraped entry back so the chain picks it up again
    Reset {
        /// Online event id of the entry
        event_id: i64,
    },

    /// Show entry counts per status
    Status {
        /// Also list the entries in this status
        #[arg(long)]
        list: Option<FileStatus>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run discover, fetch, backup, import and scrape in order
    Run,
}

/// How a command finished when it did not fail outright
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    /// Finished, but some entry ended in a failure status or was left for
    /// a retry
    Partial,
}

impl From<&StageReport> for Outcome {
    fn from(report: &StageReport) -> Self {
        if report.has_failures() {
            Outcome::Partial
        } else {
            Outcome::Success
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("swim-ingest")
        .build();

    // Environment variables take precedence
    let log_config = match log_config.with_env_overrides() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(1);
        },
    };
    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: failed to initialize logging: {:#}", e);
            return ExitCode::from(1);
        },
    };

    match execute(&cli).await {
        Ok(Outcome::Success) => ExitCode::SUCCESS,
        Ok(Outcome::Partial) if cli.allow_partial => {
            info!("Some entries failed, exiting 0 (--allow-partial)");
            ExitCode::SUCCESS
        },
        Ok(Outcome::Partial) => {
            warn!("Some entries failed");
            ExitCode::from(2)
        },
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        },
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load()?;
    if let Some(ref url) = cli.database_url {
        config.database.url = url.clone();
    }
    if let Some(ref dir) = cli.lenex_dir {
        config.storage.lenex_dir = dir.clone();
    }
    if cli.batch_limit.is_some() {
        config.stage.batch_limit = cli.batch_limit;
    }
    config.validate()?;
    Ok(config)
}

async fn connect(config: &Config) -> Result<PgPool> {
    let pool = db::create_pool(&config.database)
        .await
        .context("Failed to connect to database")?;
    db::health_check(&pool).await.context("Database health check failed")?;
    Ok(pool)
}

async fn execute(cli: &Cli) -> Result<Outcome> {
    let config = load_config(cli)?;

    if let Command::Scrape {
        event_id: Some(event_id),
        dry_run: true,
    } = cli.command
    {
        return scrape_dry_run(&config, event_id).await;
    }

    let pool = connect(&config).await?;
    let runner = StageRunner::new(pool.clone(), config.stage.clone());

    match cli.command {
        Command::Migrate => {
            db::run_migrations(&pool).await?;
            Ok(Outcome::Success)
        },
        Command::Discover => {
            let client = SourceClient::new(&config.source)?;
            run_discover(&pool, &client).await?;
            Ok(Outcome::Success)
        },
        Command::Fetch => run_fetch(&runner, &config).await,
        Command::Backup => run_backup(&runner, &config).await,
        Command::Import => run_import(&runner, &config).await,
        Command::Scrape { event_id: None, .. } => run_scrape(&runner, &config).await,
        Command::Scrape {
            event_id: Some(event_id),
            ..
        } => {
            let stage = ScrapeStage::new(Scraper::new(SourceClient::new(&config.source)?));
            let outcome = runner
                .process_entry(&stage, event_id)
                .await
                .with_context(|| format!("Failed to scrape event {}", event_id))?;
            Ok(match outcome {
                EntryOutcome::Advanced(_) => Outcome::Success,
                EntryOutcome::Failed(_) | EntryOutcome::Deferred => Outcome::Partial,
            })
        },
        Command::Reset { event_id } => {
            let mut conn = pool.acquire().await?;
            let (from, to) = registry::reset(&mut conn, event_id).await?;
            info!(event_id, %from, %to, "Entry reset");
            println!("{}: {} -> {}", event_id, from, to);
            Ok(Outcome::Success)
        },
        Command::Status { list, json } => {
            show_status(&pool, list, json).await?;
            Ok(Outcome::Success)
        },
        Command::Run => run_all(&pool, &runner, &config).await,
    }
}

async fn run_fetch(runner: &StageRunner, config: &Config) -> Result<Outcome> {
    let client = SourceClient::new(&config.source)?;
    let fetcher = Fetcher::new(client, FileMount::new(&config.storage.lenex_dir));
    let report = runner.run(&FetchStage::new(fetcher)).await?;
    Ok(Outcome::from(&report))
}

async fn run_backup(runner: &StageRunner, config: &Config) -> Result<Outcome> {
    let store = archive::from_config(&config.archive).await?;
    let stage = ArchiveStage::new(
        store,
        FileMount::new(&config.storage.lenex_dir),
        config.archive.prefix.clone(),
    );
    let report = runner.run(&stage).await?;
    Ok(Outcome::from(&report))
}

async fn run_import(runner: &StageRunner, config: &Config) -> Result<Outcome> {
    let stage = ImportStage::new(FileMount::new(&config.storage.lenex_dir));
    let report = runner.run(&stage).await?;
    Ok(Outcome::from(&report))
}

async fn run_scrape(runner: &StageRunner, config: &Config) -> Result<Outcome> {
    let stage = ScrapeStage::new(Scraper::new(SourceClient::new(&config.source)?));
    let report = runner.run(&stage).await?;
    Ok(Outcome::from(&report))
}

/// Every stage in chain order, stopping after the first one that did not
/// finish cleanly.
async fn run_all(pool: &PgPool, runner: &StageRunner, config: &Config) -> Result<Outcome> {
    let client = SourceClient::new(&config.source)?;
    run_discover(pool, &client).await?;

    if run_fetch(runner, config).await? == Outcome::Partial {
        return Ok(stopped_after("fetch"));
    }
    if run_backup(runner, config).await? == Outcome::Partial {
        return Ok(stopped_after("backup"));
    }
    if run_import(runner, config).await? == Outcome::Partial {
        return Ok(stopped_after("import"));
    }
    if run_scrape(runner, config).await? == Outcome::Partial {
        return Ok(stopped_after("scrape"));
    }

    info!("All stages complete");
    Ok(Outcome::Success)
}

fn stopped_after(stage: &str) -> Outcome {
    warn!(stage, "Stage finished with failures, stopping");
    Outcome::Partial
}

async fn show_status(pool: &PgPool, list: Option<FileStatus>, json: bool) -> Result<()> {
    let mut conn = pool.acquire().await?;

    let counts = registry::status_counts(&mut conn).await?;
    let total: i64 = counts.iter().map(|(_, n)| n).sum();
    let entries = match list {
        Some(status) => registry::list_by_status(&mut conn, status, None).await?,
        None => Vec::new(),
    };

    if json {
        let counts: serde_json::Map<String, serde_json::Value> = counts
            .iter()
            .map(|(status, n)| (status.as_str().to_string(), (*n).into()))
            .collect();
        let report = serde_json::json!({
            "counts": counts,
            "total": total,
            "entries": entries,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for (status, count) in &counts {
        println!("{:<18} {:>6}", status.as_str(), count);
    }
    println!("{:<18} {:>6}", "total", total);

    if !entries.is_empty() {
        println!();
    }
    for entry in entries {
        let dates = match (entry.date_from, entry.date_to) {
            (Some(from), Some(to)) => format!("{} - {}", from, to),
            _ => "-".to_string(),
        };
        let error = entry
            .last_error
            .map(|e| format!("  [{}]", e))
            .unwrap_or_default();
        println!(
            "{:>8}  {:<23}  {}{}",
            entry.event_id,
            dates,
            entry.event_name.as_deref().unwrap_or("-"),
            error
        );
    }

    Ok(())
}

async fn scrape_dry_run(config: &Config, event_id: i64) -> Result<Outcome> {
    let scraper = Scraper::new(SourceClient::new(&config.source)?);
    let results = match scraper.scrape_meet(event_id).await {
        Ok(results) => results,
        Err(e @ IngestError::Network(_)) => {
            warn!(event_id, error = %e, "Scrape failed");
            return Ok(Outcome::Partial);
        },
        Err(e) => return Err(e.into()),
    };
    results.validate()?;

    let meet = &results.meet;
    println!("{} ({})", meet.name, meet.course);
    match (meet.start_date, meet.end_date) {
        (Some(from), Some(to)) => println!("  dates     {} - {}", from, to),
        _ => println!("  dates     -"),
    }
    println!("  sessions  {}", results.sessions.len());
    println!("  events    {}", results.events.len());
    println!("  clubs     {}", results.clubs.len());
    println!("  athletes  {}", results.athletes.len());
    println!("  results   {}", results.results.len());
    println!("  splits    {}", results.split_count());

    if let Some(fastest) = results.results.iter().filter_map(|r| r.time).min() {
        println!("  fastest   {}", format_hundredths(fastest));
    }

    Ok(Outcome::Success)
}
