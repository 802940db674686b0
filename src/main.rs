use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};

mod apod;
mod config;
mod db;
mod error;
mod models;
mod pipeline;
mod quality;

use apod::{ApodClient, RangeRequest};
use config::{Config, API_KEY_ENV};
use db::Repository;
use models::EntryFilter;
use pipeline::{BatchPolicy, Pipeline};
use quality::QualityReport;

#[derive(Debug, Parser)]
#[command(
    name = "apod-collector",
    version,
    about = "Fetch NASA Astronomy Picture of the Day entries into SQLite"
)]
struct Cli {
    /// Read configuration from this file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch a date range and upsert it into the database
    Fetch(FetchArgs),
    /// Run data quality checks and write JSON and Markdown reports
    Quality(QualityArgs),
    /// Print stored entries
    List(ListArgs),
}

#[derive(Debug, Args)]
struct FetchArgs {
    /// Number of days to fetch when a bound is missing (default from config: 30)
    #[arg(long, allow_negative_numbers = true)]
    days: Option<i64>,

    /// YYYY-MM-DD start date
    #[arg(long, value_parser = parse_date_arg)]
    start_date: Option<NaiveDate>,

    /// YYYY-MM-DD end date
    #[arg(long, value_parser = parse_date_arg)]
    end_date: Option<NaiveDate>,

    /// SQLite database file (created if missing)
    #[arg(long)]
    database: Option<String>,

    /// NASA API key; overrides NASA_API_KEY and the config file
    #[arg(long)]
    api_key: Option<String>,

    /// Retry attempts on transient failures
    #[arg(long)]
    max_retries: Option<u32>,

    /// Seconds to wait before the first retry
    #[arg(long)]
    retry_wait: Option<f64>,

    /// What to do with an entry that cannot be normalized or stored
    #[arg(long, value_enum)]
    on_error: Option<BatchPolicy>,

    /// Do not ask the API for video thumbnails
    #[arg(long)]
    no_thumbs: bool,
}

#[derive(Debug, Args)]
struct QualityArgs {
    #[arg(long)]
    database: Option<String>,

    #[arg(long, default_value = "data/data_quality_report.json")]
    report_json: PathBuf,

    #[arg(long, default_value = "data/data_quality_report.md")]
    report_md: PathBuf,
}

#[derive(Debug, Args)]
struct ListArgs {
    /// Show the full stored record for a single date
    #[arg(
        long,
        value_parser = parse_date_arg,
        conflicts_with_all = ["start_date", "end_date", "media_type"]
    )]
    date: Option<NaiveDate>,

    #[arg(long, value_parser = parse_date_arg)]
    start_date: Option<NaiveDate>,

    #[arg(long, value_parser = parse_date_arg)]
    end_date: Option<NaiveDate>,

    /// Only show this media type (image, video, ...)
    #[arg(long)]
    media_type: Option<String>,

    #[arg(long)]
    database: Option<String>,
}

fn parse_date_arg(value: &str) -> std::result::Result<NaiveDate, String> {
    apod::parse_date(value).map_err(|e| e.to_string())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config =
        Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Fetch(args) => fetch(&mut config, args).await,
        Command::Quality(args) => check_quality(&config, args).await,
        Command::List(args) => list(&config, args).await,
    }
}

async fn fetch(config: &mut Config, args: FetchArgs) -> anyhow::Result<()> {
    if let Some(db_path) = args.database {
        config.db_path = db_path;
    }
    if let Some(max_retries) = args.max_retries {
        config.retry.max_retries = max_retries;
    }
    if let Some(retry_wait) = args.retry_wait {
        config.retry.retry_wait_secs = retry_wait;
    }
    if let Some(policy) = args.on_error {
        config.on_error = policy;
    }
    if args.no_thumbs {
        config.thumbs = false;
    }
    config.validate()?;

    let api_key = config.resolve_api_key(args.api_key, std::env::var(API_KEY_ENV).ok())?;
    let client = ApodClient::new(&config.api_url, api_key, config.retry.policy()?)?
        .with_thumbs(config.thumbs);
    let repository = Repository::new(&config.db_path)
        .await
        .with_context(|| format!("Failed to open database {}", config.db_path))?;

    let request = RangeRequest {
        start: args.start_date,
        end: args.end_date,
        days: args.days.unwrap_or(config.days),
    };
    let pipeline = Pipeline::new(client, repository, config.on_error);
    let summary = pipeline.run(&request, Local::now().date_naive()).await?;
    let total = pipeline.repository().count_entries().await?;

    println!(
        "Stored {} entries into {} ({} total)",
        summary.stored, config.db_path, total
    );
    println!("{}", summary);
    for skipped in &summary.skipped {
        println!(
            "  skipped {}: {}",
            skipped.date.as_deref().unwrap_or("(no date)"),
            skipped.reason
        );
    }
    Ok(())
}

async fn check_quality(config: &Config, args: QualityArgs) -> anyhow::Result<()> {
    let db_path = args.database.unwrap_or_else(|| config.db_path.clone());
    if !Path::new(&db_path).exists() {
        bail!("Database not found at {}", db_path);
    }

    let repository = Repository::new(&db_path).await?;
    let rows = repository.quality_rows().await?;
    let report = QualityReport::from_rows(&rows, Local::now().date_naive());

    report.write_json(&args.report_json)?;
    report.write_markdown(&args.report_md)?;

    if report.is_clean() {
        tracing::info!("No data quality issues in {} rows", report.total_rows);
    } else {
        tracing::warn!("Data quality issues found in {}", db_path);
    }
    println!(
        "Wrote {} and {}",
        args.report_json.display(),
        args.report_md.display()
    );
    Ok(())
}

async fn list(config: &Config, args: ListArgs) -> anyhow::Result<()> {
    let db_path = args.database.unwrap_or_else(|| config.db_path.clone());
    let repository = Repository::new(&db_path).await?;

    if let Some(date) = args.date {
        let Some(entry) = repository.get_entry(date).await? else {
            bail!("No entry stored for {}", date);
        };
        println!("{}  {}", entry.date, entry.title);
        for (label, value) in [
            ("media_type", &entry.media_type),
            ("url", &entry.url),
            ("hdurl", &entry.hdurl),
            ("thumbnail_url", &entry.thumbnail_url),
            ("copyright", &entry.copyright),
        ] {
            if let Some(value) = value {
                println!("  {}: {}", label, value);
            }
        }
        println!("  fetched_at: {}", entry.fetched_at);
        if let Some(explanation) = &entry.explanation {
            println!("\n{}", explanation);
        }
        return Ok(());
    }

    let filter = EntryFilter {
        start: args.start_date,
        end: args.end_date,
        media_type: args.media_type,
    };

    for entry in repository.list_entries(&filter).await? {
        println!(
            "{}  {:<6}  {}",
            entry.date,
            entry.media_type.as_deref().unwrap_or("-"),
            entry.title
        );
    }
    Ok(())
}
