use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use epg_ingest::{
    config::Config,
    models::DayKey,
    pipeline::{Pipeline, RunReport},
    storage::{LocalObjectStore, SqlDocumentStore},
    utils::HttpFeedSource,
};

#[derive(Parser)]
#[command(name = "epg-ingest")]
#[command(version)]
#[command(about = "Ingest a daily EPG feed into a paginated document store")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: String,

    /// Database URL (overrides config file)
    #[arg(short = 'd', long, global = true, value_name = "URL")]
    database_url: Option<String>,

    /// Log level
    #[arg(short = 'v', long, global = true, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Load one day from the cache or the feed and persist it
    Refresh {
        /// Day as YYYYMMDD; anything else means today
        #[arg(long)]
        day: Option<String>,
    },
    /// Purge every collection and reload from the canonical feed
    Rebuild,
    /// Print the stored schedule for a day, refreshing it when missing
    Query {
        #[arg(long)]
        day: Option<String>,
    },
    /// Print a signed URL for a day's cached feed
    FeedUrl {
        #[arg(long)]
        day: Option<String>,

        /// Lifetime of the URL in minutes (defaults to the configured TTL)
        #[arg(long)]
        ttl_minutes: Option<u64>,
    },
}

fn init_tracing(level: &str, format: LogFormat) {
    let log_filter = format!("epg_ingest={level}");
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| log_filter.into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_run(report: &RunReport) -> Result<()> {
    print_json(report)?;
    if report.failed_commits() > 0 {
        error!(
            "Run {} finished with {} failed commits",
            report.run_id,
            report.failed_commits()
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_format);

    info!("Starting EPG ingest v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load_from_file(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config))?;
    info!("Configuration loaded from: {}", cli.config);

    if let Some(database_url) = cli.database_url {
        config.database.url = database_url;
    }

    let objects = LocalObjectStore::new(
        &config.storage.base_directory,
        config.storage.signing_secret.clone(),
        config.storage.public_base_url.clone(),
    )
    .await
    .context("Failed to open object store")?;
    info!(
        "Object store ready at {}",
        config.storage.base_directory.display()
    );

    let documents = SqlDocumentStore::connect(&config.database)
        .await
        .context("Failed to open document store")?;
    info!("Document store connected");

    let source = HttpFeedSource::new(config.feed.timeout)?;
    let default_ttl = config.storage.signed_url_ttl_minutes;
    let pipeline = Pipeline::new(
        config,
        Arc::new(objects),
        Arc::new(documents),
        Arc::new(source),
    );

    match cli.command {
        Commands::Refresh { day } => {
            let report = pipeline.refresh_day(DayKey::resolve(day.as_deref())).await?;
            print_run(&report)?;
        }
        Commands::Rebuild => {
            let report = pipeline.rebuild().await?;
            print_run(&report)?;
        }
        Commands::Query { day } => {
            let schedule = pipeline
                .programs_for_day(DayKey::resolve(day.as_deref()))
                .await?;
            info!(
                "{} programs across {} channels for {}",
                schedule.program_count(),
                schedule.channels.len(),
                schedule.day
            );
            print_json(&schedule)?;
        }
        Commands::FeedUrl { day, ttl_minutes } => {
            let url = pipeline
                .acquirer()
                .signed_feed_url(
                    DayKey::resolve(day.as_deref()),
                    ttl_minutes.unwrap_or(default_ttl),
                )
                .await?;
            println!("{url}");
        }
    }

    Ok(())
}
