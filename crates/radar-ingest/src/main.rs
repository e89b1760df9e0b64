//! SSH Radar Ingest - Main entry point

use anyhow::Result;
use clap::Parser;
use radar_common::logging::{init_logging, LogConfig, LogLevel};
use radar_ingest::acquire::{self, InputSource};
use radar_ingest::{AttemptStore, Config, LastbParser};
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "radar-ingest")]
#[command(author, version, about = "Ingest failed login attempts from lastb")]
struct Cli {
    /// Read lastb data from a file instead of running lastb
    #[arg(short, long, conflicts_with = "stdin")]
    file: Option<PathBuf>,

    /// Read lastb data from stdin
    #[arg(long)]
    stdin: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbose flag
    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("radar-ingest".to_string())
        .build();

    // Environment variables take precedence where set; otherwise the
    // flag-derived values stand.
    let log_config = log_config.with_env_overrides()?;

    init_logging(&log_config)?;

    let config = Config::load()?;

    let source = if let Some(path) = cli.file {
        InputSource::File(path)
    } else if cli.stdin {
        InputSource::Stdin
    } else {
        InputSource::Command
    };

    // Step 1: acquire the raw text. Failures here happen before anything
    // has been parsed or written.
    let raw_text = acquire::read_input(&source, &config.ingest).await?;
    if raw_text.trim().is_empty() {
        info!("No login-failure data to process");
        return Ok(());
    }

    // Step 2: parse.
    let parser = LastbParser::new()?;
    let records = parser.parse_text(&raw_text);
    info!(parsed = records.len(), "Parsed records from login-failure log");
    if records.is_empty() {
        return Ok(());
    }

    // Step 3: insert into the database.
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout_secs))
        .connect(&config.database.url)
        .await?;

    sqlx::migrate!("../../migrations").run(&pool).await?;

    let store = AttemptStore::new(pool);
    let inserted = store.insert_attempts(&records).await?;

    // Step 4: refresh the reporting views. Not fatal if they are missing.
    if let Err(error) = store.refresh_views().await {
        warn!(error = %error, "Could not refresh materialized views");
    }

    // Geolocation enrichment runs out-of-process: the GeoLite2 reader is a
    // deployment concern, wired up through geolocate::GeoProvider.
    info!(inserted, "Ingestion complete");
    Ok(())
}
