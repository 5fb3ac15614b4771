//! Mediadex - channel media catalog
//!
//! Walks messaging-channel history, parses media filenames into titles,
//! merges per-title aggregates and keeps one rendered index post per
//! title up to date.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use mediadex::cli::{CliOptions, Command};
use mediadex::config::Config;
use mediadex::db::Database;
use mediadex::services::{parse_channel_list, ScanService, TelegramGateway};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mediadex=debug".into()),
        )
        .init();

    let options = match CliOptions::from_args() {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{message}");
            std::process::exit(2);
        }
    };

    info!("Starting mediadex");
    let db = Database::connect(&config.database_url)
        .await
        .context("Failed to open database")?;
    report_interrupted_scans(&db).await?;

    let gateway = Arc::new(TelegramGateway::new(
        config.gateway_url.clone(),
        config.gateway_token.clone(),
    ));
    let scanner = ScanService::new(db, gateway.clone(), gateway, &config)?;

    match options.command {
        Command::Scan { channel_id, force } => {
            let summary = scanner.scan_channel(channel_id, force).await?;
            println!("{}", summary.report());
        }
        Command::ScanFile { path, force } => {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read channel list {path}"))?;
            let channels = parse_channel_list(&contents);
            if channels.is_empty() {
                anyhow::bail!("No valid channel IDs in {path}");
            }
            info!(channels = channels.len(), "Starting bulk scan");
            for summary in scanner.scan_channels(&channels, force).await {
                println!("{}", summary.report());
            }
        }
        Command::Mine { channel_id } => {
            let summary = scanner.mine_channel(channel_id).await?;
            println!(
                "Mined {} files from channel {}: {} candidate tags",
                summary.processed_files, summary.channel_id, summary.candidates
            );
        }
    }

    Ok(())
}

/// Report scans left open by a previous run, then clear the table so the
/// report fires once per incident.
async fn report_interrupted_scans(db: &Database) -> Result<()> {
    let scans = db.scans();
    let interrupted = scans.interrupted().await?;
    for scan in &interrupted {
        warn!(
            scan_id = %scan.scan_id,
            chat_title = %scan.chat_title,
            processed = scan.processed,
            total = scan.total_messages,
            started_at = %scan.started_at,
            "Previous scan did not finish; rerun to resume from cache"
        );
    }
    if !interrupted.is_empty() {
        scans.clear_all().await?;
    }
    Ok(())
}
