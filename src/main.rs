//! # Leadflow Entry Point
//!
//! `leadflow migrate` applies the schema, `leadflow monitor` runs the SLA
//! monitor until interrupted, and `leadflow scan-once` runs a single scan and
//! prints its report.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use leadflow::{config::ConfigLoader, db, sla_monitor::SlaMonitor, telemetry::init_tracing};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "leadflow", about = "Lead distribution and SLA redistribution service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending database migrations.
    Migrate,
    /// Run the SLA monitor loop until Ctrl-C.
    Monitor,
    /// Run one SLA scan and print the report as JSON.
    ScanOnce {
        /// Scan as of this RFC 3339 instant instead of now.
        #[arg(long, value_name = "TIMESTAMP")]
        at: Option<DateTime<Utc>>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    init_tracing(&config).context("initializing telemetry")?;

    info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(configuration = %redacted_json, "Effective configuration");
    }

    let pool = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;

    match cli.command {
        Command::Migrate => db::migrate(&pool).await,
        Command::Monitor => {
            let config = Arc::new(config);
            let monitor = SlaMonitor::new(config, Arc::new(pool));
            let shutdown = CancellationToken::new();

            let signal_token = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received; stopping");
                }
                signal_token.cancel();
            });

            monitor
                .run(shutdown)
                .await
                .context("running SLA monitor")
        }
        Command::ScanOnce { at } => {
            let monitor = SlaMonitor::new(Arc::new(config), Arc::new(pool));
            let report = monitor
                .scan_and_redistribute(at.unwrap_or_else(Utc::now))
                .await
                .context("scanning for overdue opportunities")?;
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("serializing scan report")?
            );
            Ok(())
        }
    }
}
