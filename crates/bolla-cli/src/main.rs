//! bolla - shipment upload pipeline runner

use anyhow::{Context, Result};
use bolla_common::logging::{init_logging, LogConfig, LogLevel};
use bolla_core::carrier::{CarrierClient, HttpCarrierClient};
use bolla_core::config::AppConfig;
use bolla_core::geocode::HttpGeocodeProvider;
use bolla_core::ledger::UploadLedger;
use bolla_core::model::RowOutcome;
use bolla_core::pipeline::{InputSource, Pipeline, RunSummary};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "bolla")]
#[command(author, version, about = "Normalize addresses and upload shipment batches")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Process one input source end to end
    Run {
        /// Input source file (JSON: name, header columns, rows)
        #[arg(short, long)]
        input: PathBuf,

        /// Upload ledger database
        #[arg(short, long, default_value = "./bolla-ledger.db", env = "BOLLA_LEDGER_PATH")]
        ledger: PathBuf,

        /// Print the full per-row report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Verify the carrier credentials with a cheap query
    TestCarrier,

    /// Confirm all open shipments for the site
    CloseWorkDay,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env()?;
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    init_logging(&log_config)?;

    let config = AppConfig::from_env()?;

    match cli.command {
        Command::Run { input, ledger, json } => {
            let source = read_source(&input)?;
            let summary = run(&config, &ledger, source).await?;
            report(&summary, json)?;
            if !summary.is_clean() {
                std::process::exit(1);
            }
        },
        Command::TestCarrier => {
            let carrier = HttpCarrierClient::new(config.carrier)?;
            if carrier.test_connection().await {
                info!("carrier credentials accepted");
            } else {
                error!("carrier credentials rejected");
                std::process::exit(1);
            }
        },
        Command::CloseWorkDay => {
            let carrier = HttpCarrierClient::new(config.carrier)?;
            carrier.confirm_open_shipments().await?;
            info!("work day closed");
        },
    }

    Ok(())
}

fn read_source(path: &Path) -> Result<InputSource> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading input source {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("parsing input source {}", path.display()))
}

async fn run(config: &AppConfig, ledger_path: &Path, source: InputSource) -> Result<RunSummary> {
    let provider = HttpGeocodeProvider::new(&config.geocode)?;
    let carrier = HttpCarrierClient::new(config.carrier.clone())?;
    let ledger = UploadLedger::open(ledger_path).await?;

    let pipeline = Pipeline::new(
        Arc::new(provider),
        Arc::new(carrier),
        Arc::new(ledger),
        config.pipeline.clone(),
    );
    Ok(pipeline.run(source).await?)
}

fn report(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!(
        "{}: {} rows, {} confirmed, {} duplicates skipped, {} rejected, {} unresolved ({:.0}% success)",
        summary.source,
        summary.total_rows,
        summary.confirmed,
        summary.skipped_duplicates,
        summary.data_quality_failures + summary.business_failures,
        summary.unresolved,
        summary.success_rate() * 100.0
    );
    for row in &summary.rows {
        match &row.outcome {
            RowOutcome::Confirmed { .. } | RowOutcome::SkippedDuplicate { .. } => {},
            RowOutcome::Rejected { failure } => {
                println!("  row {} ({}): {}", row.ordinal, row.recipient, failure);
            },
            RowOutcome::CarrierRejected { message } => {
                println!("  row {} ({}): carrier rejected: {}", row.ordinal, row.recipient, message);
            },
            RowOutcome::Unresolved { detail } => {
                println!("  row {} ({}): unresolved: {}", row.ordinal, row.recipient, detail);
            },
        }
    }
    Ok(())
}
