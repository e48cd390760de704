//! finfetch - resilient lookup of financial records
//!
//! Resolves prices, financials, earnings and news through an in-process
//! cache, the persistent store, the refresh pipeline and fallback sources.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use serde_json::json;

use finfetch::app::App;
use finfetch::cli::{Cli, Command, FetchArgs};
use finfetch::config::Config;
use finfetch::logging;
use finfetch::warmer::{WarmerEvent, WarmerHandle};

/// Exit code when a fetch produced no value
const EXIT_ABSENT: u8 = 2;

/// How long to let store write-through finish before exiting
const WRITE_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init(cli.log_options())?;

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.store_dir {
        config.store.dir = Some(dir);
    }

    match cli.command {
        Command::Config => {
            print!("{}", config.effective()?.to_toml()?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Fetch(args) => run_fetch(config, args).await,
        Command::Warm { cycles } => run_warm(config, cycles).await,
    }
}

async fn run_fetch(config: Config, args: FetchArgs) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let app = App::from_config(config)?;
    let outcome = app
        .orchestrator
        .fetch(&args.symbol, args.kind, args.fetch_options())
        .await;

    let output = if args.stats {
        json!({
            "outcome": outcome,
            "cache_stats": app.orchestrator.cache_stats(),
        })
    } else {
        serde_json::to_value(&outcome)?
    };
    println!("{}", serde_json::to_string_pretty(&output)?);

    if !app.orchestrator.wait_for_writes(WRITE_GRACE).await {
        tracing::warn!("Exiting with store writes still pending");
    }

    if outcome.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_ABSENT))
    }
}

async fn run_warm(config: Config, cycles: Option<u64>) -> Result<ExitCode, Box<dyn std::error::Error>> {
    if config.warmer.hot_set.is_empty() {
        eprintln!("No hot set configured; add [[warmer.hot_set]] entries to the config file");
        return Ok(ExitCode::FAILURE);
    }

    let warmer_config = config.warmer.clone();
    let app = App::from_config(config)?;
    let mut handle = WarmerHandle::spawn(warmer_config, app.orchestrator.clone());
    let mut completed = 0;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping warmer");
                break;
            }
            event = handle.receiver.recv() => {
                let Some(event) = event else { break };
                println!("{}", serde_json::to_string(&event)?);

                if matches!(event, WarmerEvent::CycleCompleted { .. }) {
                    completed += 1;
                    if cycles.is_some_and(|limit| completed >= limit) {
                        break;
                    }
                }
            }
        }
    }

    handle.shutdown().await;
    app.orchestrator.wait_for_writes(WRITE_GRACE).await;
    Ok(ExitCode::SUCCESS)
}
