//! Command-line interface parsing for finfetch
//!
//! This module defines the clap command tree and the small parsers for
//! values clap cannot check on its own.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand};
use thiserror::Error;

use crate::data::{DataKind, FetchOptions};
use crate::logging::LogOptions;

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// The data kind is not recognized
    #[error("Invalid data kind: '{0}'. Valid kinds: prices, financials, earnings, news")]
    InvalidKind(String),

    /// A `--param` value is not of the form `name=value`
    #[error("Invalid parameter '{0}': expected name=value")]
    InvalidParam(String),
}

/// finfetch - resilient lookup of financial records
#[derive(Parser, Debug)]
#[command(name = "finfetch")]
#[command(about = "Fetch financial records through cache, store, refresh and fallback sources")]
#[command(version)]
pub struct Cli {
    /// Config file (default: ~/.config/finfetch/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Override the persistent store directory
    #[arg(long, global = true, value_name = "DIR")]
    pub store_dir: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Log as JSON lines on stderr
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve one record and print the outcome as JSON
    ///
    /// Examples:
    ///   finfetch fetch SBUX financials
    ///   finfetch fetch KDP financials --param freq=quarterly
    ///   finfetch fetch PEP prices --deadline-secs 5 --stats
    Fetch(FetchArgs),

    /// Keep the configured hot set warm
    Warm {
        /// Stop after this many cycles (default: run until Ctrl-C)
        #[arg(long, value_name = "N")]
        cycles: Option<u64>,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Ticker symbol, case-insensitive
    pub symbol: String,

    /// Data kind: prices, financials, earnings or news
    #[arg(value_parser = parse_kind_arg)]
    pub kind: DataKind,

    /// Request parameter, repeatable (e.g. freq=quarterly)
    #[arg(long = "param", value_name = "NAME=VALUE", value_parser = parse_param_arg)]
    pub params: Vec<(String, String)>,

    /// Stop waiting after this many seconds
    #[arg(long, value_name = "SECS")]
    pub deadline_secs: Option<u64>,

    /// Append cache statistics to the output
    #[arg(long)]
    pub stats: bool,
}

impl Cli {
    pub fn log_options(&self) -> LogOptions {
        LogOptions {
            verbosity: self.verbose,
            json: self.json_logs,
        }
    }
}

impl FetchArgs {
    /// Options to pass to the orchestrator
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            params: self.params.iter().cloned().collect::<BTreeMap<_, _>>(),
            deadline: self.deadline_secs.map(Duration::from_secs),
        }
    }
}

/// Parses a data kind argument
pub fn parse_kind_arg(s: &str) -> Result<DataKind, CliError> {
    s.parse().map_err(|_| CliError::InvalidKind(s.to_string()))
}

/// Parses a `name=value` request parameter
pub fn parse_param_arg(s: &str) -> Result<(String, String), CliError> {
    match s.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim().to_string(), value.trim().to_string())),
        _ => Err(CliError::InvalidParam(s.to_string())),
    }
}
