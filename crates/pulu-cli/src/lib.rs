//! PULU01 CLI Library
//!
//! Batch clearing of donation holds and discard fates against the Pulse API.
//!
//! # Overview
//!
//! A run reads a CSV file of records, submits each one to the API through a
//! bounded pool of workers, and records every outcome:
//!
//! - **Record source** ([`source`]): CSV parsing, header detection, validation
//! - **API gateway** ([`api`]): one POST per record, outcome classification
//! - **Persistence ledger** ([`ledger`]): success and failure stores, resume keys
//! - **Worker pool** ([`worker`]): queue, workers, background flushing
//! - **Progress reporter** ([`progress`]): live line and final summary
//!
//! Records that succeeded in an earlier run are skipped, so an interrupted
//! run can simply be started again.

pub mod api;
pub mod commands;
pub mod config;
pub mod error;
pub mod ledger;
pub mod progress;
pub mod records;
pub mod source;
pub mod worker;

// Re-export commonly used types
pub use error::{CliError, Result};
pub use records::{ProcessingMode, ProcessingResult, ProcessingStatus, Record};

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// PULU01 - Pulse batch clearing utility
#[derive(Parser, Debug)]
#[command(name = "pulu01")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output (debug logs on stderr)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Clear every record in a CSV file
    Run(RunArgs),

    /// Write synthetic hold records for load testing
    Generate {
        /// Number of records to write
        #[arg(short, long, default_value = "20000")]
        count: usize,

        /// Output CSV file
        #[arg(short, long, default_value = "test_data.csv")]
        output: PathBuf,
    },
}

/// Arguments of `pulu01 run`
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Input CSV file
    #[arg(short, long, env = "PULU_FILE")]
    pub file: PathBuf,

    /// Clear code sent with every request (2-3 characters)
    #[arg(long = "clearcode", env = "PULU_CLEAR_CODE")]
    pub clearcode: String,

    /// Number of concurrent workers (1-50)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Record kind to process
    #[arg(short, long, value_enum)]
    pub mode: Option<ProcessingMode>,

    /// Settings file (defaults to ./pulu.toml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Use the in-process simulated gateway instead of the API
    #[arg(long)]
    pub simulate: bool,
}
