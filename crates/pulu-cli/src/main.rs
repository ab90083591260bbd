//! PULU01 CLI - Main entry point

use clap::Parser;
use colored::Colorize;
use pulu_cli::{Cli, Commands};
use pulu_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env before clap reads PULU_* variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let log_config = if cli.verbose {
        // Verbose mode: debug on stderr as well as the log file
        LogConfig::builder()
            .level(LogLevel::Debug)
            .output(LogOutput::Both)
            .log_file_prefix("pulu01")
            .build()
    } else {
        // Normal mode: info to the daily log file only
        LogConfig::builder()
            .level(LogLevel::Info)
            .output(LogOutput::File)
            .log_file_prefix("pulu01")
            .build()
    };

    // Environment variables take precedence over the flags
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    // The CLI keeps working without logging
    let _guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {}", e);
            None
        }
    };

    match execute_command(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

/// Execute the CLI command
async fn execute_command(cli: &Cli) -> pulu_cli::Result<()> {
    match &cli.command {
        Commands::Run(args) => {
            let cancel = CancellationToken::new();
            let abort = CancellationToken::new();
            let signals = tokio::spawn(watch_ctrl_c(cancel.clone(), abort.clone()));

            let result = pulu_cli::commands::run::run(args, cancel, abort).await;
            signals.abort();

            let snapshot = result?;
            info!(
                processed = snapshot.processed,
                total = snapshot.total,
                "Run finished"
            );
            Ok(())
        }
        Commands::Generate { count, output } => {
            pulu_cli::commands::generate::run(*count, output).await
        }
    }
}

/// First Ctrl+C stops dispatching; a second one aborts in-flight requests
async fn watch_ctrl_c(cancel: CancellationToken, abort: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    warn!("Interrupt received, finishing in-flight records");
    eprintln!(
        "\n{}",
        "Stopping after in-flight records complete... (press Ctrl+C again to abort them)".yellow()
    );
    cancel.cancel();

    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    warn!("Second interrupt received, aborting in-flight requests");
    abort.cancel();
}
