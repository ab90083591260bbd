//! `pulu01 run` command implementation
//!
//! Resolves configuration, reads the input file, and hands the records to a
//! [`WorkerPool`] backed by either the HTTP or the simulated gateway.

use crate::api::{ApiGateway, HttpApiGateway, SimulatedGateway};
use crate::config::AppConfig;
use crate::error::Result;
use crate::ledger::Ledger;
use crate::progress::{format_count, ProgressReporter, ProgressSnapshot};
use crate::records::Record;
use crate::source;
use crate::worker::{PoolSettings, WorkerPool};
use crate::RunArgs;
use colored::Colorize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Execute a processing run
///
/// `cancel` stops the run gracefully; `abort` additionally cuts off calls
/// that are still in flight.
pub async fn run(
    args: &RunArgs,
    cancel: CancellationToken,
    abort: CancellationToken,
) -> Result<ProgressSnapshot> {
    let config = AppConfig::load(args)?;
    print_banner(&config);

    let report = source::parse(&config.input_file, config.mode)?;
    println!(
        "Loaded {} records from {}",
        format_count(report.records.len()).bold(),
        config.input_file.display()
    );
    if report.invalid > 0 {
        println!(
            "{} {} invalid line(s) skipped, see the log for details",
            "⚠".yellow(),
            format_count(report.invalid)
        );
    }

    info!(
        file = %config.input_file.display(),
        mode = %config.mode,
        threads = config.threads,
        simulate = config.simulate,
        records = report.records.len(),
        invalid = report.invalid,
        "Starting run"
    );

    if config.simulate {
        println!("{}", "Simulation mode: no requests will be sent".yellow());
        let gateway = Arc::new(SimulatedGateway::new(config.simulation.clone()));
        drive(gateway, &config, report.records, cancel).await
    } else {
        let gateway = Arc::new(HttpApiGateway::new(&config.api)?.with_abort(abort));
        drive(gateway, &config, report.records, cancel).await
    }
}

async fn drive<G: ApiGateway + 'static>(
    gateway: Arc<G>,
    config: &AppConfig,
    records: Vec<Record>,
    cancel: CancellationToken,
) -> Result<ProgressSnapshot> {
    let ledger = Arc::new(Ledger::new(
        &config.output.success_path,
        &config.output.failure_path,
        config.processing.file_write_batch_size,
    ));
    let reporter = Arc::new(ProgressReporter::new(
        config.processing.progress_batch_size,
        &config.output,
    ));

    let pool = WorkerPool::new(gateway, ledger, reporter, PoolSettings::from_config(config))?;

    let already = pool.load_ledger().await;
    if already > 0 {
        println!(
            "Found {} already processed records, these will be skipped",
            format_count(already).cyan()
        );
    }
    println!();

    Ok(pool.run(records, cancel).await)
}

fn print_banner(config: &AppConfig) {
    println!();
    println!("{}", config.mode.title().cyan().bold());
    println!("{}", "=".repeat(config.mode.title().len()).cyan());
    println!("  Input file: {}", config.input_file.display());
    println!("  Clear code: {}", config.clear_code);
    println!("  Threads:    {}", config.threads);
    println!("  Endpoint:   {}{}", config.api.base_url, config.endpoint());
    println!();
    println!("{}", "Press Ctrl+C to stop processing".dimmed());
    println!();
}
