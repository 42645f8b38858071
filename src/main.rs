//! Template Miner - Main Application
//!
//! Loads a block template, searches the nonce space on every worker thread and
//! writes the first valid block to disk.

use template_miner::{
    utils::{format_bytes, format_elapsed, init_logging, percentage},
    worker::{random_start_nonce, PoolReport},
    Config, Error, MinerPool, Result, Template, APP_NAME, APP_VERSION,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load and validate configuration
    let config = Config::load().await?;

    init_logging(config.log_level, config.log_format)?;

    if config.print_config {
        print_configuration(&config)?;
        return Ok(());
    }

    info!("Starting {} v{}", APP_NAME, APP_VERSION);

    if let Err(e) = mine(&config).await {
        if e.is_setup_error() {
            error!(category = e.category(), "Mining could not start: {}", e);
        } else {
            error!(category = e.category(), "Mining failed: {}", e);
        }
        return Err(e);
    }

    Ok(())
}

/// Load the template, run the pool and report the outcome
async fn mine(config: &Config) -> Result<()> {
    let template = Template::load(&config.template, config.max_template_size)?;
    info!(
        "Loaded template {} ({})",
        config.template.display(),
        format_bytes(template.len())
    );

    let offset = template.locate_nonce_field(config.marker.as_bytes())?;
    info!("Nonce field at offset {}", offset);

    let threads = config.thread_count();
    let start_nonce = match config.start_nonce {
        Some(nonce) => nonce,
        None => random_start_nonce(config.trials, threads)?,
    };
    info!("Starting nonce value: {}", start_nonce);

    let target = config.target()?;
    info!(
        "Configuration: threads={}, trials={}, target={} (~{:.1} bits)",
        threads,
        config.trials,
        target,
        target.difficulty_bits()
    );

    let pool = MinerPool::new(config.pool_config(start_nonce)?, config.hasher()?)?;
    let report = pool.run(&template, offset).await?;

    log_report(&report, config);
    check_persisted(report)
}

/// Summarize a finished run
fn log_report(report: &PoolReport, config: &Config) {
    for block in report.winners() {
        info!(
            "Worker {} found nonce {} with digest {}",
            block.worker_id, block.nonce, block.digest
        );
    }

    if report.persisted() {
        info!("Block written to {}", config.output.display());
    } else if report.winners().next().is_none() {
        warn!("No valid digest found in {} trials", report.total_trials());
    }

    info!(
        "Computed {} hashes ({:.1}% of assigned nonces) in {}",
        report.hashes_computed(),
        percentage(report.hashes_computed() as f64, report.total_trials() as f64),
        format_elapsed(report.elapsed)
    );
    info!("Hashes / sec: {:.3} ({})", report.hash_rate().value(), report.hash_rate());
}

/// Fail the run when every winning block failed to reach disk
fn check_persisted(report: PoolReport) -> Result<()> {
    if report.persisted() {
        return Ok(());
    }

    let mut first_error: Option<Error> = None;
    for outcome in report.outcomes {
        if let Some(e) = outcome.persist_error {
            error!("Worker {} failed to persist block: {}", outcome.worker_id, e);
            first_error.get_or_insert(e);
        }
    }

    first_error.map_or(Ok(()), Err)
}

/// Print current configuration
fn print_configuration(config: &Config) -> Result<()> {
    let config_yaml = serde_yaml::to_string(config)?;
    println!("{}", config_yaml);
    Ok(())
}
