//! dupetriage - duplicate image triage
//!
//! Finds exact duplicates (BLAKE3) or near-duplicates (aHash/pHash) in a
//! directory tree, stages each group into its own folder, lets a person pick
//! the copies to keep from a local web page, then restores the kept files and
//! deletes the rest. Every step is persisted, so an interrupted run resumes
//! where it stopped.

pub mod actions;
pub mod cli;
pub mod config;
pub mod duplicates;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod progress;
pub mod review;
pub mod scanner;
pub mod signal;
pub mod staging;

use std::sync::Arc;

use anyhow::Result;

use crate::cli::Cli;
use crate::config::{RunConfig, Settings};
use crate::error::ExitCode;
use crate::orchestrator::Orchestrator;
use crate::progress::Progress;

/// Run the application for parsed arguments.
///
/// # Errors
///
/// Configuration errors, an interrupted scan and setup failures are returned
/// for `main` to map onto an exit code.
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.quiet);

    let settings = Settings::load(cli.config.as_deref())?;
    let config = RunConfig::from_cli(&cli, &settings)?;
    log::debug!("Run configuration: {:?}", config);

    let handler = signal::install_handler()?;
    let orchestrator = Orchestrator::new(config, handler.get_flag())
        .with_progress(Arc::new(Progress::new(cli.quiet)));

    let outcome = orchestrator.run()?;
    Ok(outcome.exit_code())
}
