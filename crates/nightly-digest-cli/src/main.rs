mod commands;
mod logging;
mod progress;

use std::process::ExitCode;

use clap::Parser;
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use nightly_digest_core::config::load_configuration;
use nightly_digest_core::delivery::WebhookNotifier;
use nightly_digest_core::{AppConfig, DigestEngine, Error};
use progress::CliReporter;
use tracing::{error, info};

fn main() -> ExitCode {
    dotenv().ok();

    let args = Cli::parse();
    let _guard = logging::init_logger(&logging::LogSettings::from_env(args.verbose));

    let config = match load_configuration(&args.config) {
        Ok(config) => config,
        Err(err) => {
            error!(
                "Error loading configuration from {}: {}",
                args.config.display(),
                err
            );
            return ExitCode::FAILURE;
        }
    };

    match args.command.unwrap_or(Commands::Run) {
        Commands::Run => match run_digest(config, args.dry_run) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                error!("Error: {}", err);
                ExitCode::FAILURE
            }
        },
        Commands::PrintConfig => {
            println!("Configuration: {:#?}", config);
            ExitCode::SUCCESS
        }
    }
}

fn run_digest(config: AppConfig, dry_run: bool) -> Result<(), Error> {
    let engine = DigestEngine::new(config);
    let reporter = CliReporter::new();
    let result = engine.run(&reporter)?;

    println!();
    info!(
        "Locate: {}, Extract: {}",
        format!("{:.2}s", result.locate_duration.as_secs_f64()).green(),
        format!("{:.2}s", result.extract_duration.as_secs_f64()).green(),
    );
    let tally = result.tally;
    info!(
        "{} files found, {} processed, {} outside window, {} failed ({} timestamp, {} extraction)",
        format!("{}", tally.discovered).cyan(),
        format!("{}", tally.processed).green(),
        format!("{}", tally.skipped).yellow(),
        format!("{}", tally.failed).red(),
        tally.timestamp_failures,
        tally.extraction_failures,
    );
    info!(
        "{} captures ({} aborted) in {} groups",
        format!("{}", result.summary.completed).green(),
        format!("{}", result.summary.aborted).red(),
        result.groups.len(),
    );

    if dry_run {
        println!("{}", engine.render(&result));
        return Ok(());
    }

    let notifier = WebhookNotifier::from_config(engine.config())?;
    let sent = engine.publish(&result, &notifier, &reporter)?;
    if sent == 0 {
        info!("Nothing posted");
    }
    Ok(())
}
