use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "nightly-digest")]
#[command(about = "Summarize last night's imaging session and post it to a webhook", long_about = None)]
pub struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, default_value = "config.yaml")]
    pub config: PathBuf,

    /// Log at debug level
    #[arg(short, long)]
    pub verbose: bool,

    /// Print the report instead of posting it
    #[arg(long)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Collect, summarize and post the report (default)
    Run,
    /// Print configuration values
    PrintConfig,
}
