use std::path::PathBuf;

use clap::Parser;

/// The yascheduler compute task orchestrator.
#[derive(Debug, Parser)]
#[command(name = "yascheduler", version, about)]
pub struct Cli {
    /// Path to the daemon's TOML configuration file.
    #[arg(long, env = "YASCHEDULER_CONFIG", default_value = "yascheduler.toml")]
    pub config: PathBuf,

    /// Run a single tick and exit, instead of looping.
    #[arg(long)]
    pub once: bool,
}
