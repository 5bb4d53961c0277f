//! rfsynth command-line entry point.

use anyhow::Context;
use clap::Parser;
use rfsynth_core::observe::init_logging;
use rfsynth_testbed::{cli, Cli, Commands};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_config = cli.log_config();
    init_logging(&log_config).with_context(|| {
        format!(
            "opening log file {}",
            log_config
                .file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        )
    })?;

    match &cli.command {
        Commands::Collect(args) => cli::collect(args),
        Commands::Replay(args) => cli::replay(args),
        Commands::OffsetReport(args) => cli::offset_report(args),
    }
}
