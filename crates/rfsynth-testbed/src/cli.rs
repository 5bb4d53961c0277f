//! `rfsynth` command line.
//!
//! ```bash
//! # One-shot capture across every tx/rx channel pair
//! rfsynth collect --tx-config tx_radio_config.json --rx-config rx_radio_config.json
//!
//! # Replay each tx channel's timeline against a shared epoch
//! rfsynth replay --tx-config tx_realtime_config.json
//!
//! # Same, with the ground truth moved onto the epoch and published live
//! rfsynth replay --tx-config tx_realtime_config.json --ground-truth truth.json --broadcast
//!
//! # Shift a ground-truth report to POSIX time
//! rfsynth offset-report 1700000000.0 truth.json
//! ```

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rfsynth_core::observe::{LogConfig, LogFormat, LogLevel, DEFAULT_LOG_FILE};
use rfsynth_sim::create_default_registry;
use std::path::PathBuf;
use tracing::info;

use crate::broadcast::DEFAULT_BROADCAST_ENDPOINT;
use crate::config::{load_rx_config, load_tx_config, TestbedOptions};
use crate::metadata::save_json;
use crate::orchestrator::CaptureOrchestrator;
use crate::report::offset_report_file;
use crate::scheduler::{run_replay, GroundTruthOptions};

/// Over-the-air multi-radio test campaigns
#[derive(Parser, Debug)]
#[command(name = "rfsynth")]
#[command(author, version, about = "Synchronized multi-radio capture and timeline replay")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Log level (overridden by RUST_LOG)
    #[arg(long, global = true, env = "RFSYNTH_LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Console log format
    #[arg(long, global = true, value_enum, default_value = "pretty")]
    pub log_format: LogFormatArg,

    /// Log file written alongside the console
    #[arg(long, global = true, default_value = DEFAULT_LOG_FILE)]
    pub log_file: PathBuf,

    /// Log to the console only
    #[arg(long, global = true)]
    pub no_log_file: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn log_config(&self) -> LogConfig {
        let config = LogConfig {
            level: self.log_level,
            format: self.log_format.into(),
            // One replay thread per channel
            thread_names: matches!(self.command, Commands::Replay(_)),
            ..Default::default()
        };
        if self.no_log_file {
            config
        } else {
            config.with_file(&self.log_file)
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Compact => LogFormat::Compact,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Capture every tx/rx channel pair once and save aligned slices
    Collect(CollectArgs),

    /// Replay transmit timelines in real time
    Replay(ReplayArgs),

    /// Offset a ground-truth report by a POSIX time
    OffsetReport(OffsetReportArgs),
}

/// Options shared by commands that open radios
#[derive(Args, Debug, Clone)]
pub struct RadioArgs {
    /// Radio driver ("uhd" or "sim")
    #[arg(long, env = "RFSYNTH_DRIVER", default_value = "uhd")]
    pub driver: String,
}

#[derive(Args, Debug)]
pub struct CollectArgs {
    /// Transmit radio config (JSON)
    #[arg(long, default_value = "tx_radio_config.json")]
    pub tx_config: PathBuf,

    /// Receive radio config (JSON)
    #[arg(long, default_value = "rx_radio_config.json")]
    pub rx_config: PathBuf,

    #[command(flatten)]
    pub radio: RadioArgs,

    /// Seconds between arming receivers and starting transmitters
    #[arg(long, default_value_t = 0.5)]
    pub settle_delay: f64,

    /// Samples per marker symbol
    #[arg(long, default_value_t = 2)]
    pub samples_per_symbol: usize,

    /// Peak amplitude of the transmitted signal
    #[arg(long, default_value_t = 0.8)]
    pub headroom: f64,

    /// Fixed seed for marker seed draws
    #[arg(long)]
    pub seed: Option<u64>,

    /// Write the per-pair outcome summary to this JSON file
    #[arg(long)]
    pub summary: Option<PathBuf>,
}

impl CollectArgs {
    pub fn options(&self) -> TestbedOptions {
        TestbedOptions {
            driver: self.radio.driver.clone(),
            settle_delay_s: self.settle_delay,
            samples_per_symbol: self.samples_per_symbol,
            tx_headroom: self.headroom,
            seed: self.seed,
            ..Default::default()
        }
    }
}

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Transmit radio config whose channel `metadata` entries are timelines (CSV)
    #[arg(long, default_value = "tx_radio_config.json")]
    pub tx_config: PathBuf,

    #[command(flatten)]
    pub radio: RadioArgs,

    /// Seconds from launch to the mission epoch
    #[arg(long, default_value_t = 10.0)]
    pub start_lead: f64,

    /// Minimum gap between transmissions on one channel, in seconds
    #[arg(long, default_value_t = 0.007)]
    pub guard_interval: f64,

    /// Ground-truth report (times relative to the mission epoch)
    #[arg(long)]
    pub ground_truth: Option<PathBuf>,

    /// Prepared ground-truth output (default: <report>_offset.json)
    #[arg(long, requires = "ground_truth")]
    pub ground_truth_out: Option<PathBuf>,

    /// Signal report field to set to "no_answer" (repeatable)
    #[arg(long = "no-answer", value_name = "FIELD", requires = "ground_truth")]
    pub no_answer: Vec<String>,

    /// Publish each ground-truth report when it starts
    #[arg(long, requires = "ground_truth")]
    pub broadcast: bool,

    /// ZeroMQ endpoint for --broadcast
    #[arg(long, default_value = DEFAULT_BROADCAST_ENDPOINT)]
    pub broadcast_endpoint: String,
}

impl ReplayArgs {
    pub fn options(&self) -> TestbedOptions {
        TestbedOptions {
            driver: self.radio.driver.clone(),
            start_lead_s: self.start_lead,
            guard_interval_s: self.guard_interval,
            ..Default::default()
        }
    }

    pub fn ground_truth(&self) -> Option<GroundTruthOptions> {
        let report = self.ground_truth.clone()?;
        Some(GroundTruthOptions {
            report,
            output: self.ground_truth_out.clone(),
            no_answer_fields: self.no_answer.clone(),
            broadcast: self.broadcast.then(|| self.broadcast_endpoint.clone()),
        })
    }
}

#[derive(Args, Debug)]
pub struct OffsetReportArgs {
    /// POSIX timestamp to offset by
    pub time: f64,

    /// Report file to offset
    pub report: PathBuf,
}

pub fn collect(args: &CollectArgs) -> Result<()> {
    let tx = load_tx_config(&args.tx_config)?;
    let rx = load_rx_config(&args.rx_config)?;
    let registry = create_default_registry();

    let mut orchestrator = CaptureOrchestrator::new(tx, rx, args.options());
    let report = orchestrator.run(&registry)?;

    println!(
        "Saved {} of {} pairs in {:.2} s",
        report.saved_count(),
        report.pairs.len(),
        report.elapsed.as_secs_f64()
    );

    if let Some(path) = &args.summary {
        let value = serde_json::to_value(&report).context("serializing capture summary")?;
        save_json(path, &value)?;
        info!(path = %path.display(), "Wrote capture summary");
    }
    Ok(())
}

pub fn replay(args: &ReplayArgs) -> Result<()> {
    let tx = load_tx_config(&args.tx_config)?;
    let registry = create_default_registry();

    let ground_truth = args.ground_truth();
    let outcome = run_replay(&tx, &args.options(), &registry, ground_truth.as_ref())?;
    if let Some(path) = &outcome.ground_truth {
        println!("Ground truth: {}", path.display());
    }
    match &outcome.broadcast {
        Some(Ok(summary)) => println!(
            "Broadcast: published {}, failed {}",
            summary.published, summary.failed
        ),
        Some(Err(e)) => println!("Broadcast: failed: {}", e),
        None => {}
    }

    let results = &outcome.contexts;
    let mut failed = 0;
    for context in results {
        match &context.result {
            Ok(summary) => println!(
                "Tx {}.Chan {}: transmitted {}, skipped {}",
                context.radio, context.channel, summary.executed, summary.skipped
            ),
            Err(e) => {
                failed += 1;
                println!("Tx {}.Chan {}: failed: {}", context.radio, context.channel, e);
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} channel contexts failed", failed, results.len());
    }
    Ok(())
}

pub fn offset_report(args: &OffsetReportArgs) -> Result<()> {
    let output = offset_report_file(&args.report, args.time)
        .with_context(|| format!("offsetting {}", args.report.display()))?;
    println!("{}", output.display());
    Ok(())
}
