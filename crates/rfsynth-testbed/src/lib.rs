//! # rfsynth Testbed
//!
//! Over-the-air test campaigns across independently clocked radios.
//!
//! - [`orchestrator`]: one-shot capture. Every tx channel sends its payload
//!   behind a seeded marker; every rx channel's capture is searched for every
//!   marker and the aligned payload slices are saved with their metadata.
//! - [`scheduler`]: real-time replay of per-channel transmission timelines
//!   against a shared mission epoch, with a guard interval between events.
//! - [`config`], [`timeline`], [`metadata`], [`report`]: the file formats
//!   around them.
//! - [`broadcast`]: live publication of the ground truth during a replay.
//!
//! ```text
//!  tx_radio_config.json ─┐
//!  rx_radio_config.json ─┼─► CaptureOrchestrator ─► Tx0-0_Rx0-0_<payload>
//!                        │                          Tx0-0_Rx0-0_<metadata>
//!  timeline.csv ─────────┴─► run_replay ─► timed bursts per channel
//!  ground truth ────────────────┘        └─► <report>_offset.json, PUB :62002
//! ```

pub mod broadcast;
pub mod cli;
pub mod config;
pub mod error;
pub mod metadata;
pub mod orchestrator;
pub mod report;
pub mod scheduler;
pub mod timeline;

pub use cli::{Cli, Commands};
pub use config::{RadioConfig, RxConfig, TestbedOptions, TxConfig};
pub use error::{TestbedError, TestbedResult};
pub use orchestrator::{CaptureOrchestrator, CaptureReport, CaptureState, PairOutcome};
pub use scheduler::{
    run_realtime, run_replay, ChannelScheduler, ChannelSummary, EventOutcome, GroundTruthOptions,
    ReplayOutcome,
};
pub use timeline::{Timeline, TimelineEvent};
