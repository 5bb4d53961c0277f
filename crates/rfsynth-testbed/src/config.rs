//! Radio configuration files and run options.
//!
//! Transmit and receive setups are JSON documents:
//!
//! ```json
//! {
//!   "save_dir": "/data/captures",
//!   "radios": [{
//!     "addrs": ["addr=192.168.10.2"],
//!     "masterClockRate": 200e6,
//!     "sampleRate": 10e6,
//!     "subdevSpec": "A:0 B:0",
//!     "numSecondsReceive": 2.0,
//!     "channels": [{
//!       "antenna": "RX2",
//!       "gain": 0.6,
//!       "IQSTREAM_Params": { "frequency": 2.45e9 }
//!     }]
//!   }]
//! }
//! ```
//!
//! Transmit configs carry `preambleOnTimeMs` instead of `save_dir`, and each
//! channel's `IQSTREAM_Params` names the payload `file` and its `metadata`.
//! Keys not listed here are kept verbatim so they can be copied into
//! per-capture metadata.

use rfsynth_core::marker::DEFAULT_SAMPLES_PER_SYMBOL;
use rfsynth_sim::{ChannelSettings, RadioRole, RadioSetup};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{TestbedError, TestbedResult};

/// Antenna ports a channel may use.
pub const ANTENNA_TYPES: [&str; 2] = ["TX/RX", "RX2"];

/// Most channels a single radio may drive.
pub const MAX_CHANNELS_PER_RADIO: usize = 4;

/// Per-channel stream parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IqStreamParams {
    /// Center frequency in Hz
    pub frequency: f64,
    /// Payload to transmit (cf32)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// Payload metadata (JSON) or event timeline (CSV)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PathBuf>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub antenna: String,
    /// Normalized gain in [0.0, 1.0]
    pub gain: f64,
    #[serde(rename = "IQSTREAM_Params")]
    pub iq_stream: IqStreamParams,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChannelConfig {
    pub fn settings(&self) -> ChannelSettings {
        ChannelSettings {
            frequency: self.iq_stream.frequency,
            gain: self.gain,
            antenna: self.antenna.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadioConfig {
    #[serde(default)]
    pub addrs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_clock_rate: Option<f64>,
    pub sample_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdev_spec: Option<String>,
    /// Capture window length for receivers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_seconds_receive: Option<f64>,
    pub channels: Vec<ChannelConfig>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RadioConfig {
    /// Device URI for a driver, e.g. `uhd://addr=192.168.10.2`.
    pub fn device_uri(&self, driver: &str) -> String {
        format!("{}://{}", driver, self.addrs.join(","))
    }

    /// Driver-facing description of this radio.
    pub fn setup(&self, index: usize, role: RadioRole) -> RadioSetup {
        RadioSetup {
            index,
            role,
            addrs: self.addrs.clone(),
            sample_rate: self.sample_rate,
            master_clock_rate: self.master_clock_rate,
            subdev_spec: self.subdev_spec.clone(),
            capture_seconds: self.num_seconds_receive,
            channels: self.channels.iter().map(ChannelConfig::settings).collect(),
        }
    }
}

/// Transmit-side configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxConfig {
    pub radios: Vec<RadioConfig>,
    /// Marker on-air duration in milliseconds (capture mode)
    #[serde(
        rename = "preambleOnTimeMs",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub preamble_on_time_ms: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TxConfig {
    /// Channel count of each radio.
    pub fn channels_per_radio(&self) -> Vec<usize> {
        self.radios.iter().map(|r| r.channels.len()).collect()
    }

    pub fn total_channels(&self) -> usize {
        self.radios.iter().map(|r| r.channels.len()).sum()
    }
}

/// Receive-side configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RxConfig {
    pub radios: Vec<RadioConfig>,
    /// Directory sliced captures are written to
    pub save_dir: PathBuf,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RxConfig {
    pub fn channels_per_radio(&self) -> Vec<usize> {
        self.radios.iter().map(|r| r.channels.len()).collect()
    }
}

/// Knobs of a run that are not part of the radio configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestbedOptions {
    /// Driver used to open every radio ("uhd" or "sim")
    pub driver: String,
    /// Pause between arming receivers and starting transmitters
    pub settle_delay_s: f64,
    /// Samples per marker symbol
    pub samples_per_symbol: usize,
    /// Peak amplitude of the transmitted marker+payload
    pub tx_headroom: f64,
    /// Minimum gap between consecutive events on one channel
    pub guard_interval_s: f64,
    /// Delay between launching the real-time run and the mission epoch
    pub start_lead_s: f64,
    /// Fixed seed for marker seed draws (random when unset)
    pub seed: Option<u64>,
}

impl Default for TestbedOptions {
    fn default() -> Self {
        Self {
            driver: "uhd".to_string(),
            settle_delay_s: 0.5,
            samples_per_symbol: DEFAULT_SAMPLES_PER_SYMBOL,
            tx_headroom: 0.8,
            guard_interval_s: 0.007,
            start_lead_s: 10.0,
            seed: None,
        }
    }
}

impl TestbedOptions {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs_f64(self.settle_delay_s.max(0.0))
    }

    pub fn start_lead(&self) -> Duration {
        Duration::from_secs_f64(self.start_lead_s.max(0.0))
    }
}

fn load_json<T: DeserializeOwned>(path: &Path) -> TestbedResult<T> {
    let text = fs::read_to_string(path).map_err(|e| TestbedError::io(path, e))?;
    serde_json::from_str(&text).map_err(|source| TestbedError::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_tx_config(path: impl AsRef<Path>) -> TestbedResult<TxConfig> {
    load_json(path.as_ref())
}

pub fn load_rx_config(path: impl AsRef<Path>) -> TestbedResult<RxConfig> {
    load_json(path.as_ref())
}

fn check_radios(radios: &[RadioConfig], label: &str) -> TestbedResult<()> {
    if radios.is_empty() {
        return Err(TestbedError::config(format!(
            "No radios were listed in the {} config",
            label
        )));
    }

    for (index, radio) in radios.iter().enumerate() {
        if !radio.sample_rate.is_finite() || radio.sample_rate <= 0.0 {
            return Err(TestbedError::config(format!(
                "{} radio {} has invalid sample rate {}",
                label, index, radio.sample_rate
            )));
        }

        let count = radio.channels.len();
        if count < 1 {
            return Err(TestbedError::config(format!(
                "No channels were specified for {} radio {}",
                label, index
            )));
        }
        if count > MAX_CHANNELS_PER_RADIO {
            return Err(TestbedError::config(format!(
                "Too many channels ({}) were specified for {} radio {} (max {})",
                count, label, index, MAX_CHANNELS_PER_RADIO
            )));
        }

        for (channel_index, channel) in radio.channels.iter().enumerate() {
            if !ANTENNA_TYPES.contains(&channel.antenna.as_str()) {
                return Err(TestbedError::config(format!(
                    "Invalid antenna type '{}' on {} radio {} channel {}. Should be one of {:?}",
                    channel.antenna, label, index, channel_index, ANTENNA_TYPES
                )));
            }
            if !(0.0..=1.0).contains(&channel.gain) {
                return Err(TestbedError::config(format!(
                    "Invalid gain {} on {} radio {} channel {}. Should be a normalized gain between 0.0 and 1.0",
                    channel.gain, label, index, channel_index
                )));
            }
        }
    }

    let first = radios[0].sample_rate;
    if let Some(other) = radios.iter().find(|r| r.sample_rate != first) {
        return Err(TestbedError::config(format!(
            "There should only be one sample rate used for all {} radios, got {} and {}",
            label, first, other.sample_rate
        )));
    }

    Ok(())
}

fn check_save_dir(dir: &Path) -> TestbedResult<()> {
    if !dir.is_dir() {
        return Err(TestbedError::config(format!(
            "Save directory {} does not exist",
            dir.display()
        )));
    }

    let check_file = dir.join(format!(".rfsynth-write-check-{}", std::process::id()));
    fs::write(&check_file, b"").map_err(|e| {
        TestbedError::config(format!(
            "Save directory {} is not writable: {}",
            dir.display(),
            e
        ))
    })?;
    let _ = fs::remove_file(&check_file);
    Ok(())
}

pub fn validate_tx_config(config: &TxConfig) -> TestbedResult<()> {
    check_radios(&config.radios, "tx")
}

pub fn validate_rx_config(config: &RxConfig) -> TestbedResult<()> {
    check_save_dir(&config.save_dir)?;
    check_radios(&config.radios, "rx")?;

    for (index, radio) in config.radios.iter().enumerate() {
        match radio.num_seconds_receive {
            Some(seconds) if seconds.is_finite() && seconds > 0.0 => {}
            other => {
                return Err(TestbedError::config(format!(
                    "rx radio {} needs a positive numSecondsReceive, got {:?}",
                    index, other
                )))
            }
        }
    }
    Ok(())
}

/// Checks for a one-shot capture, run before any radio is opened.
pub fn validate_capture_configs(tx: &TxConfig, rx: &RxConfig) -> TestbedResult<()> {
    validate_rx_config(rx)?;
    validate_tx_config(tx)?;

    let (tx_rate, rx_rate) = (tx.radios[0].sample_rate, rx.radios[0].sample_rate);
    if tx_rate != rx_rate {
        return Err(TestbedError::config(format!(
            "Transmitters and receivers must share one sample rate, got tx {} and rx {}",
            tx_rate, rx_rate
        )));
    }

    match tx.preamble_on_time_ms {
        Some(ms) if ms.is_finite() && ms > 0.0 => {}
        other => {
            return Err(TestbedError::config(format!(
                "preambleOnTimeMs must be positive, got {:?}",
                other
            )))
        }
    }

    for (index, radio) in tx.radios.iter().enumerate() {
        for (channel_index, channel) in radio.channels.iter().enumerate() {
            if channel.iq_stream.file.is_none() || channel.iq_stream.metadata.is_none() {
                return Err(TestbedError::config(format!(
                    "tx radio {} channel {} needs IQSTREAM_Params file and metadata",
                    index, channel_index
                )));
            }
        }
    }
    Ok(())
}
