//! Radio device settings and errors.

use serde::{Deserialize, Serialize};

/// Result type for radio operations
pub type RadioResult<T> = Result<T, RadioError>;

/// Errors surfaced by radio drivers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RadioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Hardware error: {0}")]
    HardwareError(String),

    #[error("Invalid channel {channel} (device has {available})")]
    InvalidChannel { channel: usize, available: usize },

    #[error("Device not started")]
    NotStarted,

    #[error("Timeout waiting for {0}")]
    Timeout(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

/// Whether a radio transmits or captures in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RadioRole {
    Transmit,
    Receive,
}

impl std::fmt::Display for RadioRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RadioRole::Transmit => write!(f, "tx"),
            RadioRole::Receive => write!(f, "rx"),
        }
    }
}

/// Front-end settings of one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// Center frequency in Hz
    pub frequency: f64,
    /// Normalized gain in [0.0, 1.0]
    pub gain: f64,
    /// Antenna port ("TX/RX" or "RX2")
    pub antenna: String,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            frequency: 915.0e6,
            gain: 0.5,
            antenna: "TX/RX".to_string(),
        }
    }
}

/// Everything a driver needs to open one radio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioSetup {
    /// Radio index within its role (tx radios and rx radios count separately)
    pub index: usize,
    pub role: RadioRole,
    /// Device address arguments, e.g. "addr=192.168.10.2"
    pub addrs: Vec<String>,
    /// Sample rate in Hz
    pub sample_rate: f64,
    pub master_clock_rate: Option<f64>,
    pub subdev_spec: Option<String>,
    /// Capture window length for receivers
    pub capture_seconds: Option<f64>,
    pub channels: Vec<ChannelSettings>,
}

impl RadioSetup {
    pub fn new(index: usize, role: RadioRole, sample_rate: f64) -> Self {
        Self {
            index,
            role,
            addrs: Vec::new(),
            sample_rate,
            master_clock_rate: None,
            subdev_spec: None,
            capture_seconds: None,
            channels: Vec::new(),
        }
    }

    pub fn with_channel(mut self, settings: ChannelSettings) -> Self {
        self.channels.push(settings);
        self
    }

    pub fn with_capture_seconds(mut self, seconds: f64) -> Self {
        self.capture_seconds = Some(seconds);
        self
    }

    pub fn with_addrs(mut self, addrs: Vec<String>) -> Self {
        self.addrs = addrs;
        self
    }

    /// Device arguments as a single comma-separated string.
    pub fn device_args(&self) -> String {
        self.addrs.join(",")
    }

    /// Capture window length in samples.
    pub fn capture_len(&self) -> usize {
        self.capture_seconds
            .map(|s| (s * self.sample_rate).round().max(0.0) as usize)
            .unwrap_or(0)
    }
}
