//! # Radio Hardware Abstraction
//!
//! [`RadioDevice`] is the whole contract the test tooling relies on. Drivers
//! are looked up by name in a [`DriverRegistry`] and opened from a
//! `driver://args` URI plus a [`RadioSetup`].
//!
//! ## Timed commands
//!
//! `timed_start` and `timed_retune` take an absolute [`WallClock`] instant.
//! A device honors the instant in its own clock, which is aligned to the host
//! once with `set_time_now`, so the command executes at the right time even if
//! the calling thread was delayed.
//!
//! ```text
//!   host:    set_time_now ──── timed_start(T) ─────────── wait ── stop
//!   device:  clock := host         ...        ▲ T: burst ──┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use rfsynth_sim::hal::create_default_registry;
//!
//! let registry = create_default_registry();
//! let mut radio = registry.create("uhd://addr=192.168.10.2", &setup)?;
//! radio.set_channel_payload(0, &signal)?;
//! radio.start()?;
//! radio.wait()?;
//! radio.stop()?;
//! ```

use rfsynth_core::timing::WallClock;
use rfsynth_core::types::IQSample;
use std::collections::HashMap;

pub mod sim;
pub mod uhd;

pub use crate::device::{ChannelSettings, RadioError, RadioResult, RadioRole, RadioSetup};
pub use sim::{SimDriver, SimMedium, SimMediumConfig, SimRadio};
pub use uhd::UhdDriver;

/// A multi-channel radio front end.
pub trait RadioDevice: Send {
    /// Device name/description
    fn name(&self) -> &str;

    fn role(&self) -> RadioRole;

    fn num_channels(&self) -> usize;

    fn sample_rate(&self) -> f64;

    /// Apply front-end settings to one channel.
    fn configure_channel(&mut self, channel: usize, settings: &ChannelSettings)
        -> RadioResult<()>;

    /// Align the device clock with host wall-clock time.
    fn set_time_now(&mut self) -> RadioResult<()>;

    /// Start streaming immediately (capture for receivers, burst for transmitters).
    fn start(&mut self) -> RadioResult<()>;

    /// Block until the current capture window or burst has completed.
    fn wait(&mut self) -> RadioResult<()>;

    fn stop(&mut self) -> RadioResult<()>;

    /// Load the burst a transmit channel sends on the next start.
    fn set_channel_payload(&mut self, channel: usize, samples: &[IQSample]) -> RadioResult<()>;

    /// Samples captured on a receive channel during the last window.
    fn get_channel_capture(&self, channel: usize) -> RadioResult<Vec<IQSample>>;

    /// Start at an absolute device time.
    fn timed_start(&mut self, at: WallClock) -> RadioResult<()>;

    /// Retune one channel at an absolute device time.
    fn timed_retune(&mut self, frequency: f64, at: WallClock, channel: usize) -> RadioResult<()>;
}

/// Driver factory for creating devices.
pub trait DeviceDriver: Send + Sync {
    /// Driver name used as the URI scheme (e.g. "uhd", "sim").
    fn name(&self) -> &str;

    /// Open a device from driver arguments.
    fn create(&self, args: &str, setup: &RadioSetup) -> RadioResult<Box<dyn RadioDevice>>;
}

/// Parse `key=value` pairs separated by commas.
pub fn parse_args(args: &str) -> HashMap<String, String> {
    let mut result = HashMap::new();
    for part in args.split(',') {
        if let Some(pos) = part.find('=') {
            let key = part[..pos].trim().to_string();
            let value = part[pos + 1..].trim().to_string();
            result.insert(key, value);
        }
    }
    result
}

/// Registry of available device drivers.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: Vec<Box<dyn DeviceDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self {
            drivers: Vec::new(),
        }
    }

    /// Register a driver, replacing any driver of the same name.
    pub fn register(&mut self, driver: Box<dyn DeviceDriver>) {
        self.drivers.retain(|d| d.name() != driver.name());
        self.drivers.push(driver);
    }

    pub fn get(&self, name: &str) -> Option<&dyn DeviceDriver> {
        self.drivers
            .iter()
            .find(|d| d.name() == name)
            .map(|d| d.as_ref())
    }

    pub fn list(&self) -> Vec<&str> {
        self.drivers.iter().map(|d| d.name()).collect()
    }

    /// Create a device from a connection string.
    ///
    /// Format: "driver://args" (e.g. "uhd://addr=192.168.10.2", "sim://")
    pub fn create(&self, uri: &str, setup: &RadioSetup) -> RadioResult<Box<dyn RadioDevice>> {
        let Some((driver_name, args)) = uri.split_once("://") else {
            return Err(RadioError::ConfigError(format!(
                "Invalid device URI '{}'. Use 'driver://args'",
                uri
            )));
        };

        let driver = self
            .get(driver_name)
            .ok_or_else(|| RadioError::DeviceNotFound(format!("Unknown driver: {}", driver_name)))?;

        tracing::debug!(
            driver = driver_name,
            args,
            role = %setup.role,
            radio = setup.index,
            "Creating radio device"
        );
        driver.create(args, setup)
    }
}

/// Registry with the UHD driver and a simulated medium of its own.
pub fn create_default_registry() -> DriverRegistry {
    let mut registry = DriverRegistry::new();
    registry.register(Box::new(UhdDriver::new()));
    registry.register(Box::new(SimDriver::new(SimMedium::shared(
        SimMediumConfig::default(),
    ))));
    registry
}
