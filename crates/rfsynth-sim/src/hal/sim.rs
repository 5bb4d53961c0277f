//! # Simulated Over-the-Air Medium
//!
//! Simulated radios share one [`SimMedium`]. Transmitters publish emissions
//! stamped with the wall-clock instant they go on air; receivers open a
//! capture window and, when stopped, read back everything that reached them
//! inside that window.
//!
//! ```text
//!  SimRadio(tx 0) ──emit──┐                 ┌──capture── SimRadio(rx 0)
//!  SimRadio(tx 1) ──emit──┼──► SimMedium ───┤
//!                         │   links, noise  └──capture── SimRadio(rx 1)
//! ```
//!
//! A capture is the sum of every emission whose link is open and whose
//! frequency lies within half the receiver sample rate of the receiver's
//! tuning, placed at its real arrival offset and scaled by the link gain,
//! plus seeded white Gaussian noise.
//!
//! Device arguments, for exercising fault handling:
//! - `fail=<reason>`: opening the device fails with a hardware error
//! - `fail_start=<reason>`: the device opens, but every start fails

use rfsynth_core::pairing::PairKey;
use rfsynth_core::timing::WallClock;
use rfsynth_core::types::IQSample;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, trace};

use super::{parse_args, DeviceDriver, RadioDevice};
use crate::channel::{Awgn, Link};
use crate::device::{ChannelSettings, RadioError, RadioResult, RadioRole, RadioSetup};

/// Medium-wide simulation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimMediumConfig {
    /// Noise standard deviation per I/Q component at every receiver
    pub noise_std: f64,
    /// Gain of links without an explicit setting
    pub default_gain: f64,
    /// Seed of the receiver noise
    pub seed: u64,
}

impl Default for SimMediumConfig {
    fn default() -> Self {
        Self {
            noise_std: 0.01,
            default_gain: 1.0,
            seed: 0,
        }
    }
}

/// What went on air, as recorded by the medium.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmissionRecord {
    pub radio: usize,
    pub channel: usize,
    /// Carrier frequency in Hz
    pub frequency: f64,
    /// Instant the first sample went on air
    pub scheduled: WallClock,
    /// Burst length in samples
    pub len: usize,
    pub sample_rate: f64,
}

impl EmissionRecord {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.len as f64 / self.sample_rate)
    }
}

#[derive(Debug)]
struct Emission {
    record: EmissionRecord,
    samples: Arc<Vec<IQSample>>,
    /// Transmitter stopped at this instant; later samples never went out
    cutoff: Option<WallClock>,
}

#[derive(Debug, Default)]
struct MediumState {
    emissions: Vec<Emission>,
    links: HashMap<PairKey, Link>,
    captures: u64,
}

/// Shared propagation medium for simulated radios.
#[derive(Debug)]
pub struct SimMedium {
    config: SimMediumConfig,
    state: Mutex<MediumState>,
}

impl SimMedium {
    pub fn new(config: SimMediumConfig) -> Self {
        Self {
            config,
            state: Mutex::new(MediumState::default()),
        }
    }

    pub fn shared(config: SimMediumConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    pub fn config(&self) -> &SimMediumConfig {
        &self.config
    }

    fn state(&self) -> RadioResult<MutexGuard<'_, MediumState>> {
        self.state
            .lock()
            .map_err(|_| RadioError::HardwareError("simulated medium lock poisoned".to_string()))
    }

    /// Set the propagation path of one channel pair.
    pub fn set_link(&self, key: PairKey, link: Link) -> RadioResult<()> {
        self.state()?.links.insert(key, link);
        Ok(())
    }

    /// Stop anything propagating over one channel pair.
    pub fn block_link(&self, key: PairKey) -> RadioResult<()> {
        debug!(%key, "Blocking simulated link");
        self.set_link(key, Link::blocked())
    }

    /// Every emission so far, in the order transmitters started.
    pub fn emissions(&self) -> RadioResult<Vec<EmissionRecord>> {
        Ok(self
            .state()?
            .emissions
            .iter()
            .map(|e| e.record.clone())
            .collect())
    }

    /// Number of receive captures taken so far (one per rx channel per stop).
    pub fn capture_count(&self) -> RadioResult<u64> {
        Ok(self.state()?.captures)
    }

    /// Forget all emissions.
    pub fn clear(&self) -> RadioResult<()> {
        self.state()?.emissions.clear();
        Ok(())
    }

    fn emit(&self, record: EmissionRecord, samples: Arc<Vec<IQSample>>) -> RadioResult<()> {
        trace!(
            radio = record.radio,
            channel = record.channel,
            frequency = record.frequency,
            len = record.len,
            "Emission on air"
        );
        self.state()?.emissions.push(Emission {
            record,
            samples,
            cutoff: None,
        });
        Ok(())
    }

    fn cut_off(&self, radio: usize, channels: &[usize], at: WallClock) -> RadioResult<()> {
        let mut state = self.state()?;
        for emission in state.emissions.iter_mut().filter(|e| {
            e.record.radio == radio && channels.contains(&e.record.channel) && e.cutoff.is_none()
        }) {
            emission.cutoff = Some(at);
        }
        Ok(())
    }

    fn capture(
        &self,
        rx_radio: usize,
        rx_channel: usize,
        frequency: f64,
        sample_rate: f64,
        window_start: WallClock,
        len: usize,
    ) -> RadioResult<Vec<IQSample>> {
        let mut state = self.state()?;
        state.captures += 1;
        let noise_seed = self.config.seed.wrapping_add(state.captures);

        let mut out = vec![IQSample::new(0.0, 0.0); len];
        for emission in &state.emissions {
            let record = &emission.record;
            if (record.frequency - frequency).abs() > sample_rate / 2.0 {
                continue;
            }
            let key = PairKey::new(record.radio, record.channel, rx_radio, rx_channel);
            let link = state
                .links
                .get(&key)
                .copied()
                .unwrap_or_else(|| Link::with_gain(self.config.default_gain));
            if link.blocked {
                continue;
            }

            let offset_ns =
                record.scheduled.as_nanos() as i128 - window_start.as_nanos() as i128;
            let offset_s = offset_ns as f64 / 1e9;
            let offset = (offset_s * sample_rate).round() as i64;
            let sent = match emission.cutoff {
                Some(cutoff) => {
                    let on_air = cutoff.elapsed_since(&record.scheduled).as_secs_f64();
                    ((on_air * record.sample_rate).floor() as usize).min(emission.samples.len())
                }
                None => emission.samples.len(),
            };

            for (i, sample) in emission.samples[..sent].iter().enumerate() {
                let t = offset + i as i64;
                if t < 0 {
                    continue;
                }
                let Some(slot) = out.get_mut(t as usize) else {
                    break;
                };
                *slot += *sample * link.gain;
            }
        }
        drop(state);

        Awgn::new(self.config.noise_std, noise_seed)?.add_to(&mut out);
        Ok(out)
    }
}

#[derive(Debug, Clone)]
struct ChannelState {
    settings: ChannelSettings,
    payload: Option<Arc<Vec<IQSample>>>,
    capture: Option<Vec<IQSample>>,
    /// Pending timed retunes (instant, frequency)
    retunes: Vec<(WallClock, f64)>,
}

/// A simulated multi-channel radio attached to a [`SimMedium`].
#[derive(Debug)]
pub struct SimRadio {
    name: String,
    setup: RadioSetup,
    medium: Arc<SimMedium>,
    channels: Vec<ChannelState>,
    running: bool,
    clock_set: bool,
    /// Receive window start or burst start
    started_at: Option<WallClock>,
    /// Instant the current window or burst ends
    busy_until: Option<WallClock>,
    start_fault: Option<String>,
}

impl SimRadio {
    pub fn new(setup: RadioSetup, medium: Arc<SimMedium>) -> RadioResult<Self> {
        if setup.channels.is_empty() {
            return Err(RadioError::ConfigError(format!(
                "{} radio {} has no channels",
                setup.role, setup.index
            )));
        }
        if setup.role == RadioRole::Receive && setup.capture_len() == 0 {
            return Err(RadioError::ConfigError(format!(
                "rx radio {} needs a positive capture window",
                setup.index
            )));
        }

        let channels = setup
            .channels
            .iter()
            .map(|settings| ChannelState {
                settings: settings.clone(),
                payload: None,
                capture: None,
                retunes: Vec::new(),
            })
            .collect();

        Ok(Self {
            name: format!("sim-{}{}", setup.role, setup.index),
            setup,
            medium,
            channels,
            running: false,
            clock_set: false,
            started_at: None,
            busy_until: None,
            start_fault: None,
        })
    }

    /// Make every start of this radio fail with a hardware error.
    pub fn with_start_fault(mut self, reason: impl Into<String>) -> Self {
        self.start_fault = Some(reason.into());
        self
    }

    fn channel_mut(&mut self, channel: usize) -> RadioResult<&mut ChannelState> {
        let available = self.channels.len();
        self.channels
            .get_mut(channel)
            .ok_or(RadioError::InvalidChannel { channel, available })
    }

    fn require_clock(&self) -> RadioResult<()> {
        if self.clock_set {
            Ok(())
        } else {
            Err(RadioError::ConfigError(format!(
                "{}: device time not set, call set_time_now first",
                self.name
            )))
        }
    }

    fn begin(&mut self, at: WallClock) -> RadioResult<()> {
        if let Some(reason) = &self.start_fault {
            return Err(RadioError::HardwareError(format!(
                "{}: start failed ({})",
                self.name, reason
            )));
        }
        match self.setup.role {
            RadioRole::Receive => {
                for channel in self.channels.iter_mut() {
                    channel.capture = None;
                }
                let window = Duration::from_secs_f64(
                    self.setup.capture_len() as f64 / self.setup.sample_rate,
                );
                self.busy_until = Some(at + window);
            }
            RadioRole::Transmit => {
                let mut longest = 0;
                for (index, channel) in self.channels.iter_mut().enumerate() {
                    apply_retunes(channel, at);
                    let Some(payload) = channel.payload.clone() else {
                        continue;
                    };
                    longest = longest.max(payload.len());
                    self.medium.emit(
                        EmissionRecord {
                            radio: self.setup.index,
                            channel: index,
                            frequency: channel.settings.frequency,
                            scheduled: at,
                            len: payload.len(),
                            sample_rate: self.setup.sample_rate,
                        },
                        payload,
                    )?;
                }
                let burst = Duration::from_secs_f64(longest as f64 / self.setup.sample_rate);
                self.busy_until = Some(at + burst);
            }
        }
        self.started_at = Some(at);
        self.running = true;
        Ok(())
    }
}

fn apply_retunes(channel: &mut ChannelState, at: WallClock) {
    channel.retunes.sort_by_key(|(when, _)| *when);
    let due = channel.retunes.iter().take_while(|(when, _)| *when <= at).count();
    if let Some(&(_, frequency)) = channel.retunes[..due].last() {
        channel.settings.frequency = frequency;
    }
    channel.retunes.drain(..due);
}

impl RadioDevice for SimRadio {
    fn name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> RadioRole {
        self.setup.role
    }

    fn num_channels(&self) -> usize {
        self.channels.len()
    }

    fn sample_rate(&self) -> f64 {
        self.setup.sample_rate
    }

    fn configure_channel(&mut self, channel: usize, settings: &ChannelSettings) -> RadioResult<()> {
        self.channel_mut(channel)?.settings = settings.clone();
        Ok(())
    }

    fn set_time_now(&mut self) -> RadioResult<()> {
        self.clock_set = true;
        Ok(())
    }

    fn start(&mut self) -> RadioResult<()> {
        self.begin(WallClock::now())
    }

    fn wait(&mut self) -> RadioResult<()> {
        if !self.running {
            return Err(RadioError::NotStarted);
        }
        if let Some(until) = self.busy_until {
            until.sleep_until();
        }
        Ok(())
    }

    fn stop(&mut self) -> RadioResult<()> {
        if !self.running {
            return Ok(());
        }
        self.running = false;
        let now = WallClock::now();

        match self.setup.role {
            RadioRole::Transmit => {
                let loaded: Vec<usize> = self
                    .channels
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.payload.is_some())
                    .map(|(i, _)| i)
                    .collect();
                self.medium.cut_off(self.setup.index, &loaded, now)
            }
            RadioRole::Receive => {
                let Some(window_start) = self.started_at else {
                    return Err(RadioError::NotStarted);
                };
                let len = self.setup.capture_len();
                for index in 0..self.channels.len() {
                    let capture = self.medium.capture(
                        self.setup.index,
                        index,
                        self.channels[index].settings.frequency,
                        self.setup.sample_rate,
                        window_start,
                        len,
                    )?;
                    self.channels[index].capture = Some(capture);
                }
                Ok(())
            }
        }
    }

    fn set_channel_payload(&mut self, channel: usize, samples: &[IQSample]) -> RadioResult<()> {
        if self.setup.role != RadioRole::Transmit {
            return Err(RadioError::Unsupported(format!(
                "{} cannot transmit",
                self.name
            )));
        }
        self.channel_mut(channel)?.payload = Some(Arc::new(samples.to_vec()));
        Ok(())
    }

    fn get_channel_capture(&self, channel: usize) -> RadioResult<Vec<IQSample>> {
        let state = self.channels.get(channel).ok_or(RadioError::InvalidChannel {
            channel,
            available: self.channels.len(),
        })?;
        state.capture.clone().ok_or(RadioError::NotStarted)
    }

    fn timed_start(&mut self, at: WallClock) -> RadioResult<()> {
        self.require_clock()?;
        self.begin(at)
    }

    fn timed_retune(&mut self, frequency: f64, at: WallClock, channel: usize) -> RadioResult<()> {
        self.require_clock()?;
        self.channel_mut(channel)?.retunes.push((at, frequency));
        Ok(())
    }
}

/// Driver that opens [`SimRadio`]s on a shared medium.
#[derive(Debug, Clone)]
pub struct SimDriver {
    medium: Arc<SimMedium>,
}

impl SimDriver {
    pub fn new(medium: Arc<SimMedium>) -> Self {
        Self { medium }
    }

    pub fn medium(&self) -> &Arc<SimMedium> {
        &self.medium
    }
}

impl DeviceDriver for SimDriver {
    fn name(&self) -> &str {
        "sim"
    }

    fn create(&self, args: &str, setup: &RadioSetup) -> RadioResult<Box<dyn RadioDevice>> {
        let args = parse_args(args);
        if let Some(reason) = args.get("fail") {
            return Err(RadioError::HardwareError(format!(
                "simulated {} radio {} unreachable ({})",
                setup.role, setup.index, reason
            )));
        }
        let mut radio = SimRadio::new(setup.clone(), Arc::clone(&self.medium))?;
        if let Some(reason) = args.get("fail_start") {
            radio = radio.with_start_fault(reason.as_str());
        }
        Ok(Box::new(radio))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FS: f64 = 100_000.0;

    fn quiet_medium() -> Arc<SimMedium> {
        SimMedium::shared(SimMediumConfig {
            noise_std: 0.0,
            ..Default::default()
        })
    }

    fn tx_setup(index: usize, channels: usize) -> RadioSetup {
        let mut setup = RadioSetup::new(index, RadioRole::Transmit, FS);
        for _ in 0..channels {
            setup = setup.with_channel(ChannelSettings::default());
        }
        setup
    }

    fn rx_setup(index: usize, seconds: f64) -> RadioSetup {
        RadioSetup::new(index, RadioRole::Receive, FS)
            .with_capture_seconds(seconds)
            .with_channel(ChannelSettings::default())
    }

    fn burst(len: usize) -> Vec<IQSample> {
        vec![IQSample::new(1.0, 0.0); len]
    }

    #[test]
    fn test_capture_places_emission_at_arrival_offset() {
        let medium = quiet_medium();
        let mut rx = SimRadio::new(rx_setup(0, 0.1), Arc::clone(&medium)).unwrap();
        let mut tx = SimRadio::new(tx_setup(0, 1), Arc::clone(&medium)).unwrap();
        tx.set_time_now().unwrap();
        rx.set_time_now().unwrap();

        let window = WallClock::now();
        rx.timed_start(window).unwrap();
        tx.set_channel_payload(0, &burst(100)).unwrap();
        // 0.02 s into the window → sample 2000
        tx.timed_start(window + Duration::from_millis(20)).unwrap();
        rx.stop().unwrap();

        let capture = rx.get_channel_capture(0).unwrap();
        assert_eq!(capture.len(), 10_000);
        assert_eq!(capture[1999], IQSample::new(0.0, 0.0));
        assert_eq!(capture[2000], IQSample::new(1.0, 0.0));
        assert_eq!(capture[2099], IQSample::new(1.0, 0.0));
        assert_eq!(capture[2100], IQSample::new(0.0, 0.0));
    }

    #[test]
    fn test_blocked_link_and_frequency_mismatch() {
        let medium = quiet_medium();
        medium.block_link(PairKey::new(0, 1, 0, 0)).unwrap();

        let mut tx = SimRadio::new(tx_setup(0, 3), Arc::clone(&medium)).unwrap();
        tx.configure_channel(
            2,
            &ChannelSettings {
                frequency: 2.4e9,
                ..Default::default()
            },
        )
        .unwrap();
        for channel in 0..3 {
            tx.set_channel_payload(channel, &burst(10)).unwrap();
        }

        let mut rx = SimRadio::new(rx_setup(0, 0.01), Arc::clone(&medium)).unwrap();
        rx.set_time_now().unwrap();
        tx.set_time_now().unwrap();
        let window = WallClock::now();
        rx.timed_start(window).unwrap();
        tx.timed_start(window).unwrap();
        rx.stop().unwrap();

        // Only channel 0 reaches the receiver
        let capture = rx.get_channel_capture(0).unwrap();
        assert_eq!(capture[0], IQSample::new(1.0, 0.0));
        assert_eq!(medium.emissions().unwrap().len(), 3);
    }

    #[test]
    fn test_timed_retune_applies_at_instant() {
        let medium = quiet_medium();
        let mut tx = SimRadio::new(tx_setup(1, 1), Arc::clone(&medium)).unwrap();
        tx.set_time_now().unwrap();
        tx.set_channel_payload(0, &burst(5)).unwrap();

        let t0 = WallClock::from_nanos(1_000_000_000);
        tx.timed_retune(433e6, t0 + Duration::from_secs(1), 0).unwrap();
        tx.timed_start(t0).unwrap();
        tx.timed_start(t0 + Duration::from_secs(1)).unwrap();

        let log = medium.emissions().unwrap();
        assert_eq!(log[0].frequency, 915e6);
        assert_eq!(log[1].frequency, 433e6);
        assert_eq!(log[1].radio, 1);
        assert_eq!(log[1].scheduled, t0 + Duration::from_secs(1));
    }

    #[test]
    fn test_timed_commands_need_clock() {
        let mut tx = SimRadio::new(tx_setup(0, 1), quiet_medium()).unwrap();
        assert!(matches!(
            tx.timed_start(WallClock::now()),
            Err(RadioError::ConfigError(_))
        ));
    }

    #[test]
    fn test_wait_blocks_until_window_ends() {
        let mut rx = SimRadio::new(rx_setup(0, 0.03), quiet_medium()).unwrap();
        assert_eq!(rx.wait(), Err(RadioError::NotStarted));

        let before = WallClock::now();
        rx.start().unwrap();
        rx.wait().unwrap();
        rx.stop().unwrap();
        assert!(WallClock::now() - before >= Duration::from_millis(30));
    }

    #[test]
    fn test_capture_before_start_is_error() {
        let rx = SimRadio::new(rx_setup(0, 0.01), quiet_medium()).unwrap();
        assert_eq!(rx.get_channel_capture(0), Err(RadioError::NotStarted));
        assert!(matches!(
            rx.get_channel_capture(3),
            Err(RadioError::InvalidChannel { channel: 3, .. })
        ));
    }

    #[test]
    fn test_receiver_cannot_transmit() {
        let mut rx = SimRadio::new(rx_setup(0, 0.01), quiet_medium()).unwrap();
        assert!(matches!(
            rx.set_channel_payload(0, &burst(1)),
            Err(RadioError::Unsupported(_))
        ));
    }

    #[test]
    fn test_driver_fault_injection() {
        let driver = SimDriver::new(quiet_medium());
        assert!(matches!(
            driver.create("fail=unplugged", &tx_setup(0, 1)),
            Err(RadioError::HardwareError(_))
        ));
        assert!(driver.create("", &tx_setup(0, 1)).is_ok());

        let mut radio = driver.create("fail_start=no-ref", &tx_setup(0, 1)).unwrap();
        assert!(matches!(radio.start(), Err(RadioError::HardwareError(_))));
        assert!(radio.set_time_now().is_ok());
        assert!(matches!(
            radio.timed_start(WallClock::now()),
            Err(RadioError::HardwareError(_))
        ));
    }

    #[test]
    fn test_noise_added_to_capture() {
        let medium = SimMedium::shared(SimMediumConfig {
            noise_std: 0.1,
            ..Default::default()
        });
        let mut rx = SimRadio::new(rx_setup(0, 0.01), Arc::clone(&medium)).unwrap();
        rx.start().unwrap();
        rx.stop().unwrap();
        let capture = rx.get_channel_capture(0).unwrap();
        assert!(capture.iter().any(|s| s.norm() > 0.0));
        assert_eq!(medium.capture_count().unwrap(), 1);
    }
}
