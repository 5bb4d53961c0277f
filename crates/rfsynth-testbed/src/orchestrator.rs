//! # One-Shot Capture
//!
//! Runs one synchronized acquisition across every configured radio and
//! recovers a sample-aligned payload slice for every (tx, rx) channel pair.
//!
//! ```text
//! Idle ─► Preparing ─► Capturing ─► Stopping ─► Slicing ─► Done
//!   │         │            │            │           │
//!   └─────────┴────────────┴────────────┴───────────┴──► Failed
//! ```
//!
//! - **Preparing**: load each tx payload, normalize it to unit peak, prepend
//!   the tx channel's marker and rescale to the transmit headroom
//! - **Capturing**: arm every receiver, wait the settle delay, then start
//!   every transmitter
//! - **Stopping**: wait out each receive window, stop receivers, then
//!   transmitters
//! - **Slicing**: detect each pair's marker in its receiver's capture and
//!   save the slice with rewritten metadata
//!
//! A pair whose marker is not found, or whose files cannot be written, is
//! logged and skipped. Configuration and hardware faults abort the run.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rfsynth_core::io::{read_cf32_file, write_cf32_file};
use rfsynth_core::types::normalize_peak;
use rfsynth_core::{
    ChannelPairRegistry, DetectionMiss, IQSample, MarkerParams, NoiseFloorDetector, PairKey,
};
use rfsynth_sim::{DriverRegistry, RadioDevice, RadioRole};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{validate_capture_configs, RadioConfig, RxConfig, TestbedOptions, TxConfig};
use crate::error::{TestbedError, TestbedResult};
use crate::metadata::{rewrite_metadata, save_json, slice_path};

/// Phase of a capture run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CaptureState {
    Idle,
    Preparing,
    Capturing,
    Stopping,
    Slicing,
    Done,
    Failed,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureState::Idle => "idle",
            CaptureState::Preparing => "preparing",
            CaptureState::Capturing => "capturing",
            CaptureState::Stopping => "stopping",
            CaptureState::Slicing => "slicing",
            CaptureState::Done => "done",
            CaptureState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// What happened to one channel pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PairOutcome {
    Saved {
        slice: PathBuf,
        metadata: PathBuf,
        peak: usize,
        start_time_s: f64,
        stop_time_s: f64,
    },
    Missed { miss: DetectionMiss },
    /// The capture could not be searched (e.g. the receiver returned nothing)
    Unusable { reason: String },
    PersistenceFailed { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairReport {
    pub key: PairKey,
    #[serde(flatten)]
    pub outcome: PairOutcome,
}

/// Result of a completed capture run.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureReport {
    pub pairs: Vec<PairReport>,
    /// Seed of each tx channel's marker, flat tx channel order
    pub seeds: Vec<u64>,
    pub elapsed: Duration,
}

impl CaptureReport {
    pub fn saved(&self) -> impl Iterator<Item = &PairReport> {
        self.pairs
            .iter()
            .filter(|p| matches!(p.outcome, PairOutcome::Saved { .. }))
    }

    pub fn saved_count(&self) -> usize {
        self.saved().count()
    }

    pub fn missed_count(&self) -> usize {
        self.pairs
            .iter()
            .filter(|p| matches!(p.outcome, PairOutcome::Missed { .. }))
            .count()
    }

    pub fn outcome(&self, key: &PairKey) -> Option<&PairOutcome> {
        self.pairs.iter().find(|p| p.key == *key).map(|p| &p.outcome)
    }
}

/// A loaded tx channel ready to go on air.
struct TxChannel {
    iq_path: PathBuf,
    metadata_path: PathBuf,
    metadata: Value,
    payload_len: usize,
    signal: Vec<IQSample>,
}

struct OpenRadio {
    config_index: usize,
    device: Box<dyn RadioDevice>,
    started: bool,
}

impl OpenRadio {
    fn start(&mut self) -> TestbedResult<()> {
        self.device.start()?;
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> TestbedResult<()> {
        self.device.stop()?;
        self.started = false;
        Ok(())
    }
}

/// Drives one capture run.
pub struct CaptureOrchestrator {
    tx: TxConfig,
    rx: RxConfig,
    options: TestbedOptions,
    detector: NoiseFloorDetector,
    state: CaptureState,
}

impl CaptureOrchestrator {
    pub fn new(tx: TxConfig, rx: RxConfig, options: TestbedOptions) -> Self {
        Self {
            tx,
            rx,
            options,
            detector: NoiseFloorDetector::default(),
            state: CaptureState::Idle,
        }
    }

    /// Replace the marker detector.
    pub fn with_detector(mut self, detector: NoiseFloorDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    fn enter(&mut self, state: CaptureState) {
        debug!(from = %self.state, to = %state, "Capture state change");
        self.state = state;
    }

    /// Run the full capture. Not resumable: a finished or failed
    /// orchestrator refuses to run again.
    pub fn run(&mut self, drivers: &DriverRegistry) -> TestbedResult<CaptureReport> {
        if self.state != CaptureState::Idle {
            return Err(TestbedError::config(format!(
                "Capture already ran (state {})",
                self.state
            )));
        }

        let started = Instant::now();
        match self.execute(drivers) {
            Ok((pairs, seeds)) => {
                self.enter(CaptureState::Done);
                let elapsed = started.elapsed();
                let report = CaptureReport {
                    pairs,
                    seeds,
                    elapsed,
                };
                info!(
                    pairs = report.pairs.len(),
                    saved = report.saved_count(),
                    missed = report.missed_count(),
                    elapsed_s = elapsed.as_secs_f64(),
                    "Collect finished"
                );
                Ok(report)
            }
            Err(e) => {
                error!(state = %self.state, error = %e, "Capture failed");
                self.enter(CaptureState::Failed);
                Err(e)
            }
        }
    }

    fn execute(
        &mut self,
        drivers: &DriverRegistry,
    ) -> TestbedResult<(Vec<PairReport>, Vec<u64>)> {
        validate_capture_configs(&self.tx, &self.rx)?;
        self.log_radio_settings();

        self.enter(CaptureState::Preparing);
        let sample_rate = self.tx.radios[0].sample_rate;
        let on_time_ms = self.tx.preamble_on_time_ms.unwrap_or_default();
        let params = MarkerParams::new(
            on_time_ms / 1000.0,
            self.options.samples_per_symbol,
            sample_rate,
        )?;

        let mut rng = match self.options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let registry = ChannelPairRegistry::with_random_seeds(
            &self.tx.channels_per_radio(),
            &self.rx.channels_per_radio(),
            params,
            &mut rng,
        )?;
        let seeds = (0..self.tx.radios.len())
            .flat_map(|i| (0..self.tx.radios[i].channels.len()).map(move |j| (i, j)))
            .filter_map(|(i, j)| registry.tx_seed(i, j))
            .collect();

        let tx_channels = self.prepare_tx_channels(&registry)?;

        let driver = self.options.driver.as_str();
        let mut receivers = open_radios(drivers, &self.rx.radios, RadioRole::Receive, driver)?;
        let mut transmitters = open_radios(drivers, &self.tx.radios, RadioRole::Transmit, driver)?;

        for radio in transmitters.iter_mut() {
            for (j, channel) in tx_channels[radio.config_index].iter().enumerate() {
                radio.device.set_channel_payload(j, &channel.signal)?;
            }
        }

        if let Err(e) = self.capture(&mut receivers, &mut transmitters) {
            stop_started(&mut receivers, RadioRole::Receive);
            stop_started(&mut transmitters, RadioRole::Transmit);
            return Err(e);
        }

        self.enter(CaptureState::Slicing);
        let mut pairs = Vec::with_capacity(registry.len());
        for rx_radio in receivers.iter() {
            let n = rx_radio.config_index;
            for m in 0..self.rx.radios[n].channels.len() {
                let capture = rx_radio.device.get_channel_capture(m)?;
                for (i, channels) in tx_channels.iter().enumerate() {
                    for (j, tx_channel) in channels.iter().enumerate() {
                        let key = PairKey::new(i, j, n, m);
                        let outcome = self.slice_pair(&registry, &key, &capture, tx_channel);
                        pairs.push(PairReport { key, outcome });
                    }
                }
            }
        }

        Ok((pairs, seeds))
    }

    /// Arm receivers, start transmitters after the settle delay, then stop
    /// everything once the receive windows have elapsed.
    fn capture(
        &mut self,
        receivers: &mut [OpenRadio],
        transmitters: &mut [OpenRadio],
    ) -> TestbedResult<()> {
        self.enter(CaptureState::Capturing);
        for radio in receivers.iter_mut() {
            radio.start()?;
        }
        info!(receivers = receivers.len(), "Receiving has begun");

        std::thread::sleep(self.options.settle_delay());

        for radio in transmitters.iter_mut() {
            radio.start()?;
        }
        info!(transmitters = transmitters.len(), "Transmitting has begun");

        self.enter(CaptureState::Stopping);
        for radio in receivers.iter_mut() {
            radio.device.wait()?;
            radio.stop()?;
        }
        info!("Stopped receiving");
        for radio in transmitters.iter_mut() {
            radio.stop()?;
        }
        info!("Stopped transmitting");
        Ok(())
    }

    fn log_radio_settings(&self) {
        for (role, radios) in [("tx", &self.tx.radios), ("rx", &self.rx.radios)] {
            for (index, radio) in radios.iter().enumerate() {
                info!(
                    role,
                    radio = index,
                    addrs = %radio.addrs.join(","),
                    sample_rate = radio.sample_rate,
                    master_clock_rate = ?radio.master_clock_rate,
                    subdev_spec = ?radio.subdev_spec,
                    "Radio settings"
                );
                for (channel_index, channel) in radio.channels.iter().enumerate() {
                    info!(
                        role,
                        radio = index,
                        channel = channel_index,
                        frequency = channel.iq_stream.frequency,
                        gain = channel.gain,
                        antenna = %channel.antenna,
                        "Channel settings"
                    );
                }
            }
        }
    }

    /// Load, normalize and mark every tx channel's payload.
    ///
    /// The marker is shared by every rx pairing of a tx channel, so one
    /// signal per tx channel covers all of them.
    fn prepare_tx_channels(
        &self,
        registry: &ChannelPairRegistry,
    ) -> TestbedResult<Vec<Vec<TxChannel>>> {
        let mut prepared = Vec::with_capacity(self.tx.radios.len());
        for (i, radio) in self.tx.radios.iter().enumerate() {
            let mut channels = Vec::with_capacity(radio.channels.len());
            for (j, channel) in radio.channels.iter().enumerate() {
                let (Some(iq_path), Some(metadata_path)) = (
                    channel.iq_stream.file.clone(),
                    channel.iq_stream.metadata.clone(),
                ) else {
                    return Err(TestbedError::config(format!(
                        "tx radio {} channel {} has no payload file",
                        i, j
                    )));
                };

                let mut payload =
                    read_cf32_file(&iq_path).map_err(|e| TestbedError::io(&iq_path, e))?;
                if payload.is_empty() {
                    return Err(TestbedError::config(format!(
                        "Payload {} is empty",
                        iq_path.display()
                    )));
                }
                normalize_peak(&mut payload, 1.0);
                let metadata = crate::metadata::load_metadata(&metadata_path)?;

                let key = PairKey::new(i, j, 0, 0);
                let marker = registry.marker(&key).ok_or_else(|| {
                    TestbedError::config(format!("No marker registered for {}", key))
                })?;
                let marked = marker.insert(&payload).scaled_to_peak(self.options.tx_headroom);
                debug!(
                    tx_radio = i,
                    tx_channel = j,
                    seed = marker.seed(),
                    marker_len = marked.marker_len(),
                    payload_len = marked.payload_len(),
                    path = %iq_path.display(),
                    "Prepared tx signal"
                );

                channels.push(TxChannel {
                    iq_path,
                    metadata_path,
                    metadata,
                    payload_len: marked.payload_len(),
                    signal: marked.into_samples(),
                });
            }
            prepared.push(channels);
        }
        Ok(prepared)
    }

    fn slice_pair(
        &self,
        registry: &ChannelPairRegistry,
        key: &PairKey,
        capture: &[IQSample],
        tx_channel: &TxChannel,
    ) -> PairOutcome {
        let Some(marker) = registry.marker(key) else {
            return PairOutcome::Unusable {
                reason: format!("no marker registered for {}", key),
            };
        };

        let detection = match self.detector.detect(capture, marker, tx_channel.payload_len) {
            Ok(detection) => detection,
            Err(e) => {
                warn!(pair = %key, error = %e, "Capture unusable for pair");
                return PairOutcome::Unusable {
                    reason: e.to_string(),
                };
            }
        };

        let (Some(peak), Some(payload)) = (detection.peak, detection.payload.as_ref()) else {
            let miss = detection.miss.unwrap_or(DetectionMiss::NoPeak);
            warn!(
                tx_radio = key.tx_radio,
                tx_channel = key.tx_channel,
                rx_radio = key.rx_radio,
                rx_channel = key.rx_channel,
                %miss,
                noise_floor = detection.noise_floor,
                threshold = detection.threshold,
                "No marker peak for pair"
            );
            return PairOutcome::Missed { miss };
        };

        debug!(
            pair = %key,
            peak,
            margin = ?detection.margin(),
            "Marker found"
        );

        let save_dir = &self.rx.save_dir;
        let slice = slice_path(save_dir, key, &tx_channel.iq_path);
        let metadata_out = slice_path(save_dir, key, &tx_channel.metadata_path);

        let persisted =
            rewrite_metadata(&tx_channel.metadata, key, &self.tx.radios, &self.rx.radios)
                .and_then(|updated| save_json(&metadata_out, &updated))
                .and_then(|()| {
                    write_cf32_file(&slice, payload)
                        .map_err(|e| TestbedError::persistence(&slice, e))
                });

        match persisted {
            Ok(()) => {
                info!(pair = %key, path = %slice.display(), "Saved slice");
                PairOutcome::Saved {
                    slice,
                    metadata: metadata_out,
                    peak,
                    start_time_s: detection.start_time_s.unwrap_or_default(),
                    stop_time_s: detection.stop_time_s.unwrap_or_default(),
                }
            }
            Err(e) => {
                let path = match &e {
                    TestbedError::Persistence { path, .. } | TestbedError::Json { path, .. } => {
                        path.clone()
                    }
                    _ => metadata_out,
                };
                error!(pair = %key, path = %path.display(), error = %e, "Could not save files");
                PairOutcome::PersistenceFailed {
                    path,
                    reason: e.to_string(),
                }
            }
        }
    }
}

fn open_radios(
    drivers: &DriverRegistry,
    radios: &[RadioConfig],
    role: RadioRole,
    driver: &str,
) -> TestbedResult<Vec<OpenRadio>> {
    let mut opened = Vec::with_capacity(radios.len());
    for (index, radio) in radios.iter().enumerate() {
        let setup = radio.setup(index, role);
        let mut device = drivers.create(&radio.device_uri(driver), &setup)?;
        for (channel, settings) in setup.channels.iter().enumerate() {
            device.configure_channel(channel, settings)?;
        }
        debug!(role = %role, radio = index, name = device.name(), "Radio opened");
        opened.push(OpenRadio {
            config_index: index,
            device,
            started: false,
        });
    }
    Ok(opened)
}

/// Stop every radio that is still running after a failed capture.
fn stop_started(radios: &mut [OpenRadio], role: RadioRole) {
    for radio in radios.iter_mut().filter(|r| r.started) {
        match radio.stop() {
            Ok(()) => debug!(role = %role, radio = radio.config_index, "Stopped after failure"),
            Err(e) => warn!(
                role = %role,
                radio = radio.config_index,
                error = %e,
                "Could not stop radio after failure"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn tx_config(on_time_ms: Option<f64>) -> TxConfig {
        let radio: RadioConfig = serde_json::from_value(serde_json::json!({
            "sampleRate": 1e6,
            "channels": [{"antenna": "TX/RX", "gain": 0.5, "IQSTREAM_Params": {"frequency": 915e6}}]
        }))
        .unwrap();
        TxConfig {
            radios: vec![radio],
            preamble_on_time_ms: on_time_ms,
            extra: Map::new(),
        }
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CaptureState::Slicing.to_string(), "slicing");
        assert_eq!(CaptureState::Failed.to_string(), "failed");
    }

    #[test]
    fn test_invalid_config_fails_before_preparing() {
        let dir = tempfile::tempdir().unwrap();
        let rx: RxConfig = serde_json::from_value(serde_json::json!({
            "save_dir": dir.path(),
            "radios": [{
                "sampleRate": 1e6,
                "numSecondsReceive": 0.1,
                "channels": [{"antenna": "RX2", "gain": 0.5, "IQSTREAM_Params": {"frequency": 915e6}}]
            }]
        }))
        .unwrap();

        let mut orchestrator =
            CaptureOrchestrator::new(tx_config(None), rx, TestbedOptions::default());
        let err = orchestrator
            .run(&rfsynth_sim::create_default_registry())
            .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(orchestrator.state(), CaptureState::Failed);

        // Not resumable
        assert!(orchestrator
            .run(&rfsynth_sim::create_default_registry())
            .is_err());
    }

    #[test]
    fn test_report_counts() {
        let report = CaptureReport {
            pairs: vec![
                PairReport {
                    key: PairKey::new(0, 0, 0, 0),
                    outcome: PairOutcome::Missed {
                        miss: DetectionMiss::NoPeak,
                    },
                },
                PairReport {
                    key: PairKey::new(0, 1, 0, 0),
                    outcome: PairOutcome::Saved {
                        slice: PathBuf::from("a"),
                        metadata: PathBuf::from("b"),
                        peak: 10,
                        start_time_s: 0.0,
                        stop_time_s: 1.0,
                    },
                },
            ],
            seeds: vec![1, 2],
            elapsed: Duration::from_millis(5),
        };
        assert_eq!(report.saved_count(), 1);
        assert_eq!(report.missed_count(), 1);
        assert!(matches!(
            report.outcome(&PairKey::new(0, 0, 0, 0)),
            Some(PairOutcome::Missed { .. })
        ));

        let json = serde_json::to_value(&report.pairs[1]).unwrap();
        assert_eq!(json["outcome"], "saved");
        assert_eq!(json["key"]["tx_channel"], 1);
    }
}
