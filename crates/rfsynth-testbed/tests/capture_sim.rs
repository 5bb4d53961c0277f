//! One-shot capture against the simulated medium.

use rfsynth_core::io::{read_cf32_file, write_cf32_file};
use rfsynth_core::{DetectionMiss, IQSample, PairKey};
use rfsynth_sim::hal::{SimDriver, SimMedium, SimMediumConfig};
use rfsynth_sim::DriverRegistry;
use rfsynth_testbed::config::{RxConfig, TestbedOptions, TxConfig};
use rfsynth_testbed::metadata::load_metadata;
use rfsynth_testbed::{CaptureOrchestrator, CaptureState, PairOutcome, TestbedError};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const FS: f64 = 100_000.0;
const PAYLOAD_LEN: usize = 2000;

fn sim_registry(medium: &Arc<SimMedium>) -> DriverRegistry {
    let mut registry = DriverRegistry::new();
    registry.register(Box::new(SimDriver::new(Arc::clone(medium))));
    registry
}

fn medium() -> Arc<SimMedium> {
    SimMedium::shared(SimMediumConfig {
        noise_std: 0.05,
        default_gain: 1.0,
        seed: 11,
    })
}

fn write_payload(dir: &Path, name: &str, phase_step: f64) {
    let samples: Vec<IQSample> = (0..PAYLOAD_LEN)
        .map(|i| IQSample::from_polar(0.5 + 0.5 * ((i % 7) as f64 / 7.0), i as f64 * phase_step))
        .collect();
    write_cf32_file(dir.join(format!("{}.cf32", name)), &samples).unwrap();
    std::fs::write(
        dir.join(format!("{}.json", name)),
        json!({"signal": name, "sample_rate": FS}).to_string(),
    )
    .unwrap();
}

fn tx_channel(dir: &Path, name: &str) -> serde_json::Value {
    json!({
        "antenna": "TX/RX",
        "gain": 0.7,
        "IQSTREAM_Params": {
            "frequency": 915e6,
            "file": dir.join(format!("{}.cf32", name)),
            "metadata": dir.join(format!("{}.json", name))
        }
    })
}

struct Fixture {
    dir: TempDir,
    tx: TxConfig,
    rx: RxConfig,
    save_dir: std::path::PathBuf,
}

impl Fixture {
    fn tx_file(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join(format!("{}.cf32", name))
    }
}

/// One tx radio with two channels, one rx radio with one channel.
fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    write_payload(dir.path(), "wifi", 0.37);
    write_payload(dir.path(), "lte", -1.1);
    let save_dir = dir.path().join("captures");
    std::fs::create_dir(&save_dir).unwrap();

    let tx: TxConfig = serde_json::from_value(json!({
        "preambleOnTimeMs": 40.0,
        "radios": [{
            "addrs": ["addr=192.168.10.2"],
            "sampleRate": FS,
            "channels": [tx_channel(dir.path(), "wifi"), tx_channel(dir.path(), "lte")]
        }]
    }))
    .unwrap();

    let rx: RxConfig = serde_json::from_value(json!({
        "save_dir": save_dir,
        "radios": [{
            "addrs": ["addr=192.168.10.3"],
            "sampleRate": FS,
            "numSecondsReceive": 0.3,
            "channels": [{"antenna": "RX2", "gain": 0.5, "IQSTREAM_Params": {"frequency": 915e6}}]
        }]
    }))
    .unwrap();

    Fixture {
        dir,
        tx,
        rx,
        save_dir,
    }
}

fn options() -> TestbedOptions {
    TestbedOptions {
        driver: "sim".to_string(),
        settle_delay_s: 0.05,
        seed: Some(42),
        ..Default::default()
    }
}

#[test]
fn test_lost_pair_does_not_stop_the_others() {
    let fixture = fixture();
    let medium = medium();
    medium.block_link(PairKey::new(0, 1, 0, 0)).unwrap();

    let mut orchestrator = CaptureOrchestrator::new(fixture.tx, fixture.rx, options());
    let report = orchestrator.run(&sim_registry(&medium)).unwrap();
    assert_eq!(orchestrator.state(), CaptureState::Done);

    assert_eq!(report.pairs.len(), 2);
    assert_eq!(report.seeds.len(), 2);
    assert_ne!(report.seeds[0], report.seeds[1]);
    assert_eq!(
        report.outcome(&PairKey::new(0, 1, 0, 0)),
        Some(&PairOutcome::Missed {
            miss: DetectionMiss::NoPeak
        })
    );
    assert_eq!(report.saved_count(), 1);

    let slice_path = fixture.save_dir.join("Tx0-0_Rx0-0_wifi.cf32");
    let metadata_path = fixture.save_dir.join("Tx0-0_Rx0-0_wifi.json");
    assert!(!fixture.save_dir.join("Tx0-1_Rx0-0_lte.cf32").exists());

    let slice = read_cf32_file(&slice_path).unwrap();
    assert_eq!(slice.len(), PAYLOAD_LEN);

    let metadata = load_metadata(&metadata_path).unwrap();
    assert_eq!(metadata["signal"], "wifi");
    assert_eq!(metadata["transmitter_config"]["channel"]["IQSTREAM_Params"]["frequency"], 915e6);
    assert_eq!(metadata["receiver_config"]["channel"]["antenna"], "RX2");
    assert!(metadata["receiver_config"].get("channels").is_none());

    // Both tx channels went on air, blocked or not
    let emissions = medium.emissions().unwrap();
    assert_eq!(emissions.len(), 2);
    assert!(emissions.iter().all(|e| e.len == 4000 + PAYLOAD_LEN));
}

#[test]
fn test_slice_is_aligned_with_payload() {
    let fixture = fixture();
    let medium = medium();
    // Keep the lte channel off the air entirely for a clean comparison
    medium.block_link(PairKey::new(0, 1, 0, 0)).unwrap();

    let original = read_cf32_file(
        fixture.tx.radios[0].channels[0]
            .iq_stream
            .file
            .as_ref()
            .unwrap(),
    )
    .unwrap();

    let mut orchestrator = CaptureOrchestrator::new(fixture.tx, fixture.rx, options());
    orchestrator.run(&sim_registry(&medium)).unwrap();
    let slice = read_cf32_file(fixture.save_dir.join("Tx0-0_Rx0-0_wifi.cf32")).unwrap();

    // Normalized correlation at zero lag is close to one only when aligned
    let dot: IQSample = slice.iter().zip(&original).map(|(s, o)| s * o.conj()).sum();
    let energy = |v: &[IQSample]| v.iter().map(|s| s.norm_sqr()).sum::<f64>().sqrt();
    let rho = dot.norm() / (energy(&slice) * energy(&original));
    assert!(rho > 0.9, "slice misaligned, rho = {}", rho);
}

#[test]
fn test_five_channels_rejected_before_start() {
    let mut fixture = fixture();
    let extra = fixture.tx.radios[0].channels[0].clone();
    for _ in 0..3 {
        fixture.tx.radios[0].channels.push(extra.clone());
    }
    assert_eq!(fixture.tx.radios[0].channels.len(), 5);

    let medium = medium();
    let mut orchestrator = CaptureOrchestrator::new(fixture.tx, fixture.rx, options());
    let err = orchestrator.run(&sim_registry(&medium)).unwrap_err();

    assert!(err.is_configuration());
    assert_eq!(orchestrator.state(), CaptureState::Failed);
    assert!(medium.emissions().unwrap().is_empty());
}

#[test]
fn test_mixed_sample_rates_rejected_before_start() {
    let mut fixture = fixture();
    let mut second = fixture.tx.radios[0].clone();
    second.sample_rate = 2.0 * FS;
    fixture.tx.radios.push(second);

    let medium = medium();
    let mut orchestrator = CaptureOrchestrator::new(fixture.tx, fixture.rx, options());
    let err = orchestrator.run(&sim_registry(&medium)).unwrap_err();

    assert!(err.is_configuration());
    assert!(medium.emissions().unwrap().is_empty());
}

#[test]
fn test_unreachable_radio_aborts_run() {
    let mut fixture = fixture();
    fixture.rx.radios[0].addrs = vec!["fail=unplugged".to_string()];

    let medium = medium();
    let mut orchestrator = CaptureOrchestrator::new(fixture.tx, fixture.rx, options());
    let err = orchestrator.run(&sim_registry(&medium)).unwrap_err();

    assert!(matches!(err, TestbedError::Hardware(_)));
    assert_eq!(orchestrator.state(), CaptureState::Failed);
    assert!(medium.emissions().unwrap().is_empty());
}

#[test]
fn test_unwritable_output_is_logged_not_fatal() {
    let fixture = fixture();
    let save_dir = fixture.save_dir.clone();
    let medium = medium();

    let mut orchestrator = CaptureOrchestrator::new(fixture.tx, fixture.rx, options());
    // Validation passes, then the directory disappears before slicing
    let registry = sim_registry(&medium);
    let handle = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(150));
        std::fs::remove_dir_all(&save_dir).unwrap();
    });
    let report = orchestrator.run(&registry).unwrap();
    handle.join().unwrap();

    assert_eq!(report.pairs.len(), 2);
    assert_eq!(report.saved_count(), 0);
    assert!(report
        .pairs
        .iter()
        .all(|p| matches!(p.outcome, PairOutcome::PersistenceFailed { .. })));
}

#[test]
fn test_both_tx_channels_on_air_together() {
    let fixture = fixture();
    let medium = medium();

    let mut orchestrator = CaptureOrchestrator::new(fixture.tx, fixture.rx, options());
    let report = orchestrator.run(&sim_registry(&medium)).unwrap();

    // Each marker is found in the sum of both bursts
    assert_eq!(report.saved_count(), 2);
    for name in ["Tx0-0_Rx0-0_wifi", "Tx0-1_Rx0-0_lte"] {
        let slice = read_cf32_file(fixture.save_dir.join(format!("{}.cf32", name))).unwrap();
        assert_eq!(slice.len(), PAYLOAD_LEN);
        assert!(fixture.save_dir.join(format!("{}.json", name)).exists());
    }

    let metadata = load_metadata(&fixture.save_dir.join("Tx0-1_Rx0-0_lte.json")).unwrap();
    assert_eq!(metadata["signal"], "lte");
}

#[test]
fn test_every_rx_channel_gets_its_own_slices() {
    let mut fixture = fixture();
    fixture.rx.radios[0].channels.push(
        serde_json::from_value(json!({
            "antenna": "TX/RX",
            "gain": 0.3,
            "IQSTREAM_Params": {"frequency": 915e6}
        }))
        .unwrap(),
    );
    let wifi_file = fixture.tx_file("wifi");
    let medium = medium();

    let mut orchestrator = CaptureOrchestrator::new(fixture.tx, fixture.rx, options());
    let report = orchestrator.run(&sim_registry(&medium)).unwrap();

    assert_eq!(report.pairs.len(), 4);
    assert_eq!(report.saved_count(), 4);
    // Two rx channels, one stop: one capture per channel
    assert_eq!(medium.capture_count().unwrap(), 2);

    let peak = |key: PairKey| match report.outcome(&key) {
        Some(PairOutcome::Saved { peak, .. }) => *peak,
        other => panic!("{} not saved: {:?}", key, other),
    };
    // Both channels opened their window together, so the marker lands at the same lag
    assert_eq!(peak(PairKey::new(0, 0, 0, 0)), peak(PairKey::new(0, 0, 0, 1)));

    for (m, antenna, gain) in [(0, "RX2", 0.5), (1, "TX/RX", 0.3)] {
        let base = format!("Tx0-0_Rx0-{}_wifi", m);
        let slice = read_cf32_file(fixture.save_dir.join(format!("{}.cf32", base))).unwrap();
        assert_eq!(slice.len(), PAYLOAD_LEN);

        let metadata = load_metadata(&fixture.save_dir.join(format!("{}.json", base))).unwrap();
        let rx_channel = &metadata["receiver_config"]["channel"];
        assert_eq!(rx_channel["antenna"], antenna);
        assert_eq!(rx_channel["gain"], gain);
        assert!(metadata["receiver_config"].get("channels").is_none());
        assert_eq!(
            metadata["transmitter_config"]["channel"]["IQSTREAM_Params"]["file"],
            json!(wifi_file)
        );
    }
    assert!(fixture.save_dir.join("Tx0-1_Rx0-1_lte.cf32").exists());
}

#[test]
fn test_failed_transmitter_start_stops_armed_receivers() {
    let mut fixture = fixture();
    fixture.tx.radios[0].addrs = vec!["fail_start=no-ref".to_string()];

    let medium = medium();
    let mut orchestrator = CaptureOrchestrator::new(fixture.tx, fixture.rx, options());
    let err = orchestrator.run(&sim_registry(&medium)).unwrap_err();

    assert!(matches!(err, TestbedError::Hardware(_)));
    assert_eq!(orchestrator.state(), CaptureState::Failed);
    assert!(medium.emissions().unwrap().is_empty());
    // The armed receiver was stopped, which closes its window
    assert_eq!(medium.capture_count().unwrap(), 1);
    assert_eq!(std::fs::read_dir(&fixture.save_dir).unwrap().count(), 0);
}
