//! # Noise-Floor Detector
//!
//! Finds a marker inside a capture and slices out the payload that follows it.
//!
//! ## Algorithm
//!
//! ```text
//! capture ──► |xcorr(capture, marker)| / M ──► trace
//!                                               │
//!   floor     = BIAS × mean(smallest 0.1% of trace)
//!   threshold = FACTOR × floor
//!   peak      = argmax { trace[n] : trace[n] > threshold }   (lowest n on ties)
//!                                               │
//!   payload   = capture[peak + M .. peak + M + expected_len]
//! ```
//!
//! The threshold tracks each capture's own noise floor, so receive gain and
//! ambient noise can differ from radio to radio without retuning.
//!
//! A missing or garbled marker is a normal outcome reported through
//! [`DetectionMiss`]. Only malformed input (an empty capture or a zero payload
//! length) is an error.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::correlation::Correlator;
use crate::marker::Marker;
use crate::types::{IQSample, SyncError, SyncResult};

/// Bias correction applied to the mean of the smallest trace magnitudes.
pub const NOISE_FLOOR_BIAS_CORRECTION: f64 = 62.0;

/// Detection threshold as a multiple of the noise floor.
pub const THRESHOLD_FACTOR: f64 = 200.0;

/// Fraction of the trace (smallest magnitudes) used to estimate the floor.
pub const NOISE_FLOOR_FRACTION: f64 = 0.001;

/// Why a capture produced no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetectionMiss {
    /// Nothing in the trace exceeded the threshold
    NoPeak,
    /// A peak was found but the payload window runs past the end of the capture
    PayloadTruncated,
}

impl fmt::Display for DetectionMiss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionMiss::NoPeak => write!(f, "no peak found"),
            DetectionMiss::PayloadTruncated => write!(f, "payload runs past end of capture"),
        }
    }
}

/// Result of one detection call.
#[derive(Debug, Clone)]
pub struct Detection {
    /// Correlation magnitude at every valid lag
    pub trace: Vec<f64>,
    /// Estimated noise floor of the trace
    pub noise_floor: f64,
    /// Magnitude a lag must exceed to count as a candidate
    pub threshold: f64,
    /// Lag of the selected marker peak, absent when nothing was found
    pub peak: Option<usize>,
    /// Payload sliced out of the capture
    pub payload: Option<Vec<IQSample>>,
    /// Payload start in seconds from the first captured sample
    pub start_time_s: Option<f64>,
    /// Payload stop in seconds from the first captured sample
    pub stop_time_s: Option<f64>,
    /// Reason no payload was produced
    pub miss: Option<DetectionMiss>,
}

impl Detection {
    fn missed(trace: Vec<f64>, noise_floor: f64, threshold: f64, miss: DetectionMiss) -> Self {
        Self {
            trace,
            noise_floor,
            threshold,
            peak: None,
            payload: None,
            start_time_s: None,
            stop_time_s: None,
            miss: Some(miss),
        }
    }

    /// True when a complete payload was recovered.
    pub fn is_found(&self) -> bool {
        self.payload.is_some()
    }

    /// Peak-to-threshold ratio, useful for judging detection margin.
    pub fn margin(&self) -> Option<f64> {
        let peak = self.peak?;
        if self.threshold > 0.0 {
            Some(self.trace[peak] / self.threshold)
        } else {
            None
        }
    }
}

/// Adaptive-threshold marker detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseFloorDetector {
    bias_correction: f64,
    threshold_factor: f64,
    floor_fraction: f64,
}

impl Default for NoiseFloorDetector {
    fn default() -> Self {
        Self {
            bias_correction: NOISE_FLOOR_BIAS_CORRECTION,
            threshold_factor: THRESHOLD_FACTOR,
            floor_fraction: NOISE_FLOOR_FRACTION,
        }
    }
}

impl NoiseFloorDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bias_correction(mut self, bias_correction: f64) -> Self {
        self.bias_correction = bias_correction;
        self
    }

    pub fn with_threshold_factor(mut self, threshold_factor: f64) -> Self {
        self.threshold_factor = threshold_factor;
        self
    }

    pub fn with_floor_fraction(mut self, floor_fraction: f64) -> Self {
        self.floor_fraction = floor_fraction;
        self
    }

    pub fn threshold_factor(&self) -> f64 {
        self.threshold_factor
    }

    /// Search `received` for `marker` and slice the `expected_len` samples
    /// that follow it.
    pub fn detect(
        &self,
        received: &[IQSample],
        marker: &Marker,
        expected_len: usize,
    ) -> SyncResult<Detection> {
        if received.is_empty() {
            return Err(SyncError::EmptyInput);
        }
        if expected_len == 0 {
            return Err(SyncError::InvalidPayloadLength(expected_len));
        }

        let reference = marker.samples();
        let trace = Correlator::new(&reference).magnitudes(received);
        let noise_floor = self.noise_floor(&trace);
        let threshold = self.threshold_factor * noise_floor;

        let Some(peak) = select_peak(&trace, threshold) else {
            tracing::debug!(
                seed = marker.seed(),
                noise_floor,
                threshold,
                "No correlation peak above threshold"
            );
            return Ok(Detection::missed(
                trace,
                noise_floor,
                threshold,
                DetectionMiss::NoPeak,
            ));
        };

        let start = peak + marker.len();
        let end = start + expected_len;
        if end > received.len() {
            tracing::debug!(
                seed = marker.seed(),
                peak,
                end,
                capture_len = received.len(),
                "Payload window runs past end of capture"
            );
            return Ok(Detection::missed(
                trace,
                noise_floor,
                threshold,
                DetectionMiss::PayloadTruncated,
            ));
        }

        let fs = marker.sample_rate();
        tracing::debug!(
            seed = marker.seed(),
            peak,
            magnitude = trace[peak],
            threshold,
            "Marker detected"
        );

        Ok(Detection {
            payload: Some(received[start..end].to_vec()),
            start_time_s: Some(start as f64 / fs),
            stop_time_s: Some(end as f64 / fs),
            peak: Some(peak),
            miss: None,
            trace,
            noise_floor,
            threshold,
        })
    }

    /// Bias-corrected mean of the smallest magnitudes in `trace`.
    ///
    /// Uses `max(1, round(fraction × len))` samples. An empty trace has a
    /// floor of zero.
    pub fn noise_floor(&self, trace: &[f64]) -> f64 {
        if trace.is_empty() {
            return 0.0;
        }
        let count = ((self.floor_fraction * trace.len() as f64).round() as usize)
            .clamp(1, trace.len());

        let mut sorted = trace.to_vec();
        sorted.select_nth_unstable_by(count - 1, |a, b| a.total_cmp(b));
        let mean = sorted[..count].iter().sum::<f64>() / count as f64;

        self.bias_correction * mean
    }
}

/// Index of the largest value strictly above `threshold`, lowest index on ties.
pub fn select_peak(trace: &[f64], threshold: f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (index, &value) in trace.iter().enumerate() {
        if value <= threshold {
            continue;
        }
        match best {
            Some((_, best_value)) if value <= best_value => {}
            _ => best = Some((index, value)),
        }
    }
    best.map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn zeros(n: usize) -> Vec<IQSample> {
        vec![IQSample::new(0.0, 0.0); n]
    }

    fn payload(n: usize) -> Vec<IQSample> {
        (0..n)
            .map(|i| IQSample::from_polar(1.0, 0.3 * i as f64))
            .collect()
    }

    fn noise(n: usize, sigma: f64, seed: u64) -> Vec<IQSample> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, sigma).unwrap();
        (0..n)
            .map(|_| IQSample::new(normal.sample(&mut rng), normal.sample(&mut rng)))
            .collect()
    }

    #[test]
    fn test_round_trip_without_noise() {
        let marker = Marker::new(4242, 300, 2, 1e6).unwrap();
        let data = payload(500);

        let mut rx = zeros(700);
        rx.extend(marker.insert(&data).into_samples());
        rx.extend(zeros(900));

        let detection = NoiseFloorDetector::default()
            .detect(&rx, &marker, data.len())
            .unwrap();

        assert!(detection.is_found());
        assert_eq!(detection.peak, Some(700));
        assert_eq!(detection.payload.as_deref(), Some(&data[..]));
        assert!(detection.miss.is_none());

        let start = (700 + marker.len()) as f64 / 1e6;
        assert!((detection.start_time_s.unwrap() - start).abs() < 1e-12);
        assert!((detection.stop_time_s.unwrap() - (start + 500e-6)).abs() < 1e-12);
    }

    #[test]
    fn test_round_trip_in_noise() {
        let marker = Marker::new(17, 1000, 2, 1e6).unwrap();
        let data = payload(800);
        let signal = marker.insert(&data).scaled_to_peak(0.8);

        // Mostly quiet capture, as when the window is longer than the burst
        let mut rx = noise(20_000, 0.02, 5);
        for (i, s) in signal.samples().iter().enumerate() {
            rx[1500 + i] += *s;
        }

        let detection = NoiseFloorDetector::default()
            .detect(&rx, &marker, data.len())
            .unwrap();
        assert_eq!(detection.peak, Some(1500));
        assert_eq!(detection.payload.unwrap().len(), 800);
    }

    #[test]
    fn test_pure_noise_has_no_peak() {
        let marker = Marker::new(99, 128, 2, 1e6).unwrap();
        let rx = noise(20_000, 1.0, 3);

        let detection = NoiseFloorDetector::default().detect(&rx, &marker, 100).unwrap();

        assert!(!detection.is_found());
        assert_eq!(detection.peak, None);
        assert_eq!(detection.miss, Some(DetectionMiss::NoPeak));
        assert!(detection.noise_floor > 0.0);
        assert_eq!(detection.trace.len(), 20_000 - marker.len() + 1);
    }

    #[test]
    fn test_stronger_of_two_markers_is_selected() {
        let marker = Marker::new(8, 256, 2, 1e6).unwrap();
        let reference = marker.samples();
        let data = payload(64);

        let mut rx = zeros(1200);
        rx.extend(reference.iter().map(|s| *s * 0.5));
        rx.extend(zeros(300));
        let strong_at = rx.len();
        rx.extend(reference.iter().copied());
        rx.extend(data.iter().copied());
        rx.extend(zeros(1200));

        let detection = NoiseFloorDetector::default()
            .detect(&rx, &marker, data.len())
            .unwrap();

        assert_eq!(detection.peak, Some(strong_at));
        assert_eq!(detection.payload.as_deref(), Some(&data[..]));
    }

    #[test]
    fn test_select_peak_ties_take_lowest_index() {
        let trace = [0.1, 0.2, 5.0, 0.3, 9.0, 0.1, 9.0, 0.2];
        assert_eq!(select_peak(&trace, 1.0), Some(4));
        assert_eq!(select_peak(&trace, 9.0), None);
        assert_eq!(select_peak(&[], 0.0), None);
    }

    #[test]
    fn test_truncated_payload_is_a_miss() {
        let marker = Marker::new(5, 256, 2, 1e6).unwrap();
        let mut rx = zeros(600);
        rx.extend(marker.insert(&payload(50)).into_samples());

        let detection = NoiseFloorDetector::default().detect(&rx, &marker, 100).unwrap();

        assert!(!detection.is_found());
        assert!(detection.payload.is_none());
        assert_eq!(detection.miss, Some(DetectionMiss::PayloadTruncated));
    }

    #[test]
    fn test_capture_shorter_than_marker() {
        let marker = Marker::new(5, 256, 2, 1e6).unwrap();
        let detection = NoiseFloorDetector::default()
            .detect(&payload(100), &marker, 10)
            .unwrap();
        assert!(detection.trace.is_empty());
        assert_eq!(detection.miss, Some(DetectionMiss::NoPeak));
    }

    #[test]
    fn test_malformed_inputs_are_errors() {
        let marker = Marker::new(5, 16, 2, 1e6).unwrap();
        let detector = NoiseFloorDetector::default();

        assert_eq!(
            detector.detect(&[], &marker, 10).unwrap_err(),
            SyncError::EmptyInput
        );
        assert_eq!(
            detector.detect(&payload(100), &marker, 0).unwrap_err(),
            SyncError::InvalidPayloadLength(0)
        );
    }

    #[test]
    fn test_noise_floor_uses_smallest_fraction() {
        let detector = NoiseFloorDetector::default();
        // 2000 samples → mean of the 2 smallest
        let mut trace = vec![10.0; 2000];
        trace[17] = 0.5;
        trace[1800] = 1.5;
        assert!((detector.noise_floor(&trace) - 62.0).abs() < 1e-9);

        // Short traces still use one sample
        assert!((detector.noise_floor(&[3.0, 2.0]) - 124.0).abs() < 1e-9);
        assert_eq!(detector.noise_floor(&[]), 0.0);
    }

    #[test]
    fn test_custom_threshold_factor() {
        let detector = NoiseFloorDetector::new().with_threshold_factor(10.0);
        assert_eq!(detector.threshold_factor(), 10.0);
    }
}
