//! # Synchronization Marker Codec
//!
//! A marker is a burst of random antipodal QPSK symbols (±1 ± 1i), each held
//! for `samples_per_symbol` samples. It is prepended to every transmitted
//! payload so that a receiver can find the exact sample where the payload
//! begins.
//!
//! Markers are never stored. The transmitter and every receiver regenerate
//! the same sequence from `(seed, symbol_count, samples_per_symbol)` using a
//! locally seeded generator, so two calls with identical inputs always produce
//! bit-identical output and no global random state is involved.
//!
//! ```text
//!  ┌──────────── marker ─────────────┬──────── payload ────────┐
//!  │ s0 s0 s1 s1 s2 s2 ... sN-1 sN-1 │ p0 p1 p2 ...       pL-1 │
//!  └─────────────────────────────────┴─────────────────────────┘
//!    symbol_count × samples_per_symbol         payload_len
//! ```
//!
//! ## Example
//!
//! ```rust
//! use rfsynth_core::marker::{generate, MarkerParams};
//!
//! // 40 ms marker at 10 MS/s, 2 samples per symbol → 200 000 symbols
//! let params = MarkerParams::from_millis(40.0, 10e6).unwrap();
//! assert_eq!(params.symbol_count(), 200_000);
//!
//! let a = generate(12000, 64, 2).unwrap();
//! let b = generate(12000, 64, 2).unwrap();
//! assert_eq!(a, b);
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::types::{IQSample, SyncError, SyncResult};

/// Samples per marker symbol used throughout a test run.
pub const DEFAULT_SAMPLES_PER_SYMBOL: usize = 2;

/// Generate a marker sequence.
///
/// Symbols are drawn from a generator seeded with `seed`: first the in-phase
/// signs of every symbol, then the quadrature signs. Each symbol is then
/// repeated `samples_per_symbol` times.
pub fn generate(
    seed: u64,
    symbol_count: usize,
    samples_per_symbol: usize,
) -> SyncResult<Vec<IQSample>> {
    if symbol_count < 1 {
        return Err(SyncError::Configuration(
            "Marker needs at least one symbol".to_string(),
        ));
    }
    if samples_per_symbol < 1 {
        return Err(SyncError::Configuration(
            "Marker needs at least one sample per symbol".to_string(),
        ));
    }

    Ok(sequence(seed, symbol_count, samples_per_symbol))
}

fn sequence(seed: u64, symbol_count: usize, samples_per_symbol: usize) -> Vec<IQSample> {
    let mut rng = StdRng::seed_from_u64(seed);
    let in_phase: Vec<f64> = (0..symbol_count).map(|_| antipodal(&mut rng)).collect();
    let quadrature: Vec<f64> = (0..symbol_count).map(|_| antipodal(&mut rng)).collect();

    let mut samples = Vec::with_capacity(symbol_count * samples_per_symbol);
    for (&i, &q) in in_phase.iter().zip(quadrature.iter()) {
        let symbol = IQSample::new(i, q);
        samples.extend(std::iter::repeat(symbol).take(samples_per_symbol));
    }
    samples
}

#[inline]
fn antipodal<R: Rng>(rng: &mut R) -> f64 {
    if rng.gen::<bool>() {
        1.0
    } else {
        -1.0
    }
}

/// Marker parameters shared by every channel pair in a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkerParams {
    /// On-air duration of the marker in seconds
    pub on_time_s: f64,
    /// Samples per marker symbol
    pub samples_per_symbol: usize,
    /// Sample rate in Hz
    pub sample_rate: f64,
}

impl MarkerParams {
    /// Create and validate marker parameters.
    pub fn new(on_time_s: f64, samples_per_symbol: usize, sample_rate: f64) -> SyncResult<Self> {
        let params = Self {
            on_time_s,
            samples_per_symbol,
            sample_rate,
        };
        params.validate()?;
        Ok(params)
    }

    /// Parameters from an on-time in milliseconds with the default symbol width.
    pub fn from_millis(on_time_ms: f64, sample_rate: f64) -> SyncResult<Self> {
        Self::new(on_time_ms / 1000.0, DEFAULT_SAMPLES_PER_SYMBOL, sample_rate)
    }

    /// Number of marker symbols: `ceil(on_time × sample_rate / samples_per_symbol)`.
    pub fn symbol_count(&self) -> usize {
        (self.on_time_s * self.sample_rate / self.samples_per_symbol as f64).ceil() as usize
    }

    /// Check that the parameters describe a non-empty, finite marker.
    pub fn validate(&self) -> SyncResult<()> {
        if !self.on_time_s.is_finite() || self.on_time_s <= 0.0 {
            return Err(SyncError::Configuration(format!(
                "Marker on-time must be positive and finite, got {} s",
                self.on_time_s
            )));
        }
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(SyncError::Configuration(format!(
                "Sample rate must be positive and finite, got {}",
                self.sample_rate
            )));
        }
        if self.samples_per_symbol < 1 {
            return Err(SyncError::Configuration(
                "Marker needs at least one sample per symbol".to_string(),
            ));
        }
        if self.symbol_count() < 1 {
            return Err(SyncError::Configuration(
                "Marker on-time is shorter than one symbol".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the marker for a given seed.
    pub fn marker(&self, seed: u64) -> SyncResult<Marker> {
        self.validate()?;
        Marker::new(seed, self.symbol_count(), self.samples_per_symbol, self.sample_rate)
    }
}

/// A seeded synchronization marker.
///
/// Immutable once constructed. The sample sequence is regenerated on demand
/// by [`Marker::samples`].
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    seed: u64,
    symbol_count: usize,
    samples_per_symbol: usize,
    sample_rate: f64,
}

impl Marker {
    /// Create a marker, validating its shape.
    pub fn new(
        seed: u64,
        symbol_count: usize,
        samples_per_symbol: usize,
        sample_rate: f64,
    ) -> SyncResult<Self> {
        if symbol_count < 1 {
            return Err(SyncError::Configuration(
                "Marker needs at least one symbol".to_string(),
            ));
        }
        if samples_per_symbol < 1 {
            return Err(SyncError::Configuration(
                "Marker needs at least one sample per symbol".to_string(),
            ));
        }
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(SyncError::Configuration(format!(
                "Sample rate must be positive and finite, got {}",
                sample_rate
            )));
        }
        Ok(Self {
            seed,
            symbol_count,
            samples_per_symbol,
            sample_rate,
        })
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn symbol_count(&self) -> usize {
        self.symbol_count
    }

    pub fn samples_per_symbol(&self) -> usize {
        self.samples_per_symbol
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Marker length in samples.
    pub fn len(&self) -> usize {
        self.symbol_count * self.samples_per_symbol
    }

    /// Always false; a marker holds at least one symbol.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// On-air duration in seconds.
    pub fn duration_s(&self) -> f64 {
        self.len() as f64 / self.sample_rate
    }

    /// Regenerate the marker sample sequence.
    pub fn samples(&self) -> Vec<IQSample> {
        sequence(self.seed, self.symbol_count, self.samples_per_symbol)
    }

    /// Prepend the marker to a payload.
    pub fn insert(&self, payload: &[IQSample]) -> MarkedSignal {
        let mut samples = self.samples();
        let marker_len = samples.len();
        samples.extend_from_slice(payload);
        MarkedSignal {
            samples,
            marker_len,
            payload_len: payload.len(),
        }
    }
}

/// A payload with its marker prepended.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkedSignal {
    samples: Vec<IQSample>,
    marker_len: usize,
    payload_len: usize,
}

impl MarkedSignal {
    /// Marker followed by payload, no gap.
    pub fn samples(&self) -> &[IQSample] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<IQSample> {
        self.samples
    }

    pub fn marker_len(&self) -> usize {
        self.marker_len
    }

    /// Length of the original payload, needed again when slicing.
    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Rescale the combined signal so its peak magnitude equals `peak`.
    pub fn scaled_to_peak(mut self, peak: f64) -> Self {
        crate::types::normalize_peak(&mut self.samples, peak);
        self
    }
}
