//! # Valid-Mode Cross-Correlation
//!
//! Computes the magnitude of the cross-correlation between a received
//! sequence `x` (length N) and a reference marker `m` (length M), evaluated
//! only at lags where the marker lies completely inside the received data:
//!
//! ```text
//! c[n] = | (1/M) · Σₖ x[n+k] · conj(m[k]) |      n = 0 ..= N-M
//! ```
//!
//! Captures are long (seconds at MS/s rates), so the sum is evaluated with
//! overlap-save block convolution in the frequency domain instead of directly:
//!
//! ```text
//!   x:  ├──── L ────┤
//!              ├──── L ────┤
//!                     ├──── L ────┤        hop S = L - M + 1
//!
//!   block:  IFFT( FFT(x[b..b+L]) · conj(FFT(m ⊕ zeros)) ) / L
//!   keep:   outputs 0 ..= L-M  (no circular wrap)
//! ```
//!
//! A received sequence shorter than the marker has no valid lag and produces
//! an empty trace.

use rustfft::{Fft, FftPlanner};
use std::fmt;
use std::sync::Arc;

use crate::types::IQSample;

/// Smallest FFT block used by the correlator.
pub const MIN_BLOCK_SIZE: usize = 4096;

/// Frequency-domain correlator for one reference marker.
///
/// The marker spectrum and FFT plans are built once, so the same correlator
/// can be reused across every capture that is searched for this marker.
pub struct Correlator {
    /// Marker length in samples
    marker_len: usize,
    /// FFT block size
    block_size: usize,
    /// Conjugated spectrum of the zero-padded marker
    marker_spectrum: Vec<IQSample>,
    fft_forward: Arc<dyn Fft<f64>>,
    fft_inverse: Arc<dyn Fft<f64>>,
    scratch: Vec<IQSample>,
}

impl fmt::Debug for Correlator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Correlator")
            .field("marker_len", &self.marker_len)
            .field("block_size", &self.block_size)
            .finish()
    }
}

impl Correlator {
    /// Build a correlator for `marker`.
    ///
    /// An empty marker yields a correlator that always returns an empty trace.
    pub fn new(marker: &[IQSample]) -> Self {
        let marker_len = marker.len();
        let block_size = (2 * marker_len).next_power_of_two().max(MIN_BLOCK_SIZE);

        let mut planner = FftPlanner::new();
        let fft_forward = planner.plan_fft_forward(block_size);
        let fft_inverse = planner.plan_fft_inverse(block_size);
        let scratch_len = fft_forward
            .get_inplace_scratch_len()
            .max(fft_inverse.get_inplace_scratch_len());
        let mut scratch = vec![IQSample::new(0.0, 0.0); scratch_len];

        let mut marker_spectrum = vec![IQSample::new(0.0, 0.0); block_size];
        marker_spectrum[..marker_len].copy_from_slice(marker);
        fft_forward.process_with_scratch(&mut marker_spectrum, &mut scratch);
        for bin in marker_spectrum.iter_mut() {
            *bin = bin.conj();
        }

        Self {
            marker_len,
            block_size,
            marker_spectrum,
            fft_forward,
            fft_inverse,
            scratch,
        }
    }

    pub fn marker_len(&self) -> usize {
        self.marker_len
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of valid lags for a received sequence of `signal_len` samples.
    pub fn output_len(&self, signal_len: usize) -> usize {
        if self.marker_len == 0 || signal_len < self.marker_len {
            0
        } else {
            signal_len - self.marker_len + 1
        }
    }

    /// Correlation magnitude at every valid lag, normalized by marker length.
    pub fn magnitudes(&mut self, signal: &[IQSample]) -> Vec<f64> {
        let out_len = self.output_len(signal.len());
        let mut trace = Vec::with_capacity(out_len);
        if out_len == 0 {
            return trace;
        }

        let hop = self.block_size - self.marker_len + 1;
        let scale = 1.0 / (self.block_size as f64 * self.marker_len as f64);
        let mut block = vec![IQSample::new(0.0, 0.0); self.block_size];

        let mut base = 0;
        while base < out_len {
            let end = (base + self.block_size).min(signal.len());
            block.fill(IQSample::new(0.0, 0.0));
            block[..end - base].copy_from_slice(&signal[base..end]);

            self.fft_forward
                .process_with_scratch(&mut block, &mut self.scratch);
            for (bin, reference) in block.iter_mut().zip(self.marker_spectrum.iter()) {
                *bin *= *reference;
            }
            self.fft_inverse
                .process_with_scratch(&mut block, &mut self.scratch);

            let keep = hop.min(out_len - base);
            trace.extend(block[..keep].iter().map(|c| c.norm() * scale));
            base += hop;
        }

        trace
    }
}

/// One-off correlation magnitude trace of `signal` against `marker`.
pub fn correlate_magnitude(signal: &[IQSample], marker: &[IQSample]) -> Vec<f64> {
    Correlator::new(marker).magnitudes(signal)
}
