//! Core types shared by the marker codec, detector and pairing registry.
//!
//! Samples are complex baseband I/Q values held in double precision while in
//! memory. On disk they are stored as interleaved little-endian float32 pairs
//! (see [`crate::io`]).

use num_complex::Complex64;

/// A single I/Q sample point
pub type IQSample = Complex64;

/// A buffer of I/Q samples
pub type IQBuffer = Vec<IQSample>;

/// Result type for marker, detection and pairing operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors raised for malformed inputs.
///
/// A marker that simply is not present in a capture is *not* an error; see
/// [`crate::detector::DetectionMiss`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Received sequence is empty")]
    EmptyInput,

    #[error("Expected payload length must be positive, got {0}")]
    InvalidPayloadLength(usize),
}

/// Scale a buffer in place so its largest magnitude equals `peak`.
///
/// All-zero buffers are left untouched.
pub fn normalize_peak(samples: &mut [IQSample], peak: f64) {
    let max = samples.iter().map(|s| s.norm()).fold(0.0_f64, f64::max);
    if max > 0.0 {
        let scale = peak / max;
        for s in samples.iter_mut() {
            *s *= scale;
        }
    }
}
