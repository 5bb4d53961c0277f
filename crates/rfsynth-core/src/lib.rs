//! # rfsynth Core
//!
//! Signal-level building blocks for over-the-air test campaigns that run many
//! independently clocked transmit and receive radio channels at once.
//!
//! ## Overview
//!
//! Every transmitted waveform is prefixed with a pseudo-random synchronization
//! marker. Each receiver regenerates the marker from its seed, correlates it
//! against what it captured and slices out the payload at sample accuracy,
//! regardless of propagation delay or when the capture window opened.
//!
//! - **Marker Codec** ([`marker`]): seeded antipodal QPSK marker generation and insertion
//! - **Correlation** ([`correlation`]): FFT-based valid-mode cross-correlation
//! - **Detection** ([`detector`]): adaptive noise-floor thresholding and payload slicing
//! - **Pairing** ([`pairing`]): one marker per (tx radio, tx channel, rx radio, rx channel)
//! - **Timing** ([`timing`]): wall clock and the shared mission epoch
//! - **I/O** ([`io`]): little-endian complex float32 sample files
//!
//! ## Signal Flow
//!
//! ```text
//! TX: payload → normalize → Marker::insert → [marker | payload] → radio
//! RX: radio → capture → correlate(marker) → noise floor → threshold → slice
//! ```
//!
//! ## Example
//!
//! ```rust
//! use rfsynth_core::{Marker, NoiseFloorDetector, IQSample};
//!
//! let marker = Marker::new(1234, 256, 2, 1e6).unwrap();
//! let payload: Vec<IQSample> = (0..100).map(|i| IQSample::from_polar(1.0, 0.1 * i as f64)).collect();
//!
//! let mut rx = marker.insert(&payload).into_samples();
//! rx.extend(std::iter::repeat(IQSample::new(0.0, 0.0)).take(1024));
//!
//! let detection = NoiseFloorDetector::default()
//!     .detect(&rx, &marker, payload.len())
//!     .unwrap();
//! assert_eq!(detection.payload.as_deref(), Some(&payload[..]));
//! ```

pub mod correlation;
pub mod detector;
pub mod io;
pub mod marker;
pub mod observe;
pub mod pairing;
pub mod timing;
pub mod types;

pub use detector::{Detection, DetectionMiss, NoiseFloorDetector};
pub use marker::{MarkedSignal, Marker, MarkerParams};
pub use pairing::{ChannelPairRegistry, MarkerId, PairKey};
pub use timing::{MissionEpoch, WallClock};
pub use types::{IQBuffer, IQSample, SyncError, SyncResult};
