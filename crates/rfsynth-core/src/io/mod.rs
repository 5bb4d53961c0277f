//! I/O utilities for IQ sample files.
//!
//! Payloads and captured slices are stored as raw interleaved little-endian
//! float32 pairs (`cf32`), 8 bytes per sample, with no header.
//!
//! # Example
//!
//! ```rust
//! use rfsynth_core::io::{read_cf32_file, write_cf32_file};
//! use rfsynth_core::types::IQSample;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let path = dir.path().join("payload.cf32");
//!
//! let samples = vec![IQSample::new(0.5, -0.5), IQSample::new(0.25, 1.0)];
//! write_cf32_file(&path, &samples).unwrap();
//! assert_eq!(read_cf32_file(&path).unwrap(), samples);
//! ```

mod cf32;

pub use cf32::{
    parse_bytes, read_cf32_file, read_samples, to_bytes, write_cf32_file, write_samples,
    BYTES_PER_SAMPLE,
};
