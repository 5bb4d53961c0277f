//! Propagation model for the simulated medium.
//!
//! Each tx→rx channel pair is a flat link: a scalar gain, optionally blocked
//! outright. Receivers add white Gaussian noise on top of whatever arrives.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rfsynth_core::types::IQSample;
use serde::{Deserialize, Serialize};

use crate::device::{RadioError, RadioResult};

/// One tx channel → rx channel propagation path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Link {
    /// Linear amplitude gain
    pub gain: f64,
    /// Nothing propagates over a blocked link
    pub blocked: bool,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            gain: 1.0,
            blocked: false,
        }
    }
}

impl Link {
    pub fn with_gain(gain: f64) -> Self {
        Self {
            gain,
            blocked: false,
        }
    }

    pub fn blocked() -> Self {
        Self {
            gain: 0.0,
            blocked: true,
        }
    }
}

/// Seeded complex white Gaussian noise source.
#[derive(Debug)]
pub struct Awgn {
    /// Standard deviation per I/Q component
    std_dev: f64,
    normal: Normal<f64>,
    rng: StdRng,
}

impl Awgn {
    pub fn new(std_dev: f64, seed: u64) -> RadioResult<Self> {
        // Normal::new accepts a negative sigma
        if !(std_dev.is_finite() && std_dev >= 0.0) {
            return Err(RadioError::ConfigError(format!(
                "Noise level must be finite and non-negative, got {}",
                std_dev
            )));
        }
        let normal = Normal::new(0.0, std_dev).map_err(|e| {
            RadioError::ConfigError(format!("Invalid noise level {}: {}", std_dev, e))
        })?;
        Ok(Self {
            std_dev,
            normal,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn std_dev(&self) -> f64 {
        self.std_dev
    }

    /// Add noise to every sample in place.
    pub fn add_to(&mut self, samples: &mut [IQSample]) {
        if self.std_dev == 0.0 {
            return;
        }
        for s in samples.iter_mut() {
            *s += IQSample::new(
                self.normal.sample(&mut self.rng),
                self.normal.sample(&mut self.rng),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noise_statistics() {
        let mut awgn = Awgn::new(0.1, 42).unwrap();
        let mut samples = vec![IQSample::new(0.0, 0.0); 50_000];
        awgn.add_to(&mut samples);

        let power = samples.iter().map(|s| s.norm_sqr()).sum::<f64>() / samples.len() as f64;
        // E|n|² = 2σ²
        assert!((power - 0.02).abs() < 0.001, "power = {}", power);
    }

    #[test]
    fn test_noise_is_seeded() {
        let mut a = vec![IQSample::new(0.0, 0.0); 16];
        let mut b = a.clone();
        Awgn::new(1.0, 9).unwrap().add_to(&mut a);
        Awgn::new(1.0, 9).unwrap().add_to(&mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_noise_is_identity() {
        let mut samples = vec![IQSample::new(0.5, 0.5); 4];
        Awgn::new(0.0, 1).unwrap().add_to(&mut samples);
        assert!(samples.iter().all(|s| *s == IQSample::new(0.5, 0.5)));
    }

    #[test]
    fn test_invalid_noise_level() {
        assert!(Awgn::new(-1.0, 1).is_err());
        assert!(Awgn::new(f64::NAN, 1).is_err());
        assert!(Awgn::new(f64::INFINITY, 1).is_err());
        assert!(Awgn::new(-0.001, 1).is_err());
    }

    #[test]
    fn test_link_presets() {
        assert_eq!(Link::default().gain, 1.0);
        assert!(Link::blocked().blocked);
        assert_eq!(Link::with_gain(0.25).gain, 0.25);
    }
}
