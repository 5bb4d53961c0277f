//! # Mission Timing
//!
//! Hardware-timed commands are always expressed as an absolute wall-clock
//! instant: the shared mission epoch plus an event offset.
//!
//! ```text
//!   epoch = now + lead
//!     │
//!     ├── +t₀ ── timed_start(epoch + t₀)   channel A
//!     ├── +t₁ ── timed_start(epoch + t₁)   channel B
//!     └── +t₂ ── timed_retune(f, epoch + t₂)
//! ```
//!
//! The epoch is created once, before any scheduling context starts, and is
//! only ever read afterwards, so it can be shared freely between threads.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const NANOS_PER_SEC: f64 = 1e9;

/// Wall clock with nanosecond precision.
///
/// Based on Unix epoch (1970-01-01 00:00:00 UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WallClock {
    /// Nanoseconds since Unix epoch
    epoch_ns: u64,
}

impl WallClock {
    /// Current system time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            epoch_ns: duration.as_nanos() as u64,
        }
    }

    pub fn from_nanos(epoch_ns: u64) -> Self {
        Self { epoch_ns }
    }

    /// From fractional POSIX seconds. Negative values clamp to the epoch.
    pub fn from_secs_f64(epoch_secs: f64) -> Self {
        Self {
            epoch_ns: (epoch_secs.max(0.0) * NANOS_PER_SEC).round() as u64,
        }
    }

    #[inline]
    pub fn as_nanos(&self) -> u64 {
        self.epoch_ns
    }

    /// Fractional seconds since Unix epoch.
    #[inline]
    pub fn as_secs_f64(&self) -> f64 {
        self.epoch_ns as f64 / NANOS_PER_SEC
    }

    /// Time elapsed since `other`, zero if `other` is later.
    pub fn elapsed_since(&self, other: &WallClock) -> Duration {
        Duration::from_nanos(self.epoch_ns.saturating_sub(other.epoch_ns))
    }

    /// Time remaining until this instant, zero if it has passed.
    pub fn remaining(&self) -> Duration {
        self.elapsed_since(&WallClock::now())
    }

    /// Offset this instant by a signed number of seconds.
    pub fn offset_secs(&self, seconds: f64) -> Self {
        let delta = (seconds * NANOS_PER_SEC).round() as i64;
        Self {
            epoch_ns: self.epoch_ns.saturating_add_signed(delta),
        }
    }

    /// Block the calling thread until this instant.
    pub fn sleep_until(&self) {
        let remaining = self.remaining();
        if !remaining.is_zero() {
            std::thread::sleep(remaining);
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::now()
    }
}

impl Add<Duration> for WallClock {
    type Output = Self;

    fn add(self, duration: Duration) -> Self::Output {
        Self {
            epoch_ns: self.epoch_ns.saturating_add(duration.as_nanos() as u64),
        }
    }
}

impl Sub for WallClock {
    type Output = Duration;

    fn sub(self, other: Self) -> Self::Output {
        self.elapsed_since(&other)
    }
}

/// The single time origin shared by every scheduling context of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionEpoch {
    origin: WallClock,
}

impl MissionEpoch {
    pub fn new(origin: WallClock) -> Self {
        Self { origin }
    }

    /// Epoch placed `lead` after the current time.
    pub fn starting_in(lead: Duration) -> Self {
        Self::new(WallClock::now() + lead)
    }

    pub fn origin(&self) -> WallClock {
        self.origin
    }

    /// Absolute instant of an event `offset_s` seconds after the epoch.
    pub fn at(&self, offset_s: f64) -> WallClock {
        self.origin.offset_secs(offset_s)
    }

    /// Seconds from the epoch to `instant` (negative before the epoch).
    pub fn offset_of(&self, instant: WallClock) -> f64 {
        (instant.as_nanos() as f64 - self.origin.as_nanos() as f64) / NANOS_PER_SEC
    }
}
