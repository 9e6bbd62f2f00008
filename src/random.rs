//! Simulation Randomness
//!
//! Seedable generators for every random choice (processing delays, overload
//! failures, replica selection, load mix). Each component owns its own
//! stream derived from the configured seed, so components never contend on
//! one generator and a seed still pins every choice.

use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Odd multiplier spreading stream numbers across the seed space
const STREAM_SPREAD: u64 = 0x9E37_79B9_7F4A_7C15;

/// Seedable random source.
pub struct SimRng {
    inner: Mutex<StdRng>,
}

impl SimRng {
    /// Deterministic generator.
    pub fn seeded(seed: u64) -> Self {
        Self {
            inner: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Generator seeded from the OS.
    pub fn from_entropy() -> Self {
        Self {
            inner: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Seeded when `seed` is set, otherwise from the OS.
    pub fn from_seed(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::seeded(seed),
            None => Self::from_entropy(),
        }
    }

    /// Independent stream `stream` of `seed`; entropy when `seed` is unset.
    pub fn stream(seed: Option<u64>, stream: u64) -> Self {
        match seed {
            Some(seed) => Self::seeded(seed ^ stream.wrapping_add(1).wrapping_mul(STREAM_SPREAD)),
            None => Self::from_entropy(),
        }
    }

    /// Returns true with probability `p` (clamped to 0.0 - 1.0).
    pub fn chance(&self, p: f64) -> bool {
        let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) };
        self.inner.lock().gen_bool(p)
    }

    /// Uniform index in `0..len`. `len` must be non-zero.
    pub fn index(&self, len: usize) -> usize {
        debug_assert!(len > 0);
        self.inner.lock().gen_range(0..len)
    }

    /// Uniform duration in `[min, max]`.
    pub fn duration_between(&self, min: Duration, max: Duration) -> Duration {
        if max <= min {
            return min;
        }
        let micros = self
            .inner
            .lock()
            .gen_range(min.as_micros() as u64..=max.as_micros() as u64);
        Duration::from_micros(micros)
    }

    /// Random token, used for generated keys and payloads.
    pub fn token(&self) -> u64 {
        self.inner.lock().gen()
    }
}

impl std::fmt::Debug for SimRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimRng").finish_non_exhaustive()
    }
}
