//! Shared, seedable randomness
//!
//! Jitter, endpoint choice, and header profiles all draw from one `Entropy`
//! handle so tests can pin the sequence with a seed.

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Cloneable handle to a shared RNG
#[derive(Clone)]
pub struct Entropy {
    rng: Arc<Mutex<StdRng>>,
}

impl Entropy {
    /// Seed from the operating system
    pub fn from_os() -> Self {
        Self {
            rng: Arc::new(Mutex::new(StdRng::from_entropy())),
        }
    }

    /// Deterministic sequence for a given seed
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    pub fn from_seed_or_os(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::seeded(seed),
            None => Self::from_os(),
        }
    }

    /// Pick one element, or None if the slice is empty
    pub fn choose<'a, T>(&self, items: &'a [T]) -> Option<&'a T> {
        let mut rng = self.rng.lock();
        items.choose(&mut *rng)
    }

    /// Uniform float in `range`; an empty range yields its start
    pub fn uniform(&self, range: Range<f64>) -> f64 {
        if range.start >= range.end {
            return range.start;
        }
        self.rng.lock().gen_range(range)
    }

    /// Uniform duration between `min` (inclusive) and `max` (exclusive)
    pub fn duration_between(&self, min: Duration, max: Duration) -> Duration {
        if min >= max {
            return min;
        }
        Duration::from_secs_f64(self.uniform(min.as_secs_f64()..max.as_secs_f64()))
    }
}

impl Default for Entropy {
    fn default() -> Self {
        Self::from_os()
    }
}
