//! Jittered retry delays
//!
//! Two schedules: linear between proxies inside the primary tier, and
//! exponential between full cycles. Both are multiplied by a jitter factor so
//! concurrent callers drift apart, and both are clamped to one cap.

use std::time::Duration;

use crate::random::Entropy;

const JITTER: std::ops::Range<f64> = 1.0..3.0;

#[derive(Debug, Clone)]
pub struct Backoff {
    proxy_base: Duration,
    cycle_base: Duration,
    cap: Duration,
}

impl Backoff {
    pub fn new(proxy_base: Duration, cycle_base: Duration, cap: Duration) -> Self {
        Self {
            proxy_base,
            cycle_base,
            cap,
        }
    }

    /// No waiting at all; useful for tests and diagnostics
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, Duration::ZERO)
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }

    /// Un-jittered delay after primary-tier attempt `attempt` (1-based)
    pub fn proxy_base_delay(&self, attempt: u32) -> Duration {
        self.proxy_base.saturating_mul(attempt.max(1)).min(self.cap)
    }

    /// Un-jittered delay after cycle `cycle` (1-based)
    pub fn cycle_base_delay(&self, cycle: u32) -> Duration {
        let exponent = cycle.max(1).saturating_sub(1).min(31);
        self.cycle_base.saturating_mul(1u32 << exponent).min(self.cap)
    }

    pub fn proxy_delay(&self, attempt: u32, entropy: &Entropy) -> Duration {
        self.jittered(self.proxy_base_delay(attempt), entropy)
    }

    pub fn cycle_delay(&self, cycle: u32, entropy: &Entropy) -> Duration {
        self.jittered(self.cycle_base_delay(cycle), entropy)
    }

    /// Worst case for one schedule step, used to size overall deadlines
    pub fn max_delay(&self) -> Duration {
        self.cap
    }

    fn jittered(&self, base: Duration, entropy: &Entropy) -> Duration {
        if base.is_zero() {
            return Duration::ZERO;
        }
        base.mul_f64(entropy.uniform(JITTER)).min(self.cap)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(30),
        )
    }
}
