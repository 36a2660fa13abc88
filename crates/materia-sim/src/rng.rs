use serde::{Deserialize, Serialize};

/// Small deterministic RNG behind every simulated choice.
///
/// A plain 64-bit LCG: portable, allocation-free, and identical on every
/// platform, which is all a replayable simulation needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    /// Seed the generator. Identical seeds yield identical streams.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            state: seed ^ 0x9E37_79B9_7F4A_7C15,
        }
    }

    /// Next pseudo-random `u64`.
    #[must_use]
    pub fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.state
    }

    /// Next value in `[0, upper_exclusive)`; zero bound yields zero.
    #[must_use]
    pub fn next_bounded(&mut self, upper_exclusive: u64) -> u64 {
        if upper_exclusive == 0 {
            return 0;
        }
        self.next_u64() % upper_exclusive
    }

    /// Next millisecond count in `[lo, hi]`. Degenerate ranges collapse
    /// to `lo`.
    #[must_use]
    pub fn next_range_ms(&mut self, lo: i64, hi: i64) -> i64 {
        if hi <= lo {
            return lo;
        }
        let span = hi.saturating_sub(lo).saturating_add(1);
        let span_u64 = u64::try_from(span).unwrap_or(u64::MAX);
        let offset = i64::try_from(self.next_bounded(span_u64)).unwrap_or(0);
        lo.saturating_add(offset)
    }

    /// Bernoulli trial with integer percent.
    #[must_use]
    pub fn hit_rate_percent(&mut self, percent: u8) -> bool {
        if percent == 0 {
            return false;
        }
        if percent >= 100 {
            return true;
        }
        self.next_bounded(100) < u64::from(percent)
    }
}
