use serde::{Deserialize, Serialize};

use crate::rng::DeterministicRng;

/// Timing profile for a simulated editing session.
///
/// Real hosts deliver callbacks at irregular intervals: rapid toggle bursts
/// land microseconds apart while a thinking user leaves second-long gaps.
/// Steps draw from `[min_step_ms, max_step_ms]`, and `burst_rate_percent`
/// of them advance time not at all, which is what puts guard windows,
/// debounce periods, and freshness cutoffs all genuinely in play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Session start timestamp in epoch milliseconds.
    pub base_ms: i64,
    /// Smallest step between consecutive events.
    pub min_step_ms: i64,
    /// Largest step between consecutive events.
    pub max_step_ms: i64,
    /// Percentage of steps that advance time by zero milliseconds.
    pub burst_rate_percent: u8,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            base_ms: 1_700_000_000_000,
            min_step_ms: 40,
            max_step_ms: 900,
            burst_rate_percent: 10,
        }
    }
}

/// Monotonic simulated wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedClock {
    config: ClockConfig,
    now_ms: i64,
}

impl SimulatedClock {
    /// Start a clock at the configured base timestamp.
    #[must_use]
    pub const fn new(config: ClockConfig) -> Self {
        Self {
            config,
            now_ms: config.base_ms,
        }
    }

    /// Current simulated time in epoch milliseconds.
    #[must_use]
    pub const fn now_ms(&self) -> i64 {
        self.now_ms
    }

    /// Advance to the next event and return the new time.
    #[must_use]
    pub fn advance(&mut self, rng: &mut DeterministicRng) -> i64 {
        if !rng.hit_rate_percent(self.config.burst_rate_percent) {
            let step = rng.next_range_ms(self.config.min_step_ms, self.config.max_step_ms);
            self.now_ms = self.now_ms.saturating_add(step);
        }
        self.now_ms
    }

    /// Advance by an exact amount (used when draining a session).
    pub fn advance_by(&mut self, delta_ms: i64) -> i64 {
        self.now_ms = self.now_ms.saturating_add(delta_ms.max(0));
        self.now_ms
    }
}
