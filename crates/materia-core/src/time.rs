//! Wall-clock access for hosts driving the engine.
//!
//! The engine itself never reads a clock: every entry point takes a
//! `now_ms` argument. Hosts running against real time obtain it here;
//! simulated hosts supply their own timeline.

/// Current wall-clock time as epoch milliseconds.
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
