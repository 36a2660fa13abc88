//! Toggle operation tracking.
//!
//! Canonical recomputation can arrive moments after a user toggle; without a
//! record of recent operations the just-toggled issue would snap back to its
//! pre-toggle partition for one pass. The [`OpLog`] keeps a bounded,
//! per-issue history of the most recent select/deselect operations so the
//! partitioner can let a fresh local operation win over stale canonical
//! input.

use std::collections::VecDeque;
use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::model::{IssueId, ParseEnumError};
use crate::state::StateVersion;

/// Default number of per-issue entries retained.
pub const DEFAULT_OP_HISTORY_CAP: usize = 32;

/// Direction of a toggle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Select,
    Deselect,
}

impl OpKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Deselect => "deselect",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "select" => Ok(Self::Select),
            "deselect" => Ok(Self::Deselect),
            _ => Err(ParseEnumError {
                expected: "operation kind",
                got: s.to_string(),
            }),
        }
    }
}

/// One recorded toggle operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleOp {
    pub id: IssueId,
    pub kind: OpKind,
    /// Wall-clock instant the operation was recorded, epoch millis.
    pub recorded_at_ms: i64,
    /// Engine state version at the time of recording. Canonical updates
    /// with an older basis must not override this operation's effect.
    pub version: StateVersion,
}

impl ToggleOp {
    /// Age-based freshness. A negative age (clock skew) counts as fresh.
    #[must_use]
    pub const fn is_fresh(&self, window_ms: i64, now_ms: i64) -> bool {
        now_ms - self.recorded_at_ms <= window_ms
    }
}

/// Bounded per-issue history of recent toggle operations.
///
/// Recording an operation replaces any prior entry for the same id; entries
/// for other ids are retained so toggles on multiple issues do not erase
/// each other's freshness. The oldest entry is evicted past the cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpLog {
    entries: VecDeque<ToggleOp>,
    cap: usize,
}

impl Default for OpLog {
    fn default() -> Self {
        Self::new(DEFAULT_OP_HISTORY_CAP)
    }
}

impl OpLog {
    /// A `cap` of zero is treated as one: the log always retains at least
    /// the most recent operation.
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cap: cap.max(1),
        }
    }

    pub fn record(&mut self, id: &IssueId, kind: OpKind, now_ms: i64, version: StateVersion) {
        self.entries.retain(|op| op.id != *id);
        self.entries.push_back(ToggleOp {
            id: id.clone(),
            kind,
            recorded_at_ms: now_ms,
            version,
        });
        while self.entries.len() > self.cap {
            self.entries.pop_front();
        }
    }

    /// Most recent operation for `id`, if still retained.
    #[must_use]
    pub fn latest(&self, id: &IssueId) -> Option<&ToggleOp> {
        self.entries.iter().rev().find(|op| op.id == *id)
    }

    /// Most recent operation across all ids.
    #[must_use]
    pub fn newest(&self) -> Option<&ToggleOp> {
        self.entries.back()
    }

    /// Whether an operation for `id` was recorded within `window_ms` of
    /// `now_ms`.
    #[must_use]
    pub fn is_fresh(&self, id: &IssueId, window_ms: i64, now_ms: i64) -> bool {
        self.latest(id)
            .is_some_and(|op| op.is_fresh(window_ms, now_ms))
    }

    /// Drop entries recorded before `cutoff_ms`.
    pub fn prune_older_than(&mut self, cutoff_ms: i64) {
        self.entries.retain(|op| op.recorded_at_ms >= cutoff_ms);
    }

    /// Drop the entry for `id`, if any (used when a custom issue is
    /// hard-removed).
    pub fn forget(&mut self, id: &IssueId) {
        self.entries.retain(|op| op.id != *id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToggleOp> {
        self.entries.iter()
    }
}
