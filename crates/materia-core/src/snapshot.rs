//! Owned snapshots for the render layer.
//!
//! The render contract is read-only: consumers get cloned records, never
//! references into the engine, so nothing a view does can alias engine
//! state. Snapshots split records by their adopted `is_material` flag,
//! which the engine keeps consistent with the last partition pass; header
//! records belong to neither pool.

use serde::Serialize;

use crate::model::{IssueId, MaterialityIssue};
use crate::partition::Pool;
use crate::state::StateVersion;

/// A point-in-time view of the two pools.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionSnapshot {
    /// Non-material issues, canonical order.
    pub available: Vec<MaterialityIssue>,
    /// Material issues, canonical order.
    pub selected: Vec<MaterialityIssue>,
    /// Engine state version at capture time.
    pub version: StateVersion,
    /// Capture timestamp (caller-supplied epoch millis).
    pub taken_at_ms: i64,
}

impl PartitionSnapshot {
    /// Clone the given records into a snapshot, splitting on `is_material`.
    #[must_use]
    pub fn capture(issues: &[MaterialityIssue], version: StateVersion, taken_at_ms: i64) -> Self {
        let mut available = Vec::new();
        let mut selected = Vec::new();
        for issue in issues {
            if issue.is_header() {
                continue;
            }
            if issue.is_material {
                selected.push(issue.clone());
            } else {
                available.push(issue.clone());
            }
        }
        Self {
            available,
            selected,
            version,
            taken_at_ms,
        }
    }

    /// Which pool holds the given id, if either.
    #[must_use]
    pub fn pool_of(&self, id: &IssueId) -> Option<Pool> {
        if self.selected.iter().any(|issue| issue.id == *id) {
            Some(Pool::Selected)
        } else if self.available.iter().any(|issue| issue.id == *id) {
            Some(Pool::Available)
        } else {
            None
        }
    }

    /// Total records across both pools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.available.len() + self.selected.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.available.is_empty() && self.selected.is_empty()
    }
}
