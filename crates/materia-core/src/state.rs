//! Reconciliation state carried between partition passes.
//!
//! The partition function is pure: it receives a [`ReconcileState`] snapshot
//! and returns an updated copy alongside the partitions. Nothing in this
//! module mutates shared state ambiently.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::IssueId;

/// Monotonic counter bumped on every local mutation.
///
/// Canonical updates arriving from the backend carry the basis version they
/// were derived from; a record whose last local mutation is newer than that
/// basis keeps its local state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct StateVersion(u64);

impl StateVersion {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StateVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Selection memory distinct from the canonical records: ids the engine has
/// seen selected (sticky) and ids the user explicitly deselected.
///
/// The two sets are disjoint; noting an id on one side removes it from the
/// other.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileState {
    known_material: BTreeSet<IssueId>,
    explicitly_deselected: BTreeSet<IssueId>,
}

impl ReconcileState {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            known_material: BTreeSet::new(),
            explicitly_deselected: BTreeSet::new(),
        }
    }

    pub fn note_selected(&mut self, id: &IssueId) {
        self.explicitly_deselected.remove(id);
        self.known_material.insert(id.clone());
    }

    pub fn note_deselected(&mut self, id: &IssueId) {
        self.known_material.remove(id);
        self.explicitly_deselected.insert(id.clone());
    }

    /// Drop all memory of `id` (used when a custom issue is hard-removed).
    pub fn forget(&mut self, id: &IssueId) {
        self.known_material.remove(id);
        self.explicitly_deselected.remove(id);
    }

    /// Keep only ids still present in the canonical list.
    pub fn retain_ids(&mut self, live: &BTreeSet<IssueId>) {
        self.known_material.retain(|id| live.contains(id));
        self.explicitly_deselected.retain(|id| live.contains(id));
    }

    #[must_use]
    pub fn is_known_material(&self, id: &IssueId) -> bool {
        self.known_material.contains(id)
    }

    #[must_use]
    pub fn is_explicitly_deselected(&self, id: &IssueId) -> bool {
        self.explicitly_deselected.contains(id)
    }

    #[must_use]
    pub const fn known_material(&self) -> &BTreeSet<IssueId> {
        &self.known_material
    }

    #[must_use]
    pub const fn explicitly_deselected(&self) -> &BTreeSet<IssueId> {
        &self.explicitly_deselected
    }
}
