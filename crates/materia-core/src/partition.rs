//! Pure partitioning of canonical issues into available/selected pools.
//!
//! `partition` is the single canonical implementation of the pool-derivation
//! algorithm. It never mutates its inputs: the caller passes the current
//! [`ReconcileState`] and receives an updated copy in the outcome.
//!
//! # Rule order
//!
//! For each non-header record, the first matching rule decides its pool:
//!
//! 1. A fresh toggle operation wins over everything (local optimism beats
//!    stale canonical input inside the freshness window).
//! 2. An explicit deselection pins the record to `available`.
//! 3. Membership in the caller's selected-id set or in the sticky
//!    known-material set places it in `selected`.
//! 4. Everything else lands in `available`.
//!
//! # Duplicates
//!
//! If the same id occurs more than once in the canonical input, the first
//! occurrence is kept at its position and later occurrences are dropped
//! with a diagnostic. Because every occurrence is decided by the same rule
//! chain, the survivor's pool is the one a fresh operation dictates if any
//! was recorded, and otherwise selection sticks (rule 3 beats rule 4).
//!
//! # Malformed records
//!
//! Records with a blank id or non-finite scores never abort the pass: each
//! yields a diagnostic and is emitted in `available` as non-material, and
//! the rest of the batch continues. The malformed check runs before header
//! detection; a record without identity cannot act as a category header.
//!
//! # Headers
//!
//! Category headers (empty description, zero scores) are excluded from both
//! pools. The render layer draws section titles from its own tables and
//! must never receive a toggleable header row.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ErrorCode;
use crate::model::{IssueField, IssueId, MaterialityIssue};
use crate::ops::{OpKind, OpLog};
use crate::state::ReconcileState;

// ---------------------------------------------------------------------------
// Pools and diagnostics
// ---------------------------------------------------------------------------

/// The two output pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pool {
    Available,
    Selected,
}

impl Pool {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Selected => "selected",
        }
    }
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recoverable per-record problem found while partitioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PartitionDiagnostic {
    /// Record with an empty or whitespace id.
    BlankId { position: usize, name: String },
    /// Record whose relevance score is NaN or infinite.
    NonFiniteScore { id: IssueId, field: IssueField },
    /// Later occurrence of an id already seen in this pass.
    DuplicateId {
        id: IssueId,
        first_position: usize,
        dropped_position: usize,
    },
}

impl PartitionDiagnostic {
    /// Stable error code for host-side classification.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::BlankId { .. } | Self::NonFiniteScore { .. } => ErrorCode::MalformedRecord,
            Self::DuplicateId { .. } => ErrorCode::DuplicateIssueId,
        }
    }
}

impl fmt::Display for PartitionDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BlankId { position, name } => {
                write!(f, "record at position {position} ('{name}') has a blank id")
            }
            Self::NonFiniteScore { id, field } => {
                write!(f, "record '{id}' has a non-finite {field}")
            }
            Self::DuplicateId {
                id,
                first_position,
                dropped_position,
            } => {
                write!(
                    f,
                    "record '{id}' at position {dropped_position} duplicates position {first_position}"
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result of one partition pass.
///
/// `available` and `selected` hold owned record copies with `is_material`
/// set to match their pool. `state` is the updated reconciliation state the
/// caller should carry into the next pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionOutcome {
    pub available: Vec<MaterialityIssue>,
    pub selected: Vec<MaterialityIssue>,
    pub state: ReconcileState,
    pub diagnostics: Vec<PartitionDiagnostic>,
}

impl PartitionOutcome {
    /// Pool containing `id`, or `None` for headers, malformed records, and
    /// unknown ids.
    #[must_use]
    pub fn membership(&self, id: &IssueId) -> Option<Pool> {
        if self.selected.iter().any(|issue| issue.id == *id) {
            return Some(Pool::Selected);
        }
        if self
            .available
            .iter()
            .any(|issue| issue.id == *id && !issue.id.is_blank())
        {
            return Some(Pool::Available);
        }
        None
    }

    /// Membership of every well-formed record, keyed by id.
    #[must_use]
    pub fn memberships(&self) -> BTreeMap<IssueId, Pool> {
        let mut map = BTreeMap::new();
        for issue in &self.selected {
            map.insert(issue.id.clone(), Pool::Selected);
        }
        for issue in &self.available {
            if !issue.id.is_blank() {
                map.entry(issue.id.clone()).or_insert(Pool::Available);
            }
        }
        map
    }

    /// True when the pass produced no diagnostics.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Partition pass
// ---------------------------------------------------------------------------

/// Derive the available/selected pools from the canonical list.
///
/// Output order follows canonical order within each pool and is fully
/// deterministic for a given input. See the module docs for the rule
/// chain, duplicate handling, and malformed-record behavior.
#[must_use]
pub fn partition(
    canonical: &[MaterialityIssue],
    selected_ids: &BTreeSet<IssueId>,
    state: &ReconcileState,
    ops: &OpLog,
    now_ms: i64,
    freshness_window_ms: i64,
) -> PartitionOutcome {
    let mut available = Vec::new();
    let mut selected = Vec::new();
    let mut diagnostics = Vec::new();
    let mut next_state = state.clone();
    let mut first_seen: BTreeMap<IssueId, usize> = BTreeMap::new();

    for (position, issue) in canonical.iter().enumerate() {
        if let Some(flaw) = record_flaw(issue, position) {
            warn!(code = %flaw.code(), "partition diagnostic: {flaw}");
            diagnostics.push(flaw);
            available.push(as_available(issue));
            continue;
        }

        if issue.is_header() {
            continue;
        }

        if let Some(&first_position) = first_seen.get(&issue.id) {
            let flaw = PartitionDiagnostic::DuplicateId {
                id: issue.id.clone(),
                first_position,
                dropped_position: position,
            };
            warn!(code = %flaw.code(), "partition diagnostic: {flaw}");
            diagnostics.push(flaw);
            continue;
        }
        first_seen.insert(issue.id.clone(), position);

        let fresh_kind = ops
            .latest(&issue.id)
            .filter(|op| op.is_fresh(freshness_window_ms, now_ms))
            .map(|op| op.kind);

        match fresh_kind {
            Some(OpKind::Select) => {
                next_state.note_selected(&issue.id);
                selected.push(as_selected(issue));
            }
            Some(OpKind::Deselect) => {
                next_state.note_deselected(&issue.id);
                available.push(as_available(issue));
            }
            None => {
                if next_state.is_explicitly_deselected(&issue.id) {
                    available.push(as_available(issue));
                } else if selected_ids.contains(&issue.id)
                    || next_state.is_known_material(&issue.id)
                {
                    next_state.note_selected(&issue.id);
                    selected.push(as_selected(issue));
                } else {
                    available.push(as_available(issue));
                }
            }
        }
    }

    debug!(
        available = available.len(),
        selected = selected.len(),
        diagnostics = diagnostics.len(),
        "partition pass complete"
    );

    PartitionOutcome {
        available,
        selected,
        state: next_state,
        diagnostics,
    }
}

fn as_selected(issue: &MaterialityIssue) -> MaterialityIssue {
    let mut record = issue.clone();
    record.is_material = true;
    record
}

fn as_available(issue: &MaterialityIssue) -> MaterialityIssue {
    let mut record = issue.clone();
    record.is_material = false;
    record
}

/// Cheap predicate matching the malformed-record checks of a pass.
pub(crate) fn is_well_formed(issue: &MaterialityIssue) -> bool {
    !issue.id.is_blank()
        && issue.impact_relevance.is_finite()
        && issue.financial_relevance.is_finite()
}

fn record_flaw(issue: &MaterialityIssue, position: usize) -> Option<PartitionDiagnostic> {
    if issue.id.is_blank() {
        return Some(PartitionDiagnostic::BlankId {
            position,
            name: issue.name.clone(),
        });
    }
    if !issue.impact_relevance.is_finite() {
        return Some(PartitionDiagnostic::NonFiniteScore {
            id: issue.id.clone(),
            field: IssueField::ImpactRelevance,
        });
    }
    if !issue.financial_relevance.is_finite() {
        return Some(PartitionDiagnostic::NonFiniteScore {
            id: issue.id.clone(),
            field: IssueField::FinancialRelevance,
        });
    }
    None
}
