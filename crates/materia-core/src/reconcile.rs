//! Reconciliation scheduling.
//!
//! Canonical-list and selected-id updates arrive in bursts: a toggle's own
//! save can echo back through the backend moments later, and several host
//! callbacks can fire inside one UI tick. Re-partitioning on every one of
//! them causes visible flicker. The [`Reconciler`] decides, per trigger,
//! whether a partition pass is warranted.
//!
//! # Decision order
//!
//! 1. A pass already in flight blocks everything (re-entrancy guard).
//! 2. The first pass after construction always runs.
//! 3. Local mutations always run; the user must see their change now.
//! 4. External triggers are skipped inside the short guard window after
//!    the most recent toggle (same-tick duplicate suppression).
//! 5. External triggers are skipped during the cool-down after a completed
//!    pass, giving the freshness window time to dominate backend echoes.
//! 6. A changed selected-id set runs.
//! 7. A detected desync runs (self-heal): a well-formed record whose
//!    `is_material` contradicts its pool, a record in no pool at all, or a
//!    pool entry whose record left the canonical list.
//! 8. Otherwise skip.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{IssueId, MaterialityIssue};
use crate::ops::OpLog;
use crate::partition::{PartitionOutcome, Pool, is_well_formed};

// ---------------------------------------------------------------------------
// Triggers and decisions
// ---------------------------------------------------------------------------

/// What prompted a reconciliation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileTrigger {
    /// Engine initialization.
    Init,
    /// The canonical issue list was replaced or reloaded.
    CanonicalUpdate,
    /// The external selected-id set changed.
    SelectionUpdate,
    /// A local user mutation (toggle, edit, add, deselect).
    LocalMutation,
    /// Periodic housekeeping tick.
    Maintenance,
}

impl ReconcileTrigger {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::CanonicalUpdate => "canonical_update",
            Self::SelectionUpdate => "selection_update",
            Self::LocalMutation => "local_mutation",
            Self::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for ReconcileTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a pass runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunReason {
    FirstRun,
    LocalMutation,
    SelectionDelta,
    SelfHeal,
}

impl RunReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::FirstRun => "first_run",
            Self::LocalMutation => "local_mutation",
            Self::SelectionDelta => "selection_delta",
            Self::SelfHeal => "self_heal",
        }
    }
}

impl fmt::Display for RunReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a pass is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    InFlight,
    GuardWindow,
    CoolingDown,
    NoChange,
}

impl SkipReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::InFlight => "in_flight",
            Self::GuardWindow => "guard_window",
            Self::CoolingDown => "cooling_down",
            Self::NoChange => "no_change",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a reconciliation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileDecision {
    Run(RunReason),
    Skip(SkipReason),
}

impl ReconcileDecision {
    #[must_use]
    pub const fn should_run(self) -> bool {
        matches!(self, Self::Run(_))
    }
}

impl fmt::Display for ReconcileDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run(reason) => write!(f, "run ({reason})"),
            Self::Skip(reason) => write!(f, "skip ({reason})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Stateful scheduler deciding when partition passes run.
///
/// Holds the previously seen selected-id baseline and the memberships of
/// the last completed pass; both are updated through [`Reconciler::complete`].
#[derive(Debug, Clone)]
pub struct Reconciler {
    baseline_selected: BTreeSet<IssueId>,
    last_memberships: BTreeMap<IssueId, Pool>,
    guard_window_ms: i64,
    cooldown_ms: i64,
    in_flight: bool,
    initialized: bool,
    last_run_ms: i64,
    cooldown_until_ms: i64,
}

impl Reconciler {
    #[must_use]
    pub const fn new(guard_window_ms: i64, cooldown_ms: i64) -> Self {
        Self {
            baseline_selected: BTreeSet::new(),
            last_memberships: BTreeMap::new(),
            guard_window_ms,
            cooldown_ms,
            in_flight: false,
            initialized: false,
            last_run_ms: 0,
            cooldown_until_ms: 0,
        }
    }

    /// Decide whether a partition pass should run now.
    #[must_use]
    pub fn decide(
        &self,
        trigger: ReconcileTrigger,
        selected_ids: &BTreeSet<IssueId>,
        canonical: &[MaterialityIssue],
        ops: &OpLog,
        now_ms: i64,
    ) -> ReconcileDecision {
        let decision = self.decide_inner(trigger, selected_ids, canonical, ops, now_ms);
        debug!(trigger = %trigger, "reconcile check: {decision}");
        decision
    }

    fn decide_inner(
        &self,
        trigger: ReconcileTrigger,
        selected_ids: &BTreeSet<IssueId>,
        canonical: &[MaterialityIssue],
        ops: &OpLog,
        now_ms: i64,
    ) -> ReconcileDecision {
        if self.in_flight {
            return ReconcileDecision::Skip(SkipReason::InFlight);
        }
        if !self.initialized {
            return ReconcileDecision::Run(RunReason::FirstRun);
        }
        if trigger == ReconcileTrigger::LocalMutation {
            return ReconcileDecision::Run(RunReason::LocalMutation);
        }

        if let Some(op) = ops.newest() {
            if now_ms - op.recorded_at_ms < self.guard_window_ms {
                return ReconcileDecision::Skip(SkipReason::GuardWindow);
            }
        }
        if now_ms < self.cooldown_until_ms {
            return ReconcileDecision::Skip(SkipReason::CoolingDown);
        }

        if *selected_ids != self.baseline_selected {
            return ReconcileDecision::Run(RunReason::SelectionDelta);
        }
        if self.needs_self_heal(canonical) {
            return ReconcileDecision::Run(RunReason::SelfHeal);
        }

        ReconcileDecision::Skip(SkipReason::NoChange)
    }

    /// Mark a pass as started (re-entrancy guard for host callbacks).
    pub fn begin(&mut self) {
        self.in_flight = true;
    }

    /// Record a completed pass: adopt the new baseline, remember pool
    /// memberships, and start the cool-down.
    pub fn complete(
        &mut self,
        outcome: &PartitionOutcome,
        selected_ids: &BTreeSet<IssueId>,
        now_ms: i64,
    ) {
        self.baseline_selected = selected_ids.clone();
        self.last_memberships = outcome.memberships();
        self.in_flight = false;
        self.initialized = true;
        self.last_run_ms = now_ms;
        self.cooldown_until_ms = now_ms.saturating_add(self.cooldown_ms);
    }

    /// Detect a desync between canonical records and the last pass.
    ///
    /// True when a well-formed non-header record carries an `is_material`
    /// contradicting its pool, sits in no pool, or when a pool entry's
    /// record has left the canonical list.
    #[must_use]
    pub fn needs_self_heal(&self, canonical: &[MaterialityIssue]) -> bool {
        let mut live = BTreeSet::new();
        for issue in canonical {
            if !is_well_formed(issue) || issue.is_header() {
                continue;
            }
            live.insert(issue.id.clone());
            match self.last_memberships.get(&issue.id) {
                None => return true,
                Some(Pool::Selected) if !issue.is_material => return true,
                Some(Pool::Available) if issue.is_material => return true,
                Some(_) => {}
            }
        }
        self.last_memberships.keys().any(|id| !live.contains(id))
    }

    #[must_use]
    pub const fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    #[must_use]
    pub const fn baseline_selected(&self) -> &BTreeSet<IssueId> {
        &self.baseline_selected
    }

    #[must_use]
    pub const fn last_run_ms(&self) -> i64 {
        self.last_run_ms
    }

    #[must_use]
    pub const fn cooldown_until_ms(&self) -> i64 {
        self.cooldown_until_ms
    }
}
