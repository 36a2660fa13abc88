use materia_core::{MaterialityIssue, SaveStats, SelectionEngine};

use crate::driver::{IntentKind, IntentLedger};

// ── Core result types ─────────────────────────────────────────────────────────

/// Oracle result for an invariant check.
///
/// Returned by each checker and by [`SelectionOracle::check_live`] /
/// [`SelectionOracle::check_drained`], which fold the individual checks.
#[derive(Debug, Clone, PartialEq)]
pub struct OracleResult {
    /// `true` iff no violations were found.
    pub passed: bool,
    /// Detailed description of every invariant that was violated.
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    /// Construct a passing result.
    #[must_use]
    fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    /// Construct a failing result from one or more violations.
    #[must_use]
    fn fail(violations: Vec<InvariantViolation>) -> Self {
        Self {
            passed: false,
            violations,
        }
    }

    /// Merge another result into this one (failures accumulate).
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        if !other.passed {
            self.passed = false;
            self.violations.extend(other.violations);
        }
        self
    }
}

impl From<Vec<InvariantViolation>> for OracleResult {
    fn from(violations: Vec<InvariantViolation>) -> Self {
        if violations.is_empty() {
            Self::pass()
        } else {
            Self::fail(violations)
        }
    }
}

// ── Invariant violation diagnostics ──────────────────────────────────────────

/// Diagnostic information for a single failed invariant check.
#[derive(Debug, Clone, PartialEq)]
pub enum InvariantViolation {
    /// The canonical list carries the same id twice.
    ///
    /// Emitted by `check_records`.
    DuplicateRecord {
        /// Simulation step at which the duplicate was observed.
        step: u64,
        /// The repeated id.
        id: String,
    },

    /// A header record is flagged material.
    ///
    /// Emitted by `check_records`.
    MaterialHeader {
        /// Simulation step at which the flag was observed.
        step: u64,
        /// The offending header id.
        id: String,
    },

    /// Partition diagnostics appeared although every injected record was
    /// well-formed.
    ///
    /// Emitted by `check_records`.
    UnexpectedDiagnostics {
        /// Simulation step at which the diagnostics were observed.
        step: u64,
        /// Number of diagnostics reported.
        count: usize,
    },

    /// The engine's state version moved backwards.
    ///
    /// Emitted by `check_version`.
    VersionRegressed {
        /// Simulation step at which the regression was observed.
        step: u64,
        /// Version seen on the previous step.
        from: u64,
        /// Version seen now.
        to: u64,
    },

    /// Save counters no longer add up: more settled batches than cut
    /// ones, or more than one batch unaccounted for.
    ///
    /// Emitted by `check_save_ledger`.
    SaveLedgerSkew {
        /// Simulation step at which the skew was observed.
        step: u64,
        /// Batches handed out by the engine so far.
        batches_cut: u64,
        /// Batches reported back, success and failure combined.
        settled: u64,
        /// Whether the engine believes a save is in flight.
        in_flight: bool,
    },

    /// The adapter committed a different number of saves than the engine
    /// counted as completed.
    ///
    /// Emitted by `check_save_ledger`.
    AdapterDrift {
        /// Simulation step at which the drift was observed.
        step: u64,
        /// Successful writes the adapter performed.
        adapter_saves: u64,
        /// Completions the engine recorded.
        completed: u64,
    },

    /// A local selection or deselection that no newer external update
    /// superseded is not reflected in the live records.
    ///
    /// Emitted by `check_intents`.
    IntentLost {
        /// Simulation step at which the loss was observed.
        step: u64,
        /// The id the user acted on.
        id: String,
        /// What the user last did to it.
        intended: IntentKind,
        /// What the engine shows instead.
        observed: String,
    },

    /// A custom issue the user removed came back without any external
    /// update newer than the removal.
    ///
    /// Emitted by `check_intents`.
    ResurrectedIssue {
        /// Simulation step at which the record reappeared.
        step: u64,
        /// The removed custom id.
        id: String,
    },

    /// The session drained but dirty state or an in-flight save remained.
    ///
    /// Emitted by `check_drained`.
    UnsavedChangesAtEnd {
        /// Dirty flag after the drain.
        dirty: bool,
        /// In-flight flag after the drain.
        in_flight: bool,
    },

    /// A local edit that survived to the end of the session is missing
    /// from the last successfully saved list.
    ///
    /// Emitted by `check_drained`.
    UnsavedIntent {
        /// The id the user acted on.
        id: String,
        /// What the user last did to it.
        intended: IntentKind,
        /// What the saved list shows instead.
        observed: String,
    },
}

// ── Oracle ────────────────────────────────────────────────────────────────────

/// Oracle holding a live [`SelectionEngine`] to its contract mid-run and
/// after a session drains.
///
/// The checks are deliberately one-sided: an external update with a basis
/// at or past a local op releases that op from scrutiny, because either
/// side may then legitimately win. Everything still under scrutiny must
/// read back exactly as the user left it.
pub struct SelectionOracle;

impl SelectionOracle {
    /// Run every per-step check against a live engine.
    #[must_use]
    pub fn check_live(
        engine: &SelectionEngine,
        intents: &IntentLedger,
        adapter_saves: u64,
        last_version: u64,
        step: u64,
    ) -> OracleResult {
        Self::check_records(engine.issues(), engine.diagnostics().len(), step)
            .merge(Self::check_version(engine.version().get(), last_version, step))
            .merge(Self::check_save_ledger(
                engine.save_stats(),
                engine.is_save_in_flight(),
                adapter_saves,
                step,
            ))
            .merge(Self::check_intents(engine, intents, step))
    }

    /// Structural sanity of the canonical list.
    #[must_use]
    pub fn check_records(
        issues: &[MaterialityIssue],
        diagnostics: usize,
        step: u64,
    ) -> OracleResult {
        let mut violations = Vec::new();
        let mut seen = std::collections::BTreeSet::new();

        for issue in issues {
            if !seen.insert(issue.id.clone()) {
                violations.push(InvariantViolation::DuplicateRecord {
                    step,
                    id: issue.id.to_string(),
                });
            }
            if issue.is_header() && issue.is_material {
                violations.push(InvariantViolation::MaterialHeader {
                    step,
                    id: issue.id.to_string(),
                });
            }
        }

        if diagnostics > 0 {
            violations.push(InvariantViolation::UnexpectedDiagnostics {
                step,
                count: diagnostics,
            });
        }

        violations.into()
    }

    /// The state version is monotonic.
    #[must_use]
    pub fn check_version(current: u64, last_seen: u64, step: u64) -> OracleResult {
        if current < last_seen {
            return OracleResult::fail(vec![InvariantViolation::VersionRegressed {
                step,
                from: last_seen,
                to: current,
            }]);
        }
        OracleResult::pass()
    }

    /// Save accounting: at most one batch outstanding, and the adapter's
    /// write count matches the engine's completion count.
    #[must_use]
    pub fn check_save_ledger(
        stats: &SaveStats,
        in_flight: bool,
        adapter_saves: u64,
        step: u64,
    ) -> OracleResult {
        let mut violations = Vec::new();
        let settled = stats.saves_completed + stats.saves_failed;
        let outstanding = stats.batches_cut.checked_sub(settled);
        let consistent = match outstanding {
            Some(0) => !in_flight,
            Some(1) => in_flight,
            _ => false,
        };
        if !consistent {
            violations.push(InvariantViolation::SaveLedgerSkew {
                step,
                batches_cut: stats.batches_cut,
                settled,
                in_flight,
            });
        }
        if adapter_saves != stats.saves_completed {
            violations.push(InvariantViolation::AdapterDrift {
                step,
                adapter_saves,
                completed: stats.saves_completed,
            });
        }
        violations.into()
    }

    /// Every intent no newer external update released must hold in the
    /// live records.
    #[must_use]
    pub fn check_intents(
        engine: &SelectionEngine,
        intents: &IntentLedger,
        step: u64,
    ) -> OracleResult {
        let mut violations = Vec::new();
        for (id, intent) in intents {
            if intent.overridden {
                continue;
            }
            match intent.kind {
                IntentKind::Selected | IntentKind::Deselected => {
                    let want_material = intent.kind == IntentKind::Selected;
                    let observed = match engine.get(id) {
                        None => Some("missing".to_string()),
                        Some(record) if record.is_material != want_material => {
                            Some(pool_word(record.is_material).to_string())
                        }
                        Some(_) => None,
                    };
                    if let Some(observed) = observed {
                        violations.push(InvariantViolation::IntentLost {
                            step,
                            id: id.to_string(),
                            intended: intent.kind,
                            observed,
                        });
                    }
                }
                IntentKind::Removed => {
                    if engine.get(id).is_some() {
                        violations.push(InvariantViolation::ResurrectedIssue {
                            step,
                            id: id.to_string(),
                        });
                    }
                }
            }
        }
        violations.into()
    }

    /// End-of-session checks after the driver drained echoes and saves.
    ///
    /// `saved` is the adapter's final list (None when no save ever
    /// landed). Intents that survived unreleased must be durable: a
    /// drained queue with a live intent means its save flushed, so the
    /// saved list has to agree with it.
    #[must_use]
    pub fn check_drained(
        engine: &SelectionEngine,
        intents: &IntentLedger,
        saved: Option<&[MaterialityIssue]>,
    ) -> OracleResult {
        let mut violations = Vec::new();

        if engine.is_dirty() || engine.is_save_in_flight() {
            violations.push(InvariantViolation::UnsavedChangesAtEnd {
                dirty: engine.is_dirty(),
                in_flight: engine.is_save_in_flight(),
            });
            return violations.into();
        }

        for (id, intent) in intents {
            if intent.overridden {
                continue;
            }
            let found = saved.and_then(|issues| issues.iter().find(|issue| issue.id == *id));
            let observed = match (intent.kind, found) {
                (IntentKind::Selected, Some(record)) if record.is_material => None,
                (IntentKind::Deselected, Some(record)) if !record.is_material => None,
                (IntentKind::Removed, None) => None,
                (IntentKind::Removed, Some(_)) => Some("still saved".to_string()),
                (_, Some(record)) => Some(pool_word(record.is_material).to_string()),
                (_, None) if saved.is_none() => Some("nothing saved".to_string()),
                (_, None) => Some("missing".to_string()),
            };
            if let Some(observed) = observed {
                violations.push(InvariantViolation::UnsavedIntent {
                    id: id.to_string(),
                    intended: intent.kind,
                    observed,
                });
            }
        }

        violations.into()
    }
}

const fn pool_word(is_material: bool) -> &'static str {
    if is_material { "selected" } else { "available" }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
