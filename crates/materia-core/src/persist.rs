//! Persistence seam: the adapter contract and the debounced save queue.
//!
//! The engine never performs I/O itself. Callers implement
//! [`PersistenceAdapter`] over whatever backend they have (REST client,
//! local file, in-memory fixture) and drive the [`SaveQueue`] poll cycle:
//!
//! 1. Mutations mark the queue dirty with a [`SaveClass`].
//! 2. `poll(now)` returns a [`SaveBatch`] once the quiet period for the
//!    tightest pending class has elapsed and no save is in flight.
//! 3. The caller hands the batch to the adapter, then reports back with
//!    `complete(seq, ok, now)`.
//!
//! # Debounce classes
//!
//! Each class carries its own quiet period so a burst of typing does not
//! hammer the backend while an explicit action still lands promptly:
//!
//! | class       | default quiet period |
//! |-------------|----------------------|
//! | `explicit`  | 300 ms               |
//! | `score_edit`| 1 s                  |
//! | `text_edit` | 2 s                  |
//! | `bulk`      | 4 s                  |
//!
//! Marks coalesce: the earliest deadline among pending marks wins, so a
//! slow-class mark never delays a fast-class one.
//!
//! # Failure model
//!
//! A failed save keeps the in-memory state untouched and re-marks the queue
//! dirty with the failed batch's class, so the write is retried after one
//! more quiet period. Batches always carry the full issue list; replaying
//! one is idempotent on the backend.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::DebounceConfig;
use crate::error::ErrorCode;
use crate::model::{MaterialityIssue, ParseEnumError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors an adapter can surface to the engine.
///
/// Both variants are recoverable. The engine keeps its in-memory state and
/// retries saves on the next debounce cycle; loads are retried by the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersistError {
    /// The backend failed to return the issue list for a report.
    #[error("failed to load issues for report '{report_id}': {reason}")]
    Load { report_id: String, reason: String },

    /// The backend rejected or lost a save.
    #[error("failed to save issues for report '{report_id}': {reason}")]
    Save { report_id: String, reason: String },
}

impl PersistError {
    /// Stable error code for this failure.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Load { .. } => ErrorCode::LoadFailed,
            Self::Save { .. } => ErrorCode::SaveFailed,
        }
    }
}

// ---------------------------------------------------------------------------
// Adapter trait
// ---------------------------------------------------------------------------

/// Abstraction over the storage backend.
///
/// Saves replace the whole issue list for a report (upsert keyed by
/// `(report_id, issue_id)` on the backend); the contract tolerates being
/// called with the same list repeatedly.
pub trait PersistenceAdapter {
    /// Fetch the canonical issue list for a report.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::Load`] if the backend cannot produce the list.
    fn load_issues(&mut self, report_id: &str) -> Result<Vec<MaterialityIssue>, PersistError>;

    /// Write the full issue list for a report.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::Save`] if the write did not take effect.
    fn save_issues(
        &mut self,
        report_id: &str,
        issues: &[MaterialityIssue],
    ) -> Result<(), PersistError>;
}

// ---------------------------------------------------------------------------
// Save class
// ---------------------------------------------------------------------------

/// What kind of edit made the state dirty.
///
/// Ordered from tightest to loosest quiet period, so `min` picks the class
/// that should flush first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveClass {
    /// Explicit user action: toggle, add, deselect.
    Explicit,
    /// Numeric relevance edit.
    ScoreEdit,
    /// Free-text edit (name, description).
    TextEdit,
    /// Bulk or ambient update (canonical reload, relevance merge).
    Bulk,
}

impl SaveClass {
    /// String form used in config files and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::ScoreEdit => "score_edit",
            Self::TextEdit => "text_edit",
            Self::Bulk => "bulk",
        }
    }

    /// Quiet period for this class under the given debounce config.
    #[must_use]
    pub const fn quiet_period_ms(&self, debounce: &DebounceConfig) -> i64 {
        match self {
            Self::Explicit => debounce.explicit_ms,
            Self::ScoreEdit => debounce.score_edit_ms,
            Self::TextEdit => debounce.text_edit_ms,
            Self::Bulk => debounce.bulk_ms,
        }
    }
}

impl fmt::Display for SaveClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SaveClass {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "explicit" => Ok(Self::Explicit),
            "score_edit" | "score" => Ok(Self::ScoreEdit),
            "text_edit" | "text" => Ok(Self::TextEdit),
            "bulk" => Ok(Self::Bulk),
            _ => Err(ParseEnumError {
                expected: "explicit, score_edit, text_edit, bulk",
                got: s.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Save batch
// ---------------------------------------------------------------------------

/// A snapshot of the canonical list, ready to hand to the adapter.
///
/// The sequence number identifies the batch when reporting completion;
/// completions for unknown sequences are ignored (stale callback).
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct SaveBatch {
    /// Monotonic batch sequence, starting at 1.
    pub seq: u64,
    /// Tightest class among the coalesced marks.
    pub class: SaveClass,
    /// Full canonical list at the moment the batch was cut.
    pub issues: Vec<MaterialityIssue>,
    /// When the batch was cut.
    pub cut_at_ms: i64,
}

/// Counters for observing save queue behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SaveStats {
    /// Batches handed out by `poll`.
    pub batches_cut: u64,
    /// Batches reported back as committed.
    pub saves_completed: u64,
    /// Batches reported back as failed.
    pub saves_failed: u64,
    /// Dirty marks that merged into an already-pending save.
    pub marks_coalesced: u64,
}

// ---------------------------------------------------------------------------
// Save queue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct PendingSave {
    class: SaveClass,
    due_at_ms: i64,
    first_marked_at_ms: i64,
}

#[derive(Debug, Clone, Copy)]
struct InFlightSave {
    seq: u64,
    class: SaveClass,
    begun_at_ms: i64,
}

/// Debounced, single-in-flight save scheduler.
///
/// Poll-driven and clock-free: every method takes `now_ms` from the caller,
/// so the queue behaves identically under a real clock and a simulated one.
#[derive(Debug, Clone)]
pub struct SaveQueue {
    debounce: DebounceConfig,
    pending: Option<PendingSave>,
    in_flight: Option<InFlightSave>,
    next_seq: u64,
    stats: SaveStats,
}

impl SaveQueue {
    /// Create a queue with the given debounce configuration.
    #[must_use]
    pub const fn new(debounce: DebounceConfig) -> Self {
        Self {
            debounce,
            pending: None,
            in_flight: None,
            next_seq: 1,
            stats: SaveStats {
                batches_cut: 0,
                saves_completed: 0,
                saves_failed: 0,
                marks_coalesced: 0,
            },
        }
    }

    /// Record that the canonical state changed.
    ///
    /// Coalesces with any pending mark: the class with the tighter quiet
    /// period wins, and the deadline only ever moves earlier.
    pub fn mark_dirty(&mut self, class: SaveClass, now_ms: i64) {
        let due = now_ms.saturating_add(class.quiet_period_ms(&self.debounce));
        match self.pending.as_mut() {
            Some(pending) => {
                pending.class = pending.class.min(class);
                pending.due_at_ms = pending.due_at_ms.min(due);
                self.stats.marks_coalesced += 1;
            }
            None => {
                self.pending = Some(PendingSave {
                    class,
                    due_at_ms: due,
                    first_marked_at_ms: now_ms,
                });
            }
        }
    }

    /// Cut a batch if a save is due and nothing is in flight.
    ///
    /// `issues` is the canonical list to snapshot into the batch.
    pub fn poll(&mut self, now_ms: i64, issues: &[MaterialityIssue]) -> Option<SaveBatch> {
        if self.in_flight.is_some() {
            return None;
        }
        let pending = self.pending?;
        if now_ms < pending.due_at_ms {
            return None;
        }

        self.pending = None;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.in_flight = Some(InFlightSave {
            seq,
            class: pending.class,
            begun_at_ms: now_ms,
        });
        self.stats.batches_cut += 1;

        debug!(
            seq,
            class = %pending.class,
            issues = issues.len(),
            waited_ms = now_ms - pending.first_marked_at_ms,
            "save batch cut"
        );

        Some(SaveBatch {
            seq,
            class: pending.class,
            issues: issues.to_vec(),
            cut_at_ms: now_ms,
        })
    }

    /// Report the outcome of a batch previously returned by [`Self::poll`].
    ///
    /// A failed batch re-marks the queue dirty with the batch's class so the
    /// write is retried after one more quiet period. Completions whose `seq`
    /// does not match the in-flight batch are logged and ignored.
    pub fn complete(&mut self, seq: u64, ok: bool, now_ms: i64) {
        let Some(flight) = self.in_flight else {
            warn!(seq, "save completion with nothing in flight, ignoring");
            return;
        };
        if flight.seq != seq {
            warn!(seq, in_flight = flight.seq, "stale save completion, ignoring");
            return;
        }

        self.in_flight = None;
        if ok {
            self.stats.saves_completed += 1;
            debug!(seq, elapsed_ms = now_ms - flight.begun_at_ms, "save committed");
        } else {
            self.stats.saves_failed += 1;
            warn!(seq, class = %flight.class, "save failed, scheduling retry");
            self.mark_dirty(flight.class, now_ms);
        }
    }

    /// True while a batch is out with the adapter.
    #[must_use]
    pub const fn is_save_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// True if unqueued dirt is waiting for its quiet period.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.pending.is_some()
    }

    /// Deadline of the pending save, if any.
    #[must_use]
    pub fn due_at_ms(&self) -> Option<i64> {
        self.pending.map(|p| p.due_at_ms)
    }

    /// Observability counters.
    #[must_use]
    pub const fn stats(&self) -> &SaveStats {
        &self.stats
    }
}

// ---------------------------------------------------------------------------
// In-memory adapter (for testing)
// ---------------------------------------------------------------------------

/// A [`PersistenceAdapter`] backed by a map, for tests and simulation.
///
/// Failure injection is one-shot: `fail_next_save` / `fail_next_load` trip
/// on the next matching call and reset themselves.
#[derive(Debug, Clone, Default)]
pub struct MemoryAdapter {
    reports: BTreeMap<String, Vec<MaterialityIssue>>,
    fail_next_save: bool,
    fail_next_load: bool,
    save_count: u64,
    load_count: u64,
}

impl MemoryAdapter {
    /// Create an empty adapter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a report's issue list.
    pub fn seed(&mut self, report_id: &str, issues: Vec<MaterialityIssue>) {
        self.reports.insert(report_id.to_string(), issues);
    }

    /// Make the next `save_issues` call fail.
    pub fn fail_next_save(&mut self) {
        self.fail_next_save = true;
    }

    /// Make the next `load_issues` call fail.
    pub fn fail_next_load(&mut self) {
        self.fail_next_load = true;
    }

    /// The last list saved for a report, if any.
    #[must_use]
    pub fn saved(&self, report_id: &str) -> Option<&[MaterialityIssue]> {
        self.reports.get(report_id).map(Vec::as_slice)
    }

    /// Number of successful saves.
    #[must_use]
    pub const fn save_count(&self) -> u64 {
        self.save_count
    }

    /// Number of successful loads.
    #[must_use]
    pub const fn load_count(&self) -> u64 {
        self.load_count
    }
}

impl PersistenceAdapter for MemoryAdapter {
    fn load_issues(&mut self, report_id: &str) -> Result<Vec<MaterialityIssue>, PersistError> {
        if self.fail_next_load {
            self.fail_next_load = false;
            return Err(PersistError::Load {
                report_id: report_id.to_string(),
                reason: "injected load failure".to_string(),
            });
        }
        self.load_count += 1;
        Ok(self.reports.get(report_id).cloned().unwrap_or_default())
    }

    fn save_issues(
        &mut self,
        report_id: &str,
        issues: &[MaterialityIssue],
    ) -> Result<(), PersistError> {
        if self.fail_next_save {
            self.fail_next_save = false;
            return Err(PersistError::Save {
                report_id: report_id.to_string(),
                reason: "injected save failure".to_string(),
            });
        }
        self.save_count += 1;
        self.reports.insert(report_id.to_string(), issues.to_vec());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IssueId;

    fn issue(id: &str) -> MaterialityIssue {
        MaterialityIssue {
            id: IssueId::new(id),
            name: format!("Issue {id}"),
            description: "desc".to_string(),
            impact_relevance: 10.0,
            financial_relevance: 20.0,
            is_material: false,
            stakeholder_relevance: None,
            iro_selections: None,
        }
    }

    fn queue() -> SaveQueue {
        SaveQueue::new(DebounceConfig::default())
    }

    // === Debounce timing ===

    #[test]
    fn poll_waits_for_the_quiet_period() {
        let mut q = queue();
        let issues = vec![issue("a")];

        q.mark_dirty(SaveClass::Explicit, 1_000);
        assert!(q.poll(1_000, &issues).is_none());
        assert!(q.poll(1_299, &issues).is_none());

        let batch = q.poll(1_300, &issues).unwrap();
        assert_eq!(batch.seq, 1);
        assert_eq!(batch.class, SaveClass::Explicit);
        assert_eq!(batch.issues, issues);
    }

    #[test]
    fn each_class_has_its_own_quiet_period() {
        let d = DebounceConfig::default();
        assert_eq!(SaveClass::Explicit.quiet_period_ms(&d), 300);
        assert_eq!(SaveClass::ScoreEdit.quiet_period_ms(&d), 1_000);
        assert_eq!(SaveClass::TextEdit.quiet_period_ms(&d), 2_000);
        assert_eq!(SaveClass::Bulk.quiet_period_ms(&d), 4_000);
    }

    #[test]
    fn empty_queue_never_cuts_a_batch() {
        let mut q = queue();
        assert!(q.poll(i64::MAX, &[]).is_none());
        assert!(!q.is_dirty());
    }

    // === Coalescing ===

    #[test]
    fn marks_coalesce_into_one_batch() {
        let mut q = queue();
        let issues = vec![issue("a")];

        q.mark_dirty(SaveClass::ScoreEdit, 0);
        q.mark_dirty(SaveClass::ScoreEdit, 100);
        q.mark_dirty(SaveClass::ScoreEdit, 200);

        let batch = q.poll(1_000, &issues).unwrap();
        assert_eq!(batch.seq, 1);
        assert_eq!(q.stats().marks_coalesced, 2);
        assert_eq!(q.stats().batches_cut, 1);

        // Nothing left after the batch is cut.
        q.complete(batch.seq, true, 1_050);
        assert!(q.poll(10_000, &issues).is_none());
    }

    #[test]
    fn tighter_class_pulls_the_deadline_earlier() {
        let mut q = queue();
        let issues = vec![issue("a")];

        // Text edit at t=0 would flush at 2000.
        q.mark_dirty(SaveClass::TextEdit, 0);
        // Explicit action at t=100 pulls it to 400.
        q.mark_dirty(SaveClass::Explicit, 100);

        assert_eq!(q.due_at_ms(), Some(400));
        assert!(q.poll(399, &issues).is_none());
        let batch = q.poll(400, &issues).unwrap();
        assert_eq!(batch.class, SaveClass::Explicit);
    }

    #[test]
    fn looser_class_never_pushes_the_deadline_later() {
        let mut q = queue();

        q.mark_dirty(SaveClass::Explicit, 0);
        q.mark_dirty(SaveClass::Bulk, 100);

        assert_eq!(q.due_at_ms(), Some(300));
    }

    // === In-flight flag ===

    #[test]
    fn only_one_save_in_flight() {
        let mut q = queue();
        let issues = vec![issue("a")];

        q.mark_dirty(SaveClass::Explicit, 0);
        let batch = q.poll(300, &issues).unwrap();
        assert!(q.is_save_in_flight());

        // New dirt accumulates but no second batch is cut.
        q.mark_dirty(SaveClass::Explicit, 310);
        assert!(q.poll(10_000, &issues).is_none());

        q.complete(batch.seq, true, 320);
        assert!(!q.is_save_in_flight());

        let follow_up = q.poll(10_000, &issues).unwrap();
        assert_eq!(follow_up.seq, 2);
    }

    #[test]
    fn dirt_marked_during_flight_respects_its_own_deadline() {
        let mut q = queue();
        let issues = vec![issue("a")];

        q.mark_dirty(SaveClass::Explicit, 0);
        let batch = q.poll(300, &issues).unwrap();

        q.mark_dirty(SaveClass::TextEdit, 400);
        q.complete(batch.seq, true, 500);

        // Text-edit deadline is 400 + 2000 = 2400.
        assert!(q.poll(2_399, &issues).is_none());
        assert!(q.poll(2_400, &issues).is_some());
    }

    // === Failure and retry ===

    #[test]
    fn failed_save_is_retried_after_a_quiet_period() {
        let mut q = queue();
        let issues = vec![issue("a")];

        q.mark_dirty(SaveClass::Explicit, 0);
        let batch = q.poll(300, &issues).unwrap();
        q.complete(batch.seq, false, 350);

        assert_eq!(q.stats().saves_failed, 1);
        assert!(q.is_dirty());
        assert!(!q.is_save_in_flight());

        // Retry after the explicit quiet period from the failure.
        assert!(q.poll(649, &issues).is_none());
        let retry = q.poll(650, &issues).unwrap();
        assert_eq!(retry.seq, 2);
        assert_eq!(retry.class, SaveClass::Explicit);
    }

    #[test]
    fn stale_completion_is_ignored() {
        let mut q = queue();
        let issues = vec![issue("a")];

        q.mark_dirty(SaveClass::Explicit, 0);
        let batch = q.poll(300, &issues).unwrap();

        // Wrong seq: flag must stay set.
        q.complete(batch.seq + 7, true, 310);
        assert!(q.is_save_in_flight());

        q.complete(batch.seq, true, 320);
        assert!(!q.is_save_in_flight());

        // Completion with nothing in flight is also a no-op.
        q.complete(batch.seq, true, 330);
        assert_eq!(q.stats().saves_completed, 1);
    }

    // === Class parsing ===

    #[test]
    fn save_class_round_trips_through_strings() {
        for class in [
            SaveClass::Explicit,
            SaveClass::ScoreEdit,
            SaveClass::TextEdit,
            SaveClass::Bulk,
        ] {
            assert_eq!(class.as_str().parse::<SaveClass>().unwrap(), class);
        }
        assert_eq!("  SCORE ".parse::<SaveClass>().unwrap(), SaveClass::ScoreEdit);
        assert!("weekly".parse::<SaveClass>().is_err());
    }

    // === Memory adapter ===

    #[test]
    fn memory_adapter_round_trips_saves() {
        let mut adapter = MemoryAdapter::new();
        let issues = vec![issue("a"), issue("b")];

        adapter.save_issues("report-1", &issues).unwrap();
        assert_eq!(adapter.load_issues("report-1").unwrap(), issues);
        assert_eq!(adapter.save_count(), 1);
        assert_eq!(adapter.load_count(), 1);

        // Unknown report loads as empty, not as an error.
        assert!(adapter.load_issues("report-2").unwrap().is_empty());
    }

    #[test]
    fn memory_adapter_failure_injection_is_one_shot() {
        let mut adapter = MemoryAdapter::new();
        let issues = vec![issue("a")];

        adapter.fail_next_save();
        let err = adapter.save_issues("r", &issues).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SaveFailed);

        // Second attempt goes through.
        adapter.save_issues("r", &issues).unwrap();
        assert_eq!(adapter.saved("r").unwrap(), issues.as_slice());

        adapter.fail_next_load();
        assert_eq!(
            adapter.load_issues("r").unwrap_err().code(),
            ErrorCode::LoadFailed
        );
        assert!(adapter.load_issues("r").is_ok());
    }
}
