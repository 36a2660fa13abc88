//! The selection engine facade.
//!
//! [`SelectionEngine`] wires the record store, the reconciliation
//! scheduler, the reconcile state, and the save queue behind one API:
//!
//! ```text
//! toggle/edit ─▶ store mutation ─▶ op + version ─▶ partition pass ─▶ adopt
//!                      │                                               │
//!                      ▼                                               ▼
//!                save queue (debounced)                       snapshot to render
//! ```
//!
//! # Time and I/O
//!
//! The engine is clock-free and I/O-free. Every method takes `now_ms`
//! (epoch millis) from the caller, and persistence happens through the
//! poll cycle: `poll_save` hands out a batch, the caller runs it against
//! its [`crate::persist::PersistenceAdapter`], then reports back through
//! `complete_save`. This keeps behaviour identical under a real clock and
//! a simulated one.
//!
//! # Race arbitration
//!
//! Externally recomputed inputs (`apply_canonical`, `apply_selected_ids`)
//! carry the [`StateVersion`] basis they were derived from. Local ops
//! stamped with a newer version override the incoming data: a selection
//! toggled after the basis keeps its local side, a custom issue removed
//! after the basis stays removed, and one added after the basis stays in
//! the list. For everything at or below the basis the incoming data is
//! authoritative and stale local memory is dropped. The wall-clock
//! freshness window in the partition rule order remains as a secondary
//! guard for hosts that cannot thread versions through.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::model::{FieldValue, IssueField, IssueId, MaterialityIssue, TemplateCatalog};
use crate::ops::OpKind;
use crate::partition::{PartitionDiagnostic, partition};
use crate::persist::{SaveBatch, SaveClass, SaveQueue, SaveStats};
use crate::reconcile::{ReconcileDecision, ReconcileTrigger, Reconciler};
use crate::relevance::merge_relevance;
use crate::snapshot::PartitionSnapshot;
use crate::state::{ReconcileState, StateVersion};
use crate::store::{AddOutcome, DeselectOutcome, IssueStore, StoreEffect, StoreError};

/// Materiality selection engine.
///
/// Single-threaded and event-driven: callbacks arrive one at a time and
/// each leaves the engine in a consistent state before returning.
#[derive(Debug, Clone)]
pub struct SelectionEngine {
    config: EngineConfig,
    store: IssueStore,
    state: ReconcileState,
    reconciler: Reconciler,
    save_queue: SaveQueue,
    /// Intended selection: the last external set, arbitrated against local
    /// ops, and kept current by local toggles. Sole selected-id input to
    /// partition passes.
    selected_ids: BTreeSet<IssueId>,
    diagnostics: Vec<PartitionDiagnostic>,
    last_decision: Option<ReconcileDecision>,
}

impl SelectionEngine {
    /// Create an empty engine over a caller-supplied template catalog.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid (negative durations, zero
    /// op-history cap, guard wider than the freshness window).
    pub fn new(config: EngineConfig, catalog: TemplateCatalog) -> anyhow::Result<Self> {
        config.validate()?;
        let store = IssueStore::new(catalog, config.op_history_cap);
        let reconciler = Reconciler::new(config.guard_window_ms, config.cooldown_ms);
        let save_queue = SaveQueue::new(config.debounce.clone());
        Ok(Self {
            config,
            store,
            state: ReconcileState::new(),
            reconciler,
            save_queue,
            selected_ids: BTreeSet::new(),
            diagnostics: Vec::new(),
            last_decision: None,
        })
    }

    // -- hydration ----------------------------------------------------------

    /// Load a canonical list and selected-id set, discarding all prior
    /// engine state (ops, reconcile memory, pending saves).
    ///
    /// Loaded `is_material` flags are folded into the intended selection
    /// once, here; afterwards selection truth lives in the selected-id
    /// set, the op log, and the reconcile state.
    pub fn initialize(
        &mut self,
        issues: Vec<MaterialityIssue>,
        selected_ids: BTreeSet<IssueId>,
        now_ms: i64,
    ) -> PartitionSnapshot {
        let catalog = self.store.catalog().clone();
        self.store = IssueStore::with_issues(catalog, issues, self.config.op_history_cap);
        self.state = ReconcileState::new();
        self.reconciler = Reconciler::new(self.config.guard_window_ms, self.config.cooldown_ms);
        self.save_queue = SaveQueue::new(self.config.debounce.clone());
        self.selected_ids = selected_ids;
        self.selected_ids.extend(self.store.material_ids());
        self.diagnostics.clear();

        self.reconcile(ReconcileTrigger::Init, now_ms);
        self.snapshot(now_ms)
    }

    // -- local mutations ----------------------------------------------------

    /// Select or deselect an issue (the render layer's toggle intent).
    ///
    /// # Errors
    ///
    /// Same as [`Self::set_field`].
    pub fn toggle(
        &mut self,
        id: &IssueId,
        select: bool,
        now_ms: i64,
    ) -> Result<StoreEffect, StoreError> {
        self.set_field(id, IssueField::IsMaterial, &FieldValue::Flag(select), now_ms)
    }

    /// Edit one field on a record.
    ///
    /// Selection edits re-partition immediately; other field edits only
    /// schedule a save (they cannot change pool membership).
    ///
    /// # Errors
    ///
    /// [`StoreError::IssueNotFound`] for unknown ids,
    /// [`StoreError::InvalidField`] when coercion rejects the value.
    pub fn set_field(
        &mut self,
        id: &IssueId,
        field: IssueField,
        value: &FieldValue,
        now_ms: i64,
    ) -> Result<StoreEffect, StoreError> {
        let effect = self.store.set_field(id, field, value, now_ms)?;
        if let Some(class) = effect.save_class() {
            self.save_queue.mark_dirty(class, now_ms);
        }
        if effect.is_applied() && field == IssueField::IsMaterial {
            if self.store.get(id).is_some_and(|issue| issue.is_material) {
                self.selected_ids.insert(id.clone());
            } else {
                self.selected_ids.remove(id);
            }
            self.reconcile(ReconcileTrigger::LocalMutation, now_ms);
        }
        Ok(effect)
    }

    /// Add an issue by display text; see the store for dedup rules.
    pub fn add_issue(&mut self, name: &str, description: &str, now_ms: i64) -> AddOutcome {
        let outcome = self.store.add_issue(name, description, now_ms);
        self.after_add(&outcome, now_ms);
        outcome
    }

    /// Add an issue under a caller-chosen id.
    ///
    /// # Errors
    ///
    /// [`StoreError::DuplicateId`] if the id is already in the list.
    pub fn add_issue_with_id(
        &mut self,
        id: IssueId,
        name: &str,
        description: &str,
        now_ms: i64,
    ) -> Result<AddOutcome, StoreError> {
        let outcome = self.store.add_issue_with_id(id, name, description, now_ms)?;
        self.after_add(&outcome, now_ms);
        Ok(outcome)
    }

    /// Deselect an issue: predefined records keep their row, custom
    /// records are removed entirely.
    ///
    /// # Errors
    ///
    /// [`StoreError::IssueNotFound`] for unknown ids.
    pub fn deselect(&mut self, id: &IssueId, now_ms: i64) -> Result<DeselectOutcome, StoreError> {
        let outcome = self.store.deselect(id, now_ms)?;
        if let Some(class) = outcome.save_class() {
            self.selected_ids.remove(id);
            self.save_queue.mark_dirty(class, now_ms);
            self.reconcile(ReconcileTrigger::LocalMutation, now_ms);
        }
        Ok(outcome)
    }

    // -- external updates ---------------------------------------------------

    /// Replace the canonical list with an externally recomputed one.
    ///
    /// `basis` is the engine version the sender derived its list from;
    /// records contradicted by newer local ops are fixed up before the
    /// list is adopted.
    pub fn apply_canonical(
        &mut self,
        issues: Vec<MaterialityIssue>,
        basis: StateVersion,
        now_ms: i64,
    ) -> ReconcileDecision {
        let fixed = self.arbitrate_canonical(issues, basis);
        self.store.replace_issues(fixed);
        self.reconcile(ReconcileTrigger::CanonicalUpdate, now_ms)
    }

    /// Replace the external selected-id set.
    ///
    /// Ids toggled locally after `basis` override the incoming set; for
    /// all other ids the set is authoritative and stale reconcile memory
    /// is dropped.
    pub fn apply_selected_ids(
        &mut self,
        selected: BTreeSet<IssueId>,
        basis: StateVersion,
        now_ms: i64,
    ) -> ReconcileDecision {
        let fixed = self.arbitrate_selected(selected, basis);
        self.selected_ids = fixed;
        self.reconcile(ReconcileTrigger::SelectionUpdate, now_ms)
    }

    /// Fold survey-aggregated stakeholder relevance into the records.
    ///
    /// Pool membership is untouched; the merge schedules a bulk save.
    pub fn apply_relevance(&mut self, relevance_by_id: &BTreeMap<IssueId, f64>, now_ms: i64) {
        let merged = merge_relevance(self.store.issues(), relevance_by_id);
        self.store.replace_issues(merged);
        self.save_queue.mark_dirty(SaveClass::Bulk, now_ms);
    }

    /// Housekeeping tick: runs a pass if a self-heal is due.
    pub fn tick(&mut self, now_ms: i64) -> ReconcileDecision {
        self.reconcile(ReconcileTrigger::Maintenance, now_ms)
    }

    // -- persistence cycle --------------------------------------------------

    /// Cut a save batch if one is due and none is in flight.
    pub fn poll_save(&mut self, now_ms: i64) -> Option<SaveBatch> {
        self.save_queue.poll(now_ms, self.store.issues())
    }

    /// Report the adapter's verdict on a batch from [`Self::poll_save`].
    ///
    /// Failures keep the in-memory state and schedule a retry; optimistic
    /// edits are never rolled back.
    pub fn complete_save(&mut self, seq: u64, ok: bool, now_ms: i64) {
        self.save_queue.complete(seq, ok, now_ms);
    }

    // -- views --------------------------------------------------------------

    /// Owned snapshot of both pools for the render layer.
    #[must_use]
    pub fn snapshot(&self, now_ms: i64) -> PartitionSnapshot {
        PartitionSnapshot::capture(self.store.issues(), self.store.version(), now_ms)
    }

    /// Canonical list in its current adopted form.
    #[must_use]
    pub fn issues(&self) -> &[MaterialityIssue] {
        self.store.issues()
    }

    /// Look up a record by id.
    #[must_use]
    pub fn get(&self, id: &IssueId) -> Option<&MaterialityIssue> {
        self.store.get(id)
    }

    /// True while a recorded op for `id` is inside the freshness window.
    #[must_use]
    pub fn is_fresh(&self, id: &IssueId, now_ms: i64) -> bool {
        self.store
            .ops()
            .is_fresh(id, self.config.freshness_window_ms, now_ms)
    }

    /// Current state version (bumped by every applied local mutation).
    #[must_use]
    pub const fn version(&self) -> StateVersion {
        self.store.version()
    }

    /// Diagnostics from the most recent partition pass.
    #[must_use]
    pub fn diagnostics(&self) -> &[PartitionDiagnostic] {
        &self.diagnostics
    }

    /// Outcome of the most recent reconciliation check.
    #[must_use]
    pub const fn last_decision(&self) -> Option<ReconcileDecision> {
        self.last_decision
    }

    #[must_use]
    pub const fn is_save_in_flight(&self) -> bool {
        self.save_queue.is_save_in_flight()
    }

    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.save_queue.is_dirty()
    }

    #[must_use]
    pub const fn save_stats(&self) -> &SaveStats {
        self.save_queue.stats()
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -- internals ----------------------------------------------------------

    fn after_add(&mut self, outcome: &AddOutcome, now_ms: i64) {
        if let Some(class) = outcome.save_class() {
            self.selected_ids.insert(outcome.id.clone());
            self.save_queue.mark_dirty(class, now_ms);
            self.reconcile(ReconcileTrigger::LocalMutation, now_ms);
        }
    }

    fn reconcile(&mut self, trigger: ReconcileTrigger, now_ms: i64) -> ReconcileDecision {
        let selected = self.selected_ids.clone();
        let decision = self.reconciler.decide(
            trigger,
            &selected,
            self.store.issues(),
            self.store.ops(),
            now_ms,
        );
        if decision.should_run() {
            self.run_pass(&selected, now_ms);
        }
        self.last_decision = Some(decision);
        decision
    }

    fn run_pass(&mut self, selected: &BTreeSet<IssueId>, now_ms: i64) {
        self.reconciler.begin();
        let outcome = partition(
            self.store.issues(),
            selected,
            &self.state,
            self.store.ops(),
            now_ms,
            self.config.freshness_window_ms,
        );
        self.store.adopt(&outcome);
        self.reconciler.complete(&outcome, selected, now_ms);

        self.state = outcome.state;
        let live: BTreeSet<IssueId> = self
            .store
            .issues()
            .iter()
            .filter(|issue| !issue.id.is_blank())
            .map(|issue| issue.id.clone())
            .collect();
        self.state.retain_ids(&live);

        if !outcome.diagnostics.is_empty() {
            warn!(
                count = outcome.diagnostics.len(),
                "partition pass produced diagnostics"
            );
        }
        self.diagnostics = outcome.diagnostics;
    }

    fn arbitrate_canonical(
        &self,
        mut incoming: Vec<MaterialityIssue>,
        basis: StateVersion,
    ) -> Vec<MaterialityIssue> {
        // Custom issues removed locally after the basis stay removed.
        incoming.retain(|issue| {
            let removed_locally = issue.id.is_custom()
                && self.store.get(&issue.id).is_none()
                && self
                    .store
                    .ops()
                    .latest(&issue.id)
                    .is_some_and(|op| op.version > basis && op.kind == OpKind::Deselect);
            if removed_locally {
                debug!(id = %issue.id, %basis, "dropping resurrected custom issue");
            }
            !removed_locally
        });

        // Selection flags toggled after the basis keep their local side even
        // when the next pass is deferred. Other fields are last-writer-wins.
        for issue in &mut incoming {
            if let Some(op) = self.store.ops().latest(&issue.id) {
                if op.version > basis {
                    issue.is_material = op.kind == OpKind::Select;
                }
            }
        }

        // Issues touched locally after the basis must not vanish because
        // the sender has not seen them yet.
        let present: BTreeSet<&IssueId> = incoming.iter().map(|issue| &issue.id).collect();
        let mut carried = Vec::new();
        for issue in self.store.issues() {
            let newer_op = self
                .store
                .ops()
                .latest(&issue.id)
                .is_some_and(|op| op.version > basis);
            if newer_op && !present.contains(&issue.id) {
                debug!(id = %issue.id, %basis, "carrying local issue missing from stale canonical");
                carried.push(issue.clone());
            }
        }
        incoming.extend(carried);
        incoming
    }

    fn arbitrate_selected(
        &mut self,
        mut selected: BTreeSet<IssueId>,
        basis: StateVersion,
    ) -> BTreeSet<IssueId> {
        // Newer local ops override the incoming set.
        for op in self.store.ops().iter() {
            if op.version > basis {
                match op.kind {
                    OpKind::Select => {
                        selected.insert(op.id.clone());
                        self.state.note_selected(&op.id);
                    }
                    OpKind::Deselect => {
                        selected.remove(&op.id);
                        self.state.note_deselected(&op.id);
                    }
                }
            }
        }

        // Everything else: the set is authoritative, so stale reconcile
        // memory that contradicts it must go.
        let remembered: Vec<IssueId> = self
            .state
            .known_material()
            .iter()
            .chain(self.state.explicitly_deselected().iter())
            .cloned()
            .collect();
        for id in remembered {
            let newer_op = self
                .store
                .ops()
                .latest(&id)
                .is_some_and(|op| op.version > basis);
            if newer_op {
                continue;
            }
            if selected.contains(&id) {
                self.state.note_selected(&id);
            } else {
                self.state.forget(&id);
            }
        }
        selected
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IssueTemplate;
    use crate::partition::Pool;
    use crate::reconcile::{RunReason, SkipReason};

    const T0: i64 = 1_000_000;

    fn predefined(id: &str, material: bool) -> MaterialityIssue {
        MaterialityIssue {
            id: IssueId::new(id),
            name: id.to_uppercase(),
            description: format!("{id} description"),
            impact_relevance: 30.0,
            financial_relevance: 40.0,
            is_material: material,
            ..MaterialityIssue::default()
        }
    }

    fn header(id: &str) -> MaterialityIssue {
        MaterialityIssue {
            id: IssueId::new(id),
            name: id.to_uppercase(),
            ..MaterialityIssue::default()
        }
    }

    fn ids(raw: &[&str]) -> BTreeSet<IssueId> {
        raw.iter().map(|id| IssueId::new(*id)).collect()
    }

    fn engine() -> SelectionEngine {
        SelectionEngine::new(EngineConfig::default(), TemplateCatalog::default()).unwrap()
    }

    fn engine_with(
        issues: Vec<MaterialityIssue>,
        selected: BTreeSet<IssueId>,
    ) -> SelectionEngine {
        let mut engine = engine();
        engine.initialize(issues, selected, T0);
        engine
    }

    // === Hydration ===

    #[test]
    fn initialize_partitions_and_adopts_flags() {
        let mut engine = engine();
        let snapshot = engine.initialize(
            vec![
                predefined("water", false),
                predefined("waste", false),
                header("env"),
            ],
            ids(&["water"]),
            T0,
        );

        assert_eq!(snapshot.pool_of(&IssueId::new("water")), Some(Pool::Selected));
        assert_eq!(snapshot.pool_of(&IssueId::new("waste")), Some(Pool::Available));
        assert_eq!(snapshot.pool_of(&IssueId::new("env")), None);
        assert!(engine.get(&IssueId::new("water")).unwrap().is_material);
        assert_eq!(
            engine.last_decision(),
            Some(ReconcileDecision::Run(RunReason::FirstRun))
        );
    }

    #[test]
    fn initialize_honours_loaded_material_flags() {
        // Flags from storage count even when the selected set is empty.
        let engine = engine_with(vec![predefined("water", true)], ids(&[]));
        assert!(engine.get(&IssueId::new("water")).unwrap().is_material);
        assert_eq!(
            engine.snapshot(T0).pool_of(&IssueId::new("water")),
            Some(Pool::Selected)
        );
    }

    // === Toggle round-trip ===

    #[test]
    fn toggle_round_trip_returns_to_available() {
        let mut engine = engine_with(vec![predefined("water", false)], ids(&[]));
        let id = IssueId::new("water");

        engine.toggle(&id, true, T0 + 100).unwrap();
        assert!(engine.get(&id).unwrap().is_material);
        assert_eq!(engine.snapshot(T0 + 100).pool_of(&id), Some(Pool::Selected));

        engine.toggle(&id, false, T0 + 200).unwrap();
        assert!(!engine.get(&id).unwrap().is_material);
        assert_eq!(engine.snapshot(T0 + 200).pool_of(&id), Some(Pool::Available));
    }

    #[test]
    fn toggle_on_header_changes_nothing() {
        let mut engine = engine_with(vec![header("env")], ids(&[]));
        let id = IssueId::new("env");

        let effect = engine.toggle(&id, true, T0 + 100).unwrap();
        assert_eq!(effect, StoreEffect::HeaderIgnored);
        assert!(!engine.get(&id).unwrap().is_material);
        assert_eq!(engine.snapshot(T0 + 100).pool_of(&id), None);
        assert!(!engine.is_dirty());
    }

    #[test]
    fn toggle_unknown_id_is_an_error() {
        let mut engine = engine_with(vec![], ids(&[]));
        assert!(engine.toggle(&IssueId::new("ghost"), true, T0).is_err());
    }

    // === Freshness and version arbitration ===

    #[test]
    fn fresh_local_select_survives_stale_selected_set() {
        let mut engine = engine_with(vec![predefined("water", false)], ids(&[]));
        let id = IssueId::new("water");

        let basis = engine.version();
        engine.toggle(&id, true, T0 + 100).unwrap();

        // Stale echo: derived before the toggle, does not list the id.
        engine.apply_selected_ids(ids(&[]), basis, T0 + 150);
        assert!(engine.get(&id).unwrap().is_material);

        // Still selected well past guard and cool-down.
        engine.apply_selected_ids(ids(&[]), basis, T0 + 100 + 5_000);
        assert!(engine.get(&id).unwrap().is_material);
    }

    #[test]
    fn authoritative_selected_set_clears_sticky_selection() {
        let mut engine = engine_with(vec![predefined("water", true)], ids(&["water"]));
        let id = IssueId::new("water");

        // Sender saw every local mutation: basis is current.
        let decision = engine.apply_selected_ids(ids(&[]), engine.version(), T0 + 10_000);
        assert_eq!(decision, ReconcileDecision::Run(RunReason::SelectionDelta));
        assert!(!engine.get(&id).unwrap().is_material);
        assert_eq!(
            engine.snapshot(T0 + 10_000).pool_of(&id),
            Some(Pool::Available)
        );
    }

    #[test]
    fn stale_canonical_cannot_drop_a_new_custom_issue() {
        let mut engine = engine_with(vec![predefined("water", false)], ids(&[]));

        let basis = engine.version();
        let added = engine.add_issue("Ad-hoc topic", "desc", T0 + 100);

        // Canonical recomputation from before the add.
        engine.apply_canonical(vec![predefined("water", false)], basis, T0 + 200);

        assert!(engine.get(&added.id).is_some());
        assert!(engine.get(&added.id).unwrap().is_material);
    }

    #[test]
    fn stale_canonical_cannot_resurrect_a_removed_custom_issue() {
        let mut engine = engine_with(vec![predefined("water", false)], ids(&[]));
        let added = engine.add_issue("Ad-hoc topic", "desc", T0 + 100);
        let stale_snapshot = engine.issues().to_vec();

        let basis = engine.version();
        engine.deselect(&added.id, T0 + 200).unwrap();
        assert!(engine.get(&added.id).is_none());

        // Echo carrying the removed record, derived before the removal.
        engine.apply_canonical(stale_snapshot, basis, T0 + 300);
        assert!(engine.get(&added.id).is_none());
    }

    #[test]
    fn stale_canonical_inside_cooldown_cannot_revert_a_toggle() {
        let mut engine = engine_with(vec![predefined("water", false)], ids(&[]));
        let id = IssueId::new("water");

        let basis = engine.version();
        let echo = engine.issues().to_vec();
        engine.toggle(&id, true, T0 + 100).unwrap();

        // The echo is applied while the scheduler is cooling down, so no
        // pass runs to repair anything; the arbitrated flag must already
        // be right.
        let decision = engine.apply_canonical(echo, basis, T0 + 200);
        assert_eq!(decision, ReconcileDecision::Skip(SkipReason::CoolingDown));
        assert!(engine.get(&id).unwrap().is_material);
    }

    #[test]
    fn current_basis_canonical_is_adopted_as_is() {
        let mut engine = engine_with(vec![predefined("water", false)], ids(&[]));

        engine.apply_canonical(
            vec![predefined("water", false), predefined("waste", false)],
            engine.version(),
            T0 + 10_000,
        );

        assert_eq!(engine.issues().len(), 2);
        assert!(engine.get(&IssueId::new("waste")).is_some());
    }

    // === add_issue ===

    #[test]
    fn add_issue_lands_in_selected_pool() {
        let mut engine = engine_with(vec![], ids(&[]));

        let outcome = engine.add_issue("Gestione rifiuti", "desc", T0 + 100);
        assert!(outcome.created);

        let snapshot = engine.snapshot(T0 + 100);
        assert_eq!(snapshot.pool_of(&outcome.id), Some(Pool::Selected));
        assert_eq!(snapshot.selected.len(), 1);
        assert!(engine.is_fresh(&outcome.id, T0 + 100));
        assert!(engine.is_dirty());
    }

    #[test]
    fn add_issue_dedup_does_not_dirty_the_queue() {
        let catalog = TemplateCatalog::new(vec![IssueTemplate::new(
            "waste",
            "Gestione rifiuti",
            "Rifiuti e riciclo",
        )]);
        let mut engine = SelectionEngine::new(EngineConfig::default(), catalog).unwrap();
        engine.initialize(
            vec![MaterialityIssue {
                id: IssueId::new("waste"),
                name: "Gestione rifiuti".to_string(),
                description: "Rifiuti e riciclo".to_string(),
                impact_relevance: 20.0,
                financial_relevance: 20.0,
                is_material: true,
                ..MaterialityIssue::default()
            }],
            ids(&["waste"]),
            T0,
        );

        let outcome = engine.add_issue("Gestione rifiuti", "Rifiuti e riciclo", T0 + 100);
        assert!(!outcome.created);
        assert_eq!(outcome.id, IssueId::new("waste"));
        assert!(!engine.is_dirty());
        assert_eq!(engine.issues().len(), 1);
    }

    // === deselect ===

    #[test]
    fn deselect_predefined_keeps_the_record_available() {
        let mut engine = engine_with(vec![predefined("water", true)], ids(&["water"]));
        let id = IssueId::new("water");

        let outcome = engine.deselect(&id, T0 + 100).unwrap();
        assert_eq!(outcome, DeselectOutcome::Deselected);
        assert_eq!(engine.snapshot(T0 + 100).pool_of(&id), Some(Pool::Available));

        // The external set still lists the id and the op has aged out of
        // the freshness window, but the remembered deselect holds.
        engine.tick(T0 + 10_000);
        assert_eq!(engine.snapshot(T0 + 10_000).pool_of(&id), Some(Pool::Available));
        assert!(!engine.get(&id).unwrap().is_material);
    }

    #[test]
    fn deselect_custom_removes_it_everywhere() {
        let mut engine = engine_with(vec![], ids(&[]));
        let added = engine.add_issue("Ad-hoc", "desc", T0 + 100);

        let outcome = engine.deselect(&added.id, T0 + 200).unwrap();
        assert_eq!(outcome, DeselectOutcome::Removed);

        let snapshot = engine.snapshot(T0 + 200);
        assert_eq!(snapshot.pool_of(&added.id), None);
        assert!(snapshot.is_empty());
    }

    // === Field edits ===

    #[test]
    fn score_edit_schedules_a_save_without_repartitioning() {
        let mut engine = engine_with(vec![predefined("water", false)], ids(&[]));
        let id = IssueId::new("water");
        let decision_before = engine.last_decision();

        engine
            .set_field(
                &id,
                IssueField::ImpactRelevance,
                &FieldValue::Number(88.0),
                T0 + 100,
            )
            .unwrap();

        assert!(engine.is_dirty());
        assert_eq!(engine.last_decision(), decision_before);
        assert!((engine.get(&id).unwrap().impact_relevance - 88.0).abs() < f64::EPSILON);
    }

    #[test]
    fn relevance_merge_keeps_pools_and_dirties_bulk() {
        let mut engine = engine_with(
            vec![predefined("water", true), predefined("waste", false)],
            ids(&["water"]),
        );

        let relevance: BTreeMap<IssueId, f64> = [(IssueId::new("water"), 77.0)].into();
        engine.apply_relevance(&relevance, T0 + 100);

        let water = engine.get(&IssueId::new("water")).unwrap();
        assert_eq!(water.stakeholder_relevance, Some(77.0));
        assert!(water.is_material);
        assert_eq!(engine.get(&IssueId::new("waste")).unwrap().stakeholder_relevance, None);

        // Bulk debounce: not due before 4 s of quiet.
        assert!(engine.poll_save(T0 + 100 + 3_999).is_none());
        assert!(engine.poll_save(T0 + 100 + 4_000).is_some());
    }

    // === Save lifecycle ===

    #[test]
    fn toggle_save_cycle_round_trips_through_an_adapter() {
        use crate::persist::{MemoryAdapter, PersistenceAdapter};

        let mut engine = engine_with(vec![predefined("water", false)], ids(&[]));
        let mut adapter = MemoryAdapter::new();
        let id = IssueId::new("water");

        engine.toggle(&id, true, T0 + 100).unwrap();
        assert!(engine.poll_save(T0 + 100).is_none());

        let batch = engine.poll_save(T0 + 400).unwrap();
        assert!(engine.is_save_in_flight());
        let ok = adapter.save_issues("report-1", &batch.issues).is_ok();
        engine.complete_save(batch.seq, ok, T0 + 450);

        assert!(!engine.is_save_in_flight());
        assert!(!engine.is_dirty());
        let saved = adapter.saved("report-1").unwrap();
        assert!(saved.iter().any(|issue| issue.id == id && issue.is_material));
    }

    #[test]
    fn failed_save_keeps_state_and_retries() {
        let mut engine = engine_with(vec![predefined("water", false)], ids(&[]));
        let id = IssueId::new("water");

        engine.toggle(&id, true, T0 + 100).unwrap();
        let batch = engine.poll_save(T0 + 400).unwrap();
        engine.complete_save(batch.seq, false, T0 + 500);

        // Optimistic edit survives; a retry batch appears after a quiet
        // period.
        assert!(engine.get(&id).unwrap().is_material);
        let retry = engine.poll_save(T0 + 800).unwrap();
        assert_eq!(retry.seq, batch.seq + 1);
        assert_eq!(engine.save_stats().saves_failed, 1);
    }

    // === Scheduling behaviour ===

    #[test]
    fn identical_external_set_skips_after_cooldown() {
        let mut engine = engine_with(vec![predefined("water", false)], ids(&["water"]));

        let decision = engine.apply_selected_ids(
            ids(&["water"]),
            engine.version(),
            T0 + engine.config().cooldown_ms + 1_000,
        );
        assert_eq!(decision, ReconcileDecision::Skip(SkipReason::NoChange));
    }

    #[test]
    fn external_update_inside_cooldown_is_deferred() {
        let mut engine = engine_with(vec![predefined("water", false)], ids(&[]));

        let decision = engine.apply_selected_ids(ids(&["water"]), engine.version(), T0 + 100);
        assert_eq!(decision, ReconcileDecision::Skip(SkipReason::CoolingDown));

        // The change is not lost: once the cool-down expires a tick heals
        // the desync.
        let decision = engine.tick(T0 + engine.config().cooldown_ms + 200);
        assert_eq!(decision, ReconcileDecision::Run(RunReason::SelectionDelta));
        assert!(engine.get(&IssueId::new("water")).unwrap().is_material);
    }

    #[test]
    fn self_heal_reverts_flags_flipped_behind_the_engines_back() {
        let mut engine = engine_with(
            vec![predefined("water", false), predefined("waste", false)],
            ids(&[]),
        );

        // Host code hands over a list with a contradicting flag and a
        // matching basis (no local ops since).
        let mut tampered = engine.issues().to_vec();
        tampered[1].is_material = true;
        let decision = engine.apply_canonical(
            tampered,
            engine.version(),
            T0 + engine.config().cooldown_ms + 100,
        );
        assert_eq!(decision, ReconcileDecision::Run(RunReason::SelfHeal));

        // The pass restored flag/pool agreement: no selection input backs
        // the flag, so it reverts.
        assert!(!engine.get(&IssueId::new("waste")).unwrap().is_material);
    }

    // === Config validation ===

    #[test]
    fn new_rejects_invalid_config() {
        let config = EngineConfig {
            guard_window_ms: -1,
            ..EngineConfig::default()
        };
        assert!(SelectionEngine::new(config, TemplateCatalog::default()).is_err());
    }
}
