//! Random editing sessions against a live selection engine.
//!
//! One simulation is a host event loop under test. Each step advances a
//! simulated clock, performs a render-layer action (toggle, edit, add,
//! deselect), and lets faults play out: backend echoes captured at an old
//! state version and applied steps later, save completions that arrive
//! late or report failure, and completion callbacks with bogus sequence
//! numbers. Every choice draws from [`DeterministicRng`], so a seed fully
//! determines the run and any failure replays exactly.
//!
//! Alongside the engine the driver keeps an intent ledger: what the
//! simulated user last did to each issue and at which state version. An
//! external update whose basis is at or past an intent's version releases
//! it (either side may then win); everything still held is checked by the
//! oracle after every step.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use anyhow::{Context, ensure};
use serde::{Deserialize, Serialize};
use tracing::debug;

use materia_core::{
    DeselectOutcome, EngineConfig, FieldValue, IssueField, IssueId, IssueTemplate,
    MaterialityIssue, MemoryAdapter, PartitionSnapshot, PersistenceAdapter, SaveStats,
    SelectionEngine, StateVersion, TemplateCatalog,
};

use crate::clock::{ClockConfig, SimulatedClock};
use crate::oracle::{InvariantViolation, SelectionOracle};
use crate::rng::DeterministicRng;

/// Report id used by every simulated session.
pub const REPORT_ID: &str = "sim-report";

// ── Configuration ─────────────────────────────────────────────────────────────

/// Fault injection knobs for a simulated session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Percentage chance per step that a backend echo is captured.
    pub echo_rate_percent: u8,
    /// Maximum steps an echo stays in flight before it is applied.
    pub echo_max_delay_steps: u8,
    /// Percentage chance that a captured echo diverges from engine state,
    /// as if someone edited the same report on the backend side.
    pub echo_mutate_percent: u8,
    /// Percentage chance that a save completion reports failure.
    pub save_fail_percent: u8,
    /// Maximum steps between cutting a batch and its completion callback.
    pub save_max_delay_steps: u8,
    /// Percentage chance per step of a completion callback carrying a
    /// sequence number the engine never issued.
    pub stray_completion_percent: u8,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            echo_rate_percent: 35,
            echo_max_delay_steps: 6,
            echo_mutate_percent: 20,
            save_fail_percent: 8,
            save_max_delay_steps: 3,
            stray_completion_percent: 2,
        }
    }
}

/// Full configuration for one simulated session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// RNG seed; identical seeds produce identical runs.
    pub seed: u64,
    /// Number of event-loop steps before the session drains.
    pub steps: u64,
    /// Predefined rows in the seeded report, headers included.
    pub catalog_size: usize,
    /// A header row every N positions; zero disables headers.
    pub header_every: usize,
    /// Engine tuning for the session.
    pub engine: EngineConfig,
    /// Event timing profile.
    pub clock: ClockConfig,
    /// Fault injection knobs.
    pub fault: FaultConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            steps: 150,
            catalog_size: 18,
            header_every: 6,
            engine: EngineConfig {
                op_history_cap: 512,
                ..EngineConfig::default()
            },
            clock: ClockConfig::default(),
            fault: FaultConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Validate the configuration before a run.
    ///
    /// # Errors
    ///
    /// Returns an error for zero steps or catalog rows, out-of-range
    /// percentages, a broken clock profile, an invalid engine config, or
    /// an op-history cap too small to track every id a run can touch
    /// (eviction would silently disarm the intent ledger).
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.steps > 0, "steps must be > 0");
        ensure!(self.steps <= 100_000, "steps must be <= 100000");
        ensure!(self.catalog_size > 0, "catalog_size must be > 0");
        for (name, value) in [
            ("echo_rate_percent", self.fault.echo_rate_percent),
            ("echo_mutate_percent", self.fault.echo_mutate_percent),
            ("save_fail_percent", self.fault.save_fail_percent),
            ("stray_completion_percent", self.fault.stray_completion_percent),
        ] {
            ensure!(value <= 100, "{name} must be <= 100");
        }
        ensure!(self.clock.min_step_ms >= 0, "min_step_ms must be >= 0");
        ensure!(
            self.clock.max_step_ms >= self.clock.min_step_ms,
            "max_step_ms must be >= min_step_ms"
        );
        self.engine.validate()?;
        let ids_touched = self.catalog_size as u64 + self.steps;
        ensure!(
            self.engine.op_history_cap as u64 >= ids_touched,
            "op_history_cap must cover catalog_size + steps ({ids_touched})"
        );
        Ok(())
    }
}

// ── Intent ledger ─────────────────────────────────────────────────────────────

/// What the simulated user last did to an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    /// Toggled on or added; must read back material.
    Selected,
    /// Toggled off or deselected in place; must read back non-material.
    Deselected,
    /// Custom issue removed; must stay gone.
    Removed,
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Selected => "selected",
            Self::Deselected => "deselected",
            Self::Removed => "removed",
        })
    }
}

/// One ledger entry: the intent, when it happened, and whether a newer
/// external update has released it from scrutiny.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentRecord {
    /// Direction of the last local action on this id.
    pub kind: IntentKind,
    /// Engine state version right after the action.
    pub version: StateVersion,
    /// An external update with a basis at or past `version` arrived.
    pub overridden: bool,
}

/// Ledger of outstanding user intents, keyed by issue id.
pub type IntentLedger = BTreeMap<IssueId, IntentRecord>;

// ── Trace ─────────────────────────────────────────────────────────────────────

/// Which external artifact an echo carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EchoKind {
    /// A selected-id set, as a planning surface would push it.
    SelectedIds,
    /// A full recomputed canonical list.
    Canonical,
}

/// One recorded event in a session's trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Step the event happened on.
    pub step: u64,
    /// Simulated time of the event.
    pub at_ms: i64,
    /// What happened.
    pub action: TraceAction,
}

/// The action behind a trace event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceAction {
    Toggle { id: IssueId, select: bool },
    EditField { id: IssueId, field: String },
    Add { id: IssueId, created: bool },
    Deselect { id: IssueId, removed: bool },
    RelevanceMerge { touched: usize },
    Tick { decision: String },
    EchoCaptured { kind: EchoKind, basis: u64, deliver_at_step: u64 },
    EchoApplied { kind: EchoKind, basis: u64, decision: String },
    SaveCut { seq: u64, class: String, records: usize },
    SaveSettled { seq: u64, ok: bool },
    StrayCompletion,
}

/// Per-action counters for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCounts {
    pub toggles: u64,
    pub field_edits: u64,
    pub adds: u64,
    pub deselects: u64,
    pub relevance_merges: u64,
    pub ticks: u64,
    pub idle_steps: u64,
    pub echoes_captured: u64,
    pub echoes_applied: u64,
    pub intents_released: u64,
    pub saves_cut: u64,
    pub saves_settled: u64,
    pub failed_saves_injected: u64,
    pub stray_completions: u64,
}

// ── Result ────────────────────────────────────────────────────────────────────

/// Everything a finished session leaves behind.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationResult {
    /// Seed the session ran under.
    pub seed: u64,
    /// Steps executed, drain steps included.
    pub steps_run: u64,
    /// Engine state version at the end.
    pub final_version: u64,
    /// Final pool split.
    pub final_snapshot: PartitionSnapshot,
    /// Engine save counters at the end.
    pub save_stats: SaveStats,
    /// Successful writes the adapter performed.
    pub adapter_saves: u64,
    /// Per-action counters.
    pub counts: ActionCounts,
    /// Every invariant violation the oracle found, in step order.
    pub violations: Vec<InvariantViolation>,
    /// Full event trace for replay comparison and debugging.
    pub trace: Vec<TraceEvent>,
}

impl SimulationResult {
    /// Whether the session held every invariant.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

// ── Pending fault state ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum EchoPayload {
    SelectedIds(BTreeSet<IssueId>),
    Canonical(Vec<MaterialityIssue>),
}

impl EchoPayload {
    const fn kind(&self) -> EchoKind {
        match self {
            Self::SelectedIds(_) => EchoKind::SelectedIds,
            Self::Canonical(_) => EchoKind::Canonical,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingEcho {
    deliver_at_step: u64,
    basis: StateVersion,
    payload: EchoPayload,
}

#[derive(Debug, Clone)]
struct PendingReply {
    deliver_at_step: u64,
    seq: u64,
    ok: bool,
    issues: Vec<MaterialityIssue>,
}

// ── Simulation ────────────────────────────────────────────────────────────────

/// One seeded session: engine, adapter, fault queues, and bookkeeping.
#[derive(Debug)]
pub struct Simulation {
    config: SimulationConfig,
    rng: DeterministicRng,
    clock: SimulatedClock,
    engine: SelectionEngine,
    adapter: MemoryAdapter,
    templates: Vec<IssueTemplate>,
    pending_echoes: Vec<PendingEcho>,
    pending_reply: Option<PendingReply>,
    intents: IntentLedger,
    counts: ActionCounts,
    violations: Vec<InvariantViolation>,
    trace: Vec<TraceEvent>,
    step_index: u64,
    last_version: u64,
    custom_seq: u64,
    now_ms: i64,
}

impl Simulation {
    /// Build a session: seeded report rows in the adapter and a hydrated
    /// engine over them.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration fails validation.
    pub fn new(config: SimulationConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let rng = DeterministicRng::new(config.seed);
        let clock = SimulatedClock::new(config.clock);
        let (templates, records, selected) =
            seed_report(config.catalog_size, config.header_every);

        let mut engine = SelectionEngine::new(
            config.engine.clone(),
            TemplateCatalog::new(templates.clone()),
        )?;
        let now_ms = clock.now_ms();
        engine.initialize(records.clone(), selected, now_ms);

        let mut adapter = MemoryAdapter::new();
        adapter.seed(REPORT_ID, records);

        Ok(Self {
            config,
            rng,
            clock,
            engine,
            adapter,
            templates,
            pending_echoes: Vec::new(),
            pending_reply: None,
            intents: IntentLedger::new(),
            counts: ActionCounts::default(),
            violations: Vec::new(),
            trace: Vec::new(),
            step_index: 0,
            last_version: 0,
            custom_seq: 0,
            now_ms,
        })
    }

    /// Run the configured number of steps, drain, and report.
    ///
    /// # Errors
    ///
    /// Returns an error only for harness faults (an action on an id that
    /// should exist, a drain that cannot quiesce). Invariant violations
    /// are data, not errors: they land in the result.
    pub fn run(mut self) -> anyhow::Result<SimulationResult> {
        for _ in 0..self.config.steps {
            self.step()?;
        }
        self.drain()?;

        let final_snapshot = self.engine.snapshot(self.now_ms);
        Ok(SimulationResult {
            seed: self.config.seed,
            steps_run: self.step_index,
            final_version: self.engine.version().get(),
            final_snapshot,
            save_stats: *self.engine.save_stats(),
            adapter_saves: self.adapter.save_count(),
            counts: self.counts,
            violations: self.violations,
            trace: self.trace,
        })
    }

    // ── step machinery ───────────────────────────────────────────────────

    fn step(&mut self) -> anyhow::Result<()> {
        self.step_index += 1;
        self.now_ms = self.clock.advance(&mut self.rng);

        self.deliver_due_echoes();
        self.settle_due_reply()?;
        self.perform_action()?;
        self.maybe_capture_echo();
        self.maybe_stray_completion();
        self.poll_and_dispatch();
        self.observe();
        Ok(())
    }

    /// Flush outstanding echoes and saves so the final checks see a
    /// settled session.
    fn drain(&mut self) -> anyhow::Result<()> {
        let mut guard = 0_u32;
        while !self.pending_echoes.is_empty() || self.pending_reply.is_some() {
            guard += 1;
            ensure!(guard <= 4096, "drain failed to clear fault queues");
            self.step_index += 1;
            self.now_ms = self.clock.advance(&mut self.rng);
            self.deliver_due_echoes();
            self.settle_due_reply()?;
            self.observe();
        }

        // Past the cooldown and freshness horizon, one housekeeping tick
        // settles any flag drift a diverging echo left behind.
        self.now_ms = self
            .clock
            .advance_by(self.config.engine.cooldown_ms + self.config.engine.freshness_window_ms);
        let decision = self.engine.tick(self.now_ms);
        self.push_trace(TraceAction::Tick {
            decision: decision.to_string(),
        });

        let mut guard = 0_u32;
        while self.engine.is_dirty() || self.engine.is_save_in_flight() {
            guard += 1;
            ensure!(guard <= 64, "drain failed to flush the save queue");
            self.step_index += 1;
            self.now_ms = self.clock.advance_by(self.config.engine.debounce.bulk_ms + 1);
            if let Some(batch) = self.engine.poll_save(self.now_ms) {
                self.push_trace(TraceAction::SaveCut {
                    seq: batch.seq,
                    class: batch.class.to_string(),
                    records: batch.issues.len(),
                });
                self.counts.saves_cut += 1;
                self.adapter
                    .save_issues(REPORT_ID, &batch.issues)
                    .context("draining save rejected by the in-memory adapter")?;
                self.engine.complete_save(batch.seq, true, self.now_ms);
                self.counts.saves_settled += 1;
                self.push_trace(TraceAction::SaveSettled {
                    seq: batch.seq,
                    ok: true,
                });
            }
            self.observe();
        }

        let verdict = SelectionOracle::check_drained(
            &self.engine,
            &self.intents,
            self.adapter.saved(REPORT_ID),
        );
        self.violations.extend(verdict.violations);
        Ok(())
    }

    fn observe(&mut self) {
        let result = SelectionOracle::check_live(
            &self.engine,
            &self.intents,
            self.adapter.save_count(),
            self.last_version,
            self.step_index,
        );
        if !result.passed {
            debug!(
                step = self.step_index,
                violations = result.violations.len(),
                "oracle flagged this step"
            );
            self.violations.extend(result.violations);
        }
        self.last_version = self.engine.version().get();
    }

    // ── user actions ─────────────────────────────────────────────────────

    fn perform_action(&mut self) -> anyhow::Result<()> {
        match self.rng.next_bounded(100) {
            0..=29 => self.act_toggle(),
            30..=41 => self.act_edit_field(),
            42..=49 => self.act_add_custom(),
            50..=52 => self.act_add_catalog_twin(),
            53..=60 => self.act_deselect(),
            61..=67 => self.act_relevance_merge(),
            68..=77 => self.act_tick(),
            _ => {
                self.counts.idle_steps += 1;
                Ok(())
            }
        }
    }

    fn act_toggle(&mut self) -> anyhow::Result<()> {
        let Some(id) = self.pick_editable_id() else {
            self.counts.idle_steps += 1;
            return Ok(());
        };
        let select = self.rng.next_u64() & 1 == 0;
        let effect = self
            .engine
            .toggle(&id, select, self.now_ms)
            .context("toggle rejected for a live id")?;
        if effect.is_applied() {
            let kind = if select {
                IntentKind::Selected
            } else {
                IntentKind::Deselected
            };
            self.note_intent(id.clone(), kind);
            self.counts.toggles += 1;
            self.push_trace(TraceAction::Toggle { id, select });
        }
        Ok(())
    }

    fn act_edit_field(&mut self) -> anyhow::Result<()> {
        // Display text only changes on custom rows; predefined rows keep
        // their catalog text so template dedup stays meaningful.
        let (id, field) = match self.rng.next_bounded(4) {
            3 => match self.pick_custom_id() {
                Some(id) => (id, IssueField::Name),
                None => match self.pick_editable_id() {
                    Some(id) => (id, IssueField::ImpactRelevance),
                    None => {
                        self.counts.idle_steps += 1;
                        return Ok(());
                    }
                },
            },
            bucket => {
                let Some(id) = self.pick_editable_id() else {
                    self.counts.idle_steps += 1;
                    return Ok(());
                };
                let field = match bucket {
                    0 => IssueField::ImpactRelevance,
                    1 => IssueField::FinancialRelevance,
                    _ => IssueField::StakeholderRelevance,
                };
                (id, field)
            }
        };

        let value = if field == IssueField::Name {
            FieldValue::Text(format!("Renamed topic {}", self.rng.next_bounded(10_000)))
        } else {
            // Past-the-end values exercise score clamping.
            FieldValue::Number(fractional_score(self.rng.next_bounded(1_100)))
        };
        self.engine
            .set_field(&id, field, &value, self.now_ms)
            .context("field edit rejected for a live id")?;
        self.counts.field_edits += 1;
        self.push_trace(TraceAction::EditField {
            id,
            field: field.to_string(),
        });
        Ok(())
    }

    fn act_add_custom(&mut self) -> anyhow::Result<()> {
        let n = self.custom_seq;
        self.custom_seq += 1;
        let id = IssueId::new(format!("custom-sim-{n:04}"));
        let name = format!("Ad hoc topic {n}");
        let outcome = self
            .engine
            .add_issue_with_id(id, &name, "Raised during the session", self.now_ms)
            .context("fresh custom id collided")?;
        self.note_intent(outcome.id.clone(), IntentKind::Selected);
        self.counts.adds += 1;
        self.push_trace(TraceAction::Add {
            id: outcome.id,
            created: outcome.created,
        });
        Ok(())
    }

    /// Re-add a catalog topic by its exact display text: must dedup
    /// against the existing row instead of minting a duplicate.
    fn act_add_catalog_twin(&mut self) -> anyhow::Result<()> {
        let index = usize::try_from(self.rng.next_bounded(self.templates.len() as u64))
            .unwrap_or_default();
        let Some(template) = self.templates.get(index).cloned() else {
            self.counts.idle_steps += 1;
            return Ok(());
        };
        let outcome = self
            .engine
            .add_issue(&template.name, &template.description, self.now_ms);
        self.counts.adds += 1;
        self.push_trace(TraceAction::Add {
            id: outcome.id.clone(),
            created: outcome.created,
        });
        if outcome.created {
            // Only reachable if dedup missed; the oracle will see the
            // duplicate row on this step's record check.
            self.note_intent(outcome.id, IntentKind::Selected);
        }
        Ok(())
    }

    fn act_deselect(&mut self) -> anyhow::Result<()> {
        let Some(id) = self.pick_editable_id() else {
            self.counts.idle_steps += 1;
            return Ok(());
        };
        let outcome = self
            .engine
            .deselect(&id, self.now_ms)
            .context("deselect rejected for a live id")?;
        match outcome {
            DeselectOutcome::Removed => {
                self.note_intent(id.clone(), IntentKind::Removed);
                self.counts.deselects += 1;
                self.push_trace(TraceAction::Deselect { id, removed: true });
            }
            DeselectOutcome::Deselected => {
                self.note_intent(id.clone(), IntentKind::Deselected);
                self.counts.deselects += 1;
                self.push_trace(TraceAction::Deselect { id, removed: false });
            }
            DeselectOutcome::HeaderIgnored => {}
        }
        Ok(())
    }

    fn act_relevance_merge(&mut self) -> anyhow::Result<()> {
        let mut scores = BTreeMap::new();
        let ids: Vec<IssueId> = self
            .engine
            .issues()
            .iter()
            .filter(|issue| !issue.is_header())
            .map(|issue| issue.id.clone())
            .collect();
        for id in ids {
            if self.rng.hit_rate_percent(30) {
                scores.insert(id, fractional_score(self.rng.next_bounded(1_000)));
            }
        }
        let touched = scores.len();
        self.engine.apply_relevance(&scores, self.now_ms);
        self.counts.relevance_merges += 1;
        self.push_trace(TraceAction::RelevanceMerge { touched });
        Ok(())
    }

    fn act_tick(&mut self) -> anyhow::Result<()> {
        let decision = self.engine.tick(self.now_ms);
        self.counts.ticks += 1;
        self.push_trace(TraceAction::Tick {
            decision: decision.to_string(),
        });
        Ok(())
    }

    // ── fault machinery ──────────────────────────────────────────────────

    /// Snapshot an external echo at the current basis; it applies steps
    /// later, when the engine may have moved on.
    fn maybe_capture_echo(&mut self) {
        if !self.rng.hit_rate_percent(self.config.fault.echo_rate_percent) {
            return;
        }
        let basis = self.engine.version();
        let delay = self
            .rng
            .next_bounded(u64::from(self.config.fault.echo_max_delay_steps) + 1);
        let deliver_at_step = self.step_index + delay;
        let mutate = self.rng.hit_rate_percent(self.config.fault.echo_mutate_percent);

        let payload = if self.rng.next_u64() & 1 == 0 {
            let mut set: BTreeSet<IssueId> = self
                .engine
                .issues()
                .iter()
                .filter(|issue| issue.is_material && !issue.is_header())
                .map(|issue| issue.id.clone())
                .collect();
            if mutate {
                if let Some(id) = self.pick_editable_id() {
                    if !set.remove(&id) {
                        set.insert(id);
                    }
                }
            }
            EchoPayload::SelectedIds(set)
        } else {
            let mut list = self.engine.issues().to_vec();
            if mutate {
                let flippable: Vec<usize> = list
                    .iter()
                    .enumerate()
                    .filter(|(_, issue)| !issue.is_header())
                    .map(|(index, _)| index)
                    .collect();
                let pick = usize::try_from(self.rng.next_bounded(flippable.len() as u64))
                    .unwrap_or_default();
                if let Some(&index) = flippable.get(pick) {
                    if let Some(record) = list.get_mut(index) {
                        record.is_material = !record.is_material;
                    }
                }
            }
            EchoPayload::Canonical(list)
        };

        self.counts.echoes_captured += 1;
        self.push_trace(TraceAction::EchoCaptured {
            kind: payload.kind(),
            basis: basis.get(),
            deliver_at_step,
        });
        self.pending_echoes.push(PendingEcho {
            deliver_at_step,
            basis,
            payload,
        });
    }

    fn deliver_due_echoes(&mut self) {
        let step = self.step_index;
        let (due, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending_echoes)
            .into_iter()
            .partition(|echo| echo.deliver_at_step <= step);
        self.pending_echoes = rest;

        for echo in due {
            let kind = echo.payload.kind();
            let decision = match echo.payload {
                EchoPayload::SelectedIds(set) => {
                    self.engine.apply_selected_ids(set, echo.basis, self.now_ms)
                }
                EchoPayload::Canonical(list) => {
                    self.engine.apply_canonical(list, echo.basis, self.now_ms)
                }
            };
            self.release_intents(kind, echo.basis);
            self.counts.echoes_applied += 1;
            self.push_trace(TraceAction::EchoApplied {
                kind,
                basis: echo.basis.get(),
                decision: decision.to_string(),
            });
        }
    }

    /// Release intents an external update is entitled to override.
    ///
    /// A selected-id set cannot restore a removed record, so `Removed`
    /// intents stay held against it regardless of basis.
    fn release_intents(&mut self, kind: EchoKind, basis: StateVersion) {
        for intent in self.intents.values_mut() {
            if intent.overridden || intent.version > basis {
                continue;
            }
            if intent.kind == IntentKind::Removed && kind == EchoKind::SelectedIds {
                continue;
            }
            intent.overridden = true;
            self.counts.intents_released += 1;
        }
    }

    fn poll_and_dispatch(&mut self) {
        let Some(batch) = self.engine.poll_save(self.now_ms) else {
            return;
        };
        let ok = !self.rng.hit_rate_percent(self.config.fault.save_fail_percent);
        let delay = self
            .rng
            .next_bounded(u64::from(self.config.fault.save_max_delay_steps) + 1);
        self.counts.saves_cut += 1;
        self.push_trace(TraceAction::SaveCut {
            seq: batch.seq,
            class: batch.class.to_string(),
            records: batch.issues.len(),
        });
        self.pending_reply = Some(PendingReply {
            deliver_at_step: self.step_index + delay,
            seq: batch.seq,
            ok,
            issues: batch.issues,
        });
    }

    fn settle_due_reply(&mut self) -> anyhow::Result<()> {
        let Some(reply) = self.pending_reply.take() else {
            return Ok(());
        };
        if reply.deliver_at_step > self.step_index {
            self.pending_reply = Some(reply);
            return Ok(());
        }
        if reply.ok {
            self.adapter
                .save_issues(REPORT_ID, &reply.issues)
                .context("save rejected by the in-memory adapter")?;
        } else {
            self.counts.failed_saves_injected += 1;
        }
        self.engine.complete_save(reply.seq, reply.ok, self.now_ms);
        self.counts.saves_settled += 1;
        self.push_trace(TraceAction::SaveSettled {
            seq: reply.seq,
            ok: reply.ok,
        });
        Ok(())
    }

    /// A completion callback for a sequence the engine never issued; the
    /// engine must shrug it off.
    fn maybe_stray_completion(&mut self) {
        if !self
            .rng
            .hit_rate_percent(self.config.fault.stray_completion_percent)
        {
            return;
        }
        self.engine.complete_save(u64::MAX, true, self.now_ms);
        self.counts.stray_completions += 1;
        self.push_trace(TraceAction::StrayCompletion);
    }

    // ── bookkeeping ──────────────────────────────────────────────────────

    fn note_intent(&mut self, id: IssueId, kind: IntentKind) {
        let version = self.engine.version();
        self.intents.insert(
            id,
            IntentRecord {
                kind,
                version,
                overridden: false,
            },
        );
    }

    fn push_trace(&mut self, action: TraceAction) {
        self.trace.push(TraceEvent {
            step: self.step_index,
            at_ms: self.now_ms,
            action,
        });
    }

    fn pick_editable_id(&mut self) -> Option<IssueId> {
        let ids: Vec<IssueId> = self
            .engine
            .issues()
            .iter()
            .filter(|issue| !issue.is_header())
            .map(|issue| issue.id.clone())
            .collect();
        self.pick_from(ids)
    }

    fn pick_custom_id(&mut self) -> Option<IssueId> {
        let ids: Vec<IssueId> = self
            .engine
            .issues()
            .iter()
            .filter(|issue| issue.id.is_custom())
            .map(|issue| issue.id.clone())
            .collect();
        self.pick_from(ids)
    }

    fn pick_from(&mut self, ids: Vec<IssueId>) -> Option<IssueId> {
        if ids.is_empty() {
            return None;
        }
        let index = usize::try_from(self.rng.next_bounded(ids.len() as u64)).unwrap_or_default();
        ids.into_iter().nth(index)
    }
}

/// Build the seeded report: templates for every topic row, the rows
/// themselves (every third topic pre-selected), and the matching
/// selected-id set.
fn seed_report(
    catalog_size: usize,
    header_every: usize,
) -> (Vec<IssueTemplate>, Vec<MaterialityIssue>, BTreeSet<IssueId>) {
    let mut templates = Vec::new();
    let mut records = Vec::new();
    let mut selected = BTreeSet::new();
    let mut topic_index = 0_usize;

    for position in 0..catalog_size {
        if header_every > 0 && position % header_every == 0 {
            records.push(MaterialityIssue {
                id: IssueId::new(format!("section-{position:02}")),
                name: format!("Section {position}"),
                ..MaterialityIssue::default()
            });
            continue;
        }
        let id = IssueId::new(format!("topic-{position:02}"));
        let name = format!("Topic {position}");
        let description = format!("Reference catalogue topic {position}");
        let material = topic_index % 3 == 0;
        templates.push(IssueTemplate::new(id.as_str(), &name, &description));
        records.push(MaterialityIssue {
            id: id.clone(),
            name,
            description,
            impact_relevance: 30.0,
            financial_relevance: 40.0,
            is_material: material,
            ..MaterialityIssue::default()
        });
        if material {
            selected.insert(id);
        }
        topic_index += 1;
    }

    (templates, records, selected)
}

/// Map a bounded integer onto a fractional score (tenths).
fn fractional_score(raw: u64) -> f64 {
    let tenths = u32::try_from(raw).unwrap_or(u32::MAX);
    f64::from(tenths) / 10.0
}
