//! Campaign runner: many seeded sessions, one verdict.
//!
//! Executes a range of seeds with shared parameters, collects pass/fail
//! per seed, and identifies the first failing seed so it can be replayed
//! in isolation with its full trace.

use std::ops::Range;

use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::driver::{FaultConfig, Simulation, SimulationConfig, SimulationResult, TraceAction};
use crate::oracle::InvariantViolation;

/// Campaign-level configuration: how many seeds, and the session
/// parameters every seed shares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Range of seeds to execute, e.g. `0..100`.
    pub seed_range: Range<u64>,
    /// Event-loop steps per session.
    pub steps: u64,
    /// Predefined rows in each seeded report.
    pub catalog_size: usize,
    /// Header row spacing; zero disables headers.
    pub header_every: usize,
    /// Percentage chance per step that a backend echo is captured.
    pub echo_rate_percent: u8,
    /// Maximum steps an echo stays in flight.
    pub echo_max_delay_steps: u8,
    /// Percentage of echoes that diverge from engine state.
    pub echo_mutate_percent: u8,
    /// Percentage of save completions that report failure.
    pub save_fail_percent: u8,
    /// Maximum steps before a save completion arrives.
    pub save_max_delay_steps: u8,
    /// Percentage chance per step of a bogus completion callback.
    pub stray_completion_percent: u8,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        let fault = FaultConfig::default();
        Self {
            seed_range: 0..100,
            steps: 120,
            catalog_size: 18,
            header_every: 6,
            echo_rate_percent: fault.echo_rate_percent,
            echo_max_delay_steps: fault.echo_max_delay_steps,
            echo_mutate_percent: fault.echo_mutate_percent,
            save_fail_percent: fault.save_fail_percent,
            save_max_delay_steps: fault.save_max_delay_steps,
            stray_completion_percent: fault.stray_completion_percent,
        }
    }
}

impl CampaignConfig {
    /// Build a [`SimulationConfig`] for a specific seed.
    ///
    /// The op-history cap is sized so no id touched during the run can
    /// have its toggle history evicted mid-session.
    #[must_use]
    pub fn sim_config_for_seed(&self, seed: u64) -> SimulationConfig {
        let base = SimulationConfig::default();
        let cap = usize::try_from(self.steps)
            .unwrap_or(usize::MAX)
            .saturating_add(self.catalog_size)
            .max(base.engine.op_history_cap);
        let mut engine = base.engine;
        engine.op_history_cap = cap;
        SimulationConfig {
            seed,
            steps: self.steps,
            catalog_size: self.catalog_size,
            header_every: self.header_every,
            engine,
            clock: base.clock,
            fault: FaultConfig {
                echo_rate_percent: self.echo_rate_percent,
                echo_max_delay_steps: self.echo_max_delay_steps,
                echo_mutate_percent: self.echo_mutate_percent,
                save_fail_percent: self.save_fail_percent,
                save_max_delay_steps: self.save_max_delay_steps,
                stray_completion_percent: self.stray_completion_percent,
            },
        }
    }

    /// Validate configuration before running.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty seed range or per-session parameters
    /// a [`SimulationConfig`] would reject.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.seed_range.is_empty(), "seed_range must not be empty");
        self.sim_config_for_seed(self.seed_range.start).validate()
    }
}

/// Failure details for a single seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFailure {
    /// The seed that failed.
    pub seed: u64,
    /// Formatted invariant violations.
    pub violations: Vec<String>,
}

/// Aggregate report produced by a campaign run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReport {
    /// Total seeds executed.
    pub seeds_run: usize,
    /// Seeds that held every invariant.
    pub seeds_passed: usize,
    /// First seed that failed, for prioritized replay.
    pub first_failure: Option<u64>,
    /// All seed failures with violation details.
    pub failures: Vec<SeedFailure>,
    /// Seeds where an external update actually contended with a local
    /// edit (at least one intent was released by a newer basis).
    pub seeds_with_contention: usize,
    /// Echo applications across all seeds.
    pub echoes_applied: u64,
    /// Successful saves across all seeds.
    pub saves_completed: u64,
}

impl CampaignReport {
    /// True if every seed passed.
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One replayed seed with everything needed to debug it.
#[derive(Debug, Clone)]
pub struct ReplayReport {
    /// The full session result, trace included.
    pub result: SimulationResult,
    /// Formatted violations (empty on a passing seed).
    pub violations: Vec<String>,
}

impl ReplayReport {
    /// Whether the replayed seed held every invariant.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// JSON rendering for machine consumption.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "seed": self.result.seed,
            "passed": self.passed(),
            "steps_run": self.result.steps_run,
            "final_version": self.result.final_version,
            "counts": self.result.counts,
            "save_stats": self.result.save_stats,
            "violations": self.violations,
            "final_snapshot": self.result.final_snapshot,
            "trace": self.result.trace,
        })
    }
}

/// Run a full campaign across all seeds in the config.
///
/// # Errors
///
/// Returns an error if config validation fails or a session hits an
/// internal harness fault. Invariant violations are not errors; they are
/// collected into the report.
pub fn run_campaign(config: &CampaignConfig) -> Result<CampaignReport> {
    config.validate()?;

    let mut seeds_run = 0_usize;
    let mut seeds_passed = 0_usize;
    let mut first_failure: Option<u64> = None;
    let mut failures = Vec::new();
    let mut seeds_with_contention = 0_usize;
    let mut echoes_applied = 0_u64;
    let mut saves_completed = 0_u64;

    for seed in config.seed_range.clone() {
        seeds_run += 1;
        let result = run_single_seed(seed, config)?;

        echoes_applied += result.counts.echoes_applied;
        saves_completed += result.save_stats.saves_completed;
        if result.counts.intents_released > 0 {
            seeds_with_contention += 1;
        }

        if result.passed() {
            seeds_passed += 1;
        } else {
            if first_failure.is_none() {
                first_failure = Some(seed);
            }
            failures.push(SeedFailure {
                seed,
                violations: result.violations.iter().map(format_violation).collect(),
            });
        }
    }

    Ok(CampaignReport {
        seeds_run,
        seeds_passed,
        first_failure,
        failures,
        seeds_with_contention,
        echoes_applied,
        saves_completed,
    })
}

/// Run one seed under the campaign's session parameters.
///
/// # Errors
///
/// Returns an error only for internal harness faults; a seed that merely
/// violates invariants still yields its result.
pub fn run_single_seed(seed: u64, config: &CampaignConfig) -> Result<SimulationResult> {
    Simulation::new(config.sim_config_for_seed(seed))?.run()
}

/// Replay a single seed with full trace details for debugging.
///
/// # Errors
///
/// Returns an error when config validation or the session itself fails.
pub fn replay_seed(seed: u64, config: &CampaignConfig) -> Result<ReplayReport> {
    config.validate()?;
    let result = run_single_seed(seed, config)?;
    let violations = result.violations.iter().map(format_violation).collect();
    Ok(ReplayReport { result, violations })
}

/// Format an invariant violation into a human-readable string.
#[must_use]
pub fn format_violation(v: &InvariantViolation) -> String {
    match v {
        InvariantViolation::DuplicateRecord { step, id } => {
            format!("DuplicateRecord: id '{id}' appears twice at step {step}")
        }
        InvariantViolation::MaterialHeader { step, id } => {
            format!("MaterialHeader: header '{id}' flagged material at step {step}")
        }
        InvariantViolation::UnexpectedDiagnostics { step, count } => {
            format!("UnexpectedDiagnostics: {count} diagnostics from clean input at step {step}")
        }
        InvariantViolation::VersionRegressed { step, from, to } => {
            format!("VersionRegressed: v{from} -> v{to} at step {step}")
        }
        InvariantViolation::SaveLedgerSkew {
            step,
            batches_cut,
            settled,
            in_flight,
        } => {
            format!(
                "SaveLedgerSkew: {batches_cut} cut vs {settled} settled \
                 (in_flight={in_flight}) at step {step}"
            )
        }
        InvariantViolation::AdapterDrift {
            step,
            adapter_saves,
            completed,
        } => {
            format!(
                "AdapterDrift: adapter wrote {adapter_saves} but engine \
                 completed {completed} at step {step}"
            )
        }
        InvariantViolation::IntentLost {
            step,
            id,
            intended,
            observed,
        } => {
            format!(
                "IntentLost: '{id}' should read {intended} but shows \
                 {observed} at step {step}"
            )
        }
        InvariantViolation::ResurrectedIssue { step, id } => {
            format!("ResurrectedIssue: removed custom '{id}' reappeared at step {step}")
        }
        InvariantViolation::UnsavedChangesAtEnd { dirty, in_flight } => {
            format!("UnsavedChangesAtEnd: dirty={dirty} in_flight={in_flight} after drain")
        }
        InvariantViolation::UnsavedIntent {
            id,
            intended,
            observed,
        } => {
            format!("UnsavedIntent: '{id}' should be saved {intended} but shows {observed}")
        }
    }
}

/// How many applied echoes in a trace were stale: captured at a basis the
/// engine had already moved past by the time they arrived.
///
/// Capture events carry the engine version at capture time, so the running
/// maximum of captured bases is a lower bound on the live version. This
/// undercounts slightly when the engine advances between captures.
#[must_use]
pub fn stale_echoes_applied(result: &SimulationResult) -> u64 {
    let mut version_floor = 0_u64;
    let mut stale = 0_u64;
    for event in &result.trace {
        match &event.action {
            TraceAction::EchoCaptured { basis, .. } => {
                version_floor = (*basis).max(version_floor);
            }
            TraceAction::EchoApplied { basis, .. } => {
                if *basis < version_floor {
                    stale += 1;
                }
            }
            _ => {}
        }
    }
    stale
}
