#![forbid(unsafe_code)]
//! materia-sim library.
//!
//! Deterministic simulation harness for the materiality selection engine.
//! A seeded driver plays the host role around a real [`materia_core::SelectionEngine`]:
//! it advances a simulated clock, fires user edits, captures backend echoes
//! and replays them late (sometimes mutated), fails and delays save
//! completions, and injects stray callbacks. An oracle checks structural
//! and intent invariants after every step, and a drain phase verifies that
//! a quiescent session leaves every surviving local intent durable.
//!
//! ```text
//! seed ──▶ DeterministicRng ──▶ SimulatedClock
//!                 │
//!                 ▼
//!          Simulation::step ──▶ SelectionEngine ──▶ MemoryAdapter
//!                 │                    │
//!            fault queues         SelectionOracle ──▶ violations
//! ```
//!
//! Identical seeds produce identical traces, so any failing seed can be
//! replayed in isolation with [`replay_seed`].
//!
//! # Conventions
//!
//! - **Errors**: `anyhow::Result` throughout; invariant violations are data
//!   in the result, never errors.
//! - **Logging**: `tracing` macros (`debug!`) with structured fields.

pub mod campaign;
pub mod clock;
pub mod driver;
pub mod oracle;
pub mod rng;

pub use campaign::{
    CampaignConfig, CampaignReport, ReplayReport, SeedFailure, format_violation, replay_seed,
    run_campaign, run_single_seed, stale_echoes_applied,
};
pub use clock::{ClockConfig, SimulatedClock};
pub use driver::{
    ActionCounts, EchoKind, FaultConfig, IntentKind, IntentLedger, IntentRecord, REPORT_ID,
    Simulation, SimulationConfig, SimulationResult, TraceAction, TraceEvent,
};
pub use oracle::{InvariantViolation, OracleResult, SelectionOracle};
pub use rng::DeterministicRng;
