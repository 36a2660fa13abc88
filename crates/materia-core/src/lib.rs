#![forbid(unsafe_code)]
//! materia-core library.
//!
//! Core engine for double-materiality issue selection: a canonical list of
//! sustainability issues is partitioned into an *available* and a *selected*
//! pool, local edits and external recomputations race against each other,
//! and the engine arbitrates so that recent user intent always wins.
//!
//! ```text
//! host events          SelectionEngine                   collaborators
//! ───────────          ───────────────                   ─────────────
//! toggle/edit ───▶ IssueStore (ops + version) ──▶ snapshot ──▶ render layer
//! external set ──▶ Reconciler ──▶ partition() ──▶ adopt
//! survey data ───▶ merge_relevance
//! timer tick ────▶ SaveQueue ──▶ poll_save/complete_save ──▶ adapter
//! ```
//!
//! The engine owns no clock and performs no I/O: every entry point takes
//! `now_ms` and persistence runs through a poll cycle, which keeps the whole
//! crate deterministic under simulation.
//!
//! # Conventions
//!
//! - **Errors**: typed `thiserror` enums on fallible operations; `anyhow`
//!   only at construction/config boundaries.
//! - **Logging**: `tracing` macros (`warn!`, `debug!`) with structured fields.

pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod ops;
pub mod partition;
pub mod persist;
pub mod reconcile;
pub mod relevance;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod time;

pub use config::{DebounceConfig, EngineConfig};
pub use engine::SelectionEngine;
pub use error::ErrorCode;
pub use model::{
    FieldValue, InvalidFieldValue, IssueField, IssueId, IssueTemplate, MaterialityIssue,
    ParseEnumError, RelevanceScore, TemplateCatalog,
};
pub use ops::{OpKind, OpLog, ToggleOp};
pub use partition::{PartitionDiagnostic, PartitionOutcome, Pool, partition};
pub use persist::{
    MemoryAdapter, PersistError, PersistenceAdapter, SaveBatch, SaveClass, SaveQueue, SaveStats,
};
pub use reconcile::{
    ReconcileDecision, ReconcileTrigger, Reconciler, RunReason, SkipReason,
};
pub use relevance::merge_relevance;
pub use snapshot::PartitionSnapshot;
pub use state::{ReconcileState, StateVersion};
pub use store::{AddOutcome, DeselectOutcome, IssueStore, StoreEffect, StoreError};
pub use time::now_ms;
