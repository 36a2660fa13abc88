use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::ops::DEFAULT_OP_HISTORY_CAP;

/// Engine tuning knobs. All durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long a recorded toggle wins over canonical recomputation.
    #[serde(default = "default_freshness_window_ms")]
    pub freshness_window_ms: i64,
    /// Same-tick duplicate suppression for external reconcile triggers.
    #[serde(default = "default_guard_window_ms")]
    pub guard_window_ms: i64,
    /// Pause after a completed pass before external triggers run again.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: i64,
    /// Per-field-class save debounce windows.
    #[serde(default)]
    pub debounce: DebounceConfig,
    /// Number of per-issue toggle operations retained.
    #[serde(default = "default_op_history_cap")]
    pub op_history_cap: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            freshness_window_ms: default_freshness_window_ms(),
            guard_window_ms: default_guard_window_ms(),
            cooldown_ms: default_cooldown_ms(),
            debounce: DebounceConfig::default(),
            op_history_cap: default_op_history_cap(),
        }
    }
}

impl EngineConfig {
    /// Validate tuning values before constructing an engine.
    ///
    /// # Errors
    ///
    /// Returns an error if any window is negative, the op history cap is
    /// zero, or the freshness window is shorter than the guard window.
    pub fn validate(&self) -> Result<()> {
        if self.freshness_window_ms < 0
            || self.guard_window_ms < 0
            || self.cooldown_ms < 0
            || self.debounce.explicit_ms < 0
            || self.debounce.score_edit_ms < 0
            || self.debounce.text_edit_ms < 0
            || self.debounce.bulk_ms < 0
        {
            bail!("durations must be non-negative");
        }
        if self.op_history_cap == 0 {
            bail!("op_history_cap must be > 0");
        }
        if self.freshness_window_ms < self.guard_window_ms {
            bail!("freshness_window_ms must be >= guard_window_ms");
        }
        Ok(())
    }
}

/// Debounce windows by edit class. Explicit saves flush quickly; bulk
/// add/remove batches wait the longest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebounceConfig {
    #[serde(default = "default_explicit_ms")]
    pub explicit_ms: i64,
    #[serde(default = "default_score_edit_ms")]
    pub score_edit_ms: i64,
    #[serde(default = "default_text_edit_ms")]
    pub text_edit_ms: i64,
    #[serde(default = "default_bulk_ms")]
    pub bulk_ms: i64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            explicit_ms: default_explicit_ms(),
            score_edit_ms: default_score_edit_ms(),
            text_edit_ms: default_text_edit_ms(),
            bulk_ms: default_bulk_ms(),
        }
    }
}

/// Load an [`EngineConfig`] from a TOML file.
///
/// A missing file yields the defaults; a present but unparseable file is an
/// error.
///
/// # Errors
///
/// Returns an error when the file exists but cannot be read or parsed.
pub fn load_engine_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<EngineConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

const fn default_freshness_window_ms() -> i64 {
    4_000
}

const fn default_guard_window_ms() -> i64 {
    50
}

const fn default_cooldown_ms() -> i64 {
    3_000
}

const fn default_op_history_cap() -> usize {
    DEFAULT_OP_HISTORY_CAP
}

const fn default_explicit_ms() -> i64 {
    300
}

const fn default_score_edit_ms() -> i64 {
    1_000
}

const fn default_text_edit_ms() -> i64 {
    2_000
}

const fn default_bulk_ms() -> i64 {
    4_000
}
