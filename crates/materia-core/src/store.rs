//! Canonical issue record store.
//!
//! Owns the materiality issue list, the toggle op log, and the monotonic
//! state version. Every mutation funnels through here so that:
//!
//! - each applied mutation bumps the version exactly once,
//! - selection changes leave a version-stamped op behind for race
//!   arbitration,
//! - each mutation reports the save class the persistence queue should use.
//!
//! The store never partitions and never performs I/O. The engine feeds the
//! store's contents to the partition pass and its mutation effects to the
//! save queue, then writes the resulting pool memberships back with
//! [`IssueStore::adopt`].
//!
//! # Header records
//!
//! Category headers (empty description, zero scores) are immutable through
//! this API: `set_field` and `deselect` report [`StoreEffect::HeaderIgnored`]
//! without touching the record or the version.

use std::collections::BTreeSet;

use tracing::debug;

use crate::error::ErrorCode;
use crate::model::{
    FieldValue, InvalidFieldValue, IssueField, IssueId, MaterialityIssue, RelevanceScore,
    TemplateCatalog,
};
use crate::ops::{OpKind, OpLog};
use crate::partition::{PartitionOutcome, Pool};
use crate::persist::SaveClass;
use crate::state::StateVersion;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by store mutations. All recoverable.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// The target id is not in the canonical list.
    #[error("no issue with id '{id}'")]
    IssueNotFound { id: IssueId },

    /// The offered value could not be coerced to the field's type.
    #[error("invalid value for field '{field}': {source}")]
    InvalidField {
        field: IssueField,
        #[source]
        source: InvalidFieldValue,
    },

    /// An explicit id collided with an existing record.
    #[error("issue id '{id}' already exists")]
    DuplicateId { id: IssueId },
}

impl StoreError {
    /// Stable error code for this failure.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::IssueNotFound { .. } => ErrorCode::IssueNotFound,
            Self::InvalidField { .. } => ErrorCode::InvalidFieldValue,
            Self::DuplicateId { .. } => ErrorCode::DuplicateIssueId,
        }
    }
}

// ---------------------------------------------------------------------------
// Mutation outcomes
// ---------------------------------------------------------------------------

/// What a store mutation did, and how to debounce its save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEffect {
    /// The mutation was applied; schedule a save with this class.
    Applied(SaveClass),
    /// The target was a header record; nothing changed.
    HeaderIgnored,
}

impl StoreEffect {
    /// Save class to mark dirty with, if anything changed.
    #[must_use]
    pub const fn save_class(&self) -> Option<SaveClass> {
        match self {
            Self::Applied(class) => Some(*class),
            Self::HeaderIgnored => None,
        }
    }

    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Result of an `add_issue` call.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct AddOutcome {
    /// Id of the created record, or of the existing one on dedup.
    pub id: IssueId,
    /// False when the call deduplicated against an existing record.
    pub created: bool,
}

impl AddOutcome {
    /// Save class to mark dirty with; dedup no-ops stay clean.
    #[must_use]
    pub const fn save_class(&self) -> Option<SaveClass> {
        if self.created {
            Some(SaveClass::Explicit)
        } else {
            None
        }
    }
}

/// Result of a `deselect` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeselectOutcome {
    /// Predefined issue: flag cleared, record kept.
    Deselected,
    /// Custom issue: record removed from the canonical list.
    Removed,
    /// Header record: nothing changed.
    HeaderIgnored,
}

impl DeselectOutcome {
    /// Save class to mark dirty with, if anything changed.
    #[must_use]
    pub const fn save_class(&self) -> Option<SaveClass> {
        match self {
            Self::Deselected | Self::Removed => Some(SaveClass::Explicit),
            Self::HeaderIgnored => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Canonical list of materiality issues plus mutation primitives.
#[derive(Debug, Clone)]
pub struct IssueStore {
    issues: Vec<MaterialityIssue>,
    catalog: TemplateCatalog,
    ops: OpLog,
    version: StateVersion,
}

impl IssueStore {
    /// Create an empty store over a caller-supplied template catalog.
    #[must_use]
    pub fn new(catalog: TemplateCatalog, op_history_cap: usize) -> Self {
        Self::with_issues(catalog, Vec::new(), op_history_cap)
    }

    /// Create a store pre-populated with a canonical list.
    #[must_use]
    pub fn with_issues(
        catalog: TemplateCatalog,
        issues: Vec<MaterialityIssue>,
        op_history_cap: usize,
    ) -> Self {
        Self {
            issues,
            catalog,
            ops: OpLog::new(op_history_cap),
            version: StateVersion::ZERO,
        }
    }

    // -- accessors ----------------------------------------------------------

    /// Canonical list in original order.
    #[must_use]
    pub fn issues(&self) -> &[MaterialityIssue] {
        &self.issues
    }

    /// Look up a record by id (first occurrence on duplicates).
    #[must_use]
    pub fn get(&self, id: &IssueId) -> Option<&MaterialityIssue> {
        self.issues.iter().find(|issue| issue.id == *id)
    }

    /// Ids of non-header records currently flagged material.
    #[must_use]
    pub fn material_ids(&self) -> BTreeSet<IssueId> {
        self.issues
            .iter()
            .filter(|issue| issue.is_material && !issue.is_header())
            .map(|issue| issue.id.clone())
            .collect()
    }

    /// The toggle op log, for partitioning and freshness checks.
    #[must_use]
    pub const fn ops(&self) -> &OpLog {
        &self.ops
    }

    /// Current state version; bumped by every applied local mutation.
    #[must_use]
    pub const fn version(&self) -> StateVersion {
        self.version
    }

    /// The caller-supplied predefined template catalog.
    #[must_use]
    pub const fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.issues.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    // -- mutations ----------------------------------------------------------

    /// Set one field on the record with the given id.
    ///
    /// Score fields coerce their input (text parses, values clamp into
    /// [0, 100]); `is_material` takes the strict-boolean reading of the
    /// value and records a toggle op; `iro_selections` and
    /// `stakeholder_relevance` clear on JSON null.
    ///
    /// # Errors
    ///
    /// [`StoreError::IssueNotFound`] if the id is absent,
    /// [`StoreError::InvalidField`] if coercion rejects the value. Failed
    /// coercion leaves the record and the version untouched.
    pub fn set_field(
        &mut self,
        id: &IssueId,
        field: IssueField,
        value: &FieldValue,
        now_ms: i64,
    ) -> Result<StoreEffect, StoreError> {
        let index = self
            .issues
            .iter()
            .position(|issue| issue.id == *id)
            .ok_or_else(|| StoreError::IssueNotFound { id: id.clone() })?;

        if self.issues[index].is_header() {
            debug!(%id, %field, "ignoring field edit on header record");
            return Ok(StoreEffect::HeaderIgnored);
        }

        // Coerce before mutating so a rejected value cannot half-apply.
        let class = match field {
            IssueField::Name => {
                let text = coerce_text(field, value)?;
                self.issues[index].name = text;
                SaveClass::TextEdit
            }
            IssueField::Description => {
                let text = coerce_text(field, value)?;
                self.issues[index].description = text;
                SaveClass::TextEdit
            }
            IssueField::ImpactRelevance => {
                let score = coerce_score(field, value)?;
                self.issues[index].impact_relevance = score;
                SaveClass::ScoreEdit
            }
            IssueField::FinancialRelevance => {
                let score = coerce_score(field, value)?;
                self.issues[index].financial_relevance = score;
                SaveClass::ScoreEdit
            }
            IssueField::IsMaterial => {
                let flag = value.strict_flag();
                self.issues[index].is_material = flag;
                let kind = if flag { OpKind::Select } else { OpKind::Deselect };
                let version = self.bump();
                self.ops.record(id, kind, now_ms, version);
                debug!(%id, selected = flag, %version, "toggle recorded");
                return Ok(StoreEffect::Applied(SaveClass::Explicit));
            }
            IssueField::StakeholderRelevance => {
                if is_json_null(value) {
                    self.issues[index].stakeholder_relevance = None;
                } else {
                    self.issues[index].stakeholder_relevance = Some(coerce_score(field, value)?);
                }
                SaveClass::ScoreEdit
            }
            IssueField::IroSelections => {
                if is_json_null(value) {
                    self.issues[index].iro_selections = None;
                } else {
                    self.issues[index].iro_selections = Some(value.to_json());
                }
                SaveClass::TextEdit
            }
        };

        self.bump();
        Ok(StoreEffect::Applied(class))
    }

    /// Add an issue by display text.
    ///
    /// When a predefined template matches the text and a record with that
    /// text is already in the list, this deduplicates and returns the
    /// existing id. Otherwise a fresh `custom-` id is minted and a new
    /// record is appended with default scores and `is_material = true`.
    /// Two custom adds with identical text and no matching template create
    /// two distinct records.
    pub fn add_issue(&mut self, name: &str, description: &str, now_ms: i64) -> AddOutcome {
        if self.catalog.matching(name, description).is_some() {
            if let Some(existing) = self
                .issues
                .iter()
                .find(|issue| issue.name == name && issue.description == description)
            {
                debug!(id = %existing.id, "add deduplicated against predefined issue");
                return AddOutcome {
                    id: existing.id.clone(),
                    created: false,
                };
            }
        }

        let id = IssueId::mint_custom();
        self.insert_custom(id.clone(), name, description, now_ms);
        AddOutcome { id, created: true }
    }

    /// Add an issue under a caller-chosen id.
    ///
    /// Same behaviour as [`Self::add_issue`] minus the template dedup; for
    /// callers that mint their own ids.
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
        if self.get(&id).is_some() {
            return Err(StoreError::DuplicateId { id });
        }
        self.insert_custom(id.clone(), name, description, now_ms);
        Ok(AddOutcome { id, created: true })
    }

    /// Deselect an issue.
    ///
    /// Predefined issues stay in the list with `is_material = false`;
    /// custom issues are removed entirely. Either way a deselect op is
    /// recorded first, so a stale canonical reload cannot resurrect the
    /// selection.
    ///
    /// # Errors
    ///
    /// [`StoreError::IssueNotFound`] if the id is absent.
    pub fn deselect(&mut self, id: &IssueId, now_ms: i64) -> Result<DeselectOutcome, StoreError> {
        let index = self
            .issues
            .iter()
            .position(|issue| issue.id == *id)
            .ok_or_else(|| StoreError::IssueNotFound { id: id.clone() })?;

        if self.issues[index].is_header() {
            debug!(%id, "ignoring deselect on header record");
            return Ok(DeselectOutcome::HeaderIgnored);
        }

        let version = self.bump();
        self.ops.record(id, OpKind::Deselect, now_ms, version);

        if id.is_custom() {
            self.issues.remove(index);
            debug!(%id, %version, "custom issue removed");
            Ok(DeselectOutcome::Removed)
        } else {
            self.issues[index].is_material = false;
            debug!(%id, %version, "predefined issue deselected");
            Ok(DeselectOutcome::Deselected)
        }
    }

    // -- canonical adoption -------------------------------------------------

    /// Replace the canonical list wholesale.
    ///
    /// Used when a canonical recomputation arrives from outside. Does not
    /// bump the version: the counter tracks local mutations only, so the
    /// engine can tell which ops are newer than the incoming basis.
    pub fn replace_issues(&mut self, issues: Vec<MaterialityIssue>) {
        self.issues = issues;
    }

    /// Write a partition outcome's pool memberships back into the records.
    ///
    /// Selected records get `is_material = true`, available ones `false`;
    /// headers and ids the outcome does not mention are left alone. Not a
    /// local mutation: no version bump, no ops.
    pub fn adopt(&mut self, outcome: &PartitionOutcome) {
        let memberships = outcome.memberships();
        for issue in &mut self.issues {
            if issue.is_header() {
                continue;
            }
            if let Some(pool) = memberships.get(&issue.id) {
                issue.is_material = matches!(pool, Pool::Selected);
            }
        }
    }

    // -- internals ----------------------------------------------------------

    fn insert_custom(&mut self, id: IssueId, name: &str, description: &str, now_ms: i64) {
        let version = self.bump();
        self.ops.record(&id, OpKind::Select, now_ms, version);
        self.issues
            .push(MaterialityIssue::custom(id.clone(), name, description));
        debug!(%id, %version, "custom issue added");
    }

    fn bump(&mut self) -> StateVersion {
        self.version = self.version.next();
        self.version
    }
}

fn coerce_text(field: IssueField, value: &FieldValue) -> Result<String, StoreError> {
    value
        .to_text()
        .map_err(|source| StoreError::InvalidField { field, source })
}

fn coerce_score(field: IssueField, value: &FieldValue) -> Result<f64, StoreError> {
    value
        .to_score()
        .map(RelevanceScore::value)
        .map_err(|source| StoreError::InvalidField { field, source })
}

const fn is_json_null(value: &FieldValue) -> bool {
    matches!(value, FieldValue::Json(serde_json::Value::Null))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IssueTemplate;
    use crate::state::StateVersion;

    const NOW: i64 = 1_000_000;

    fn predefined(id: &str, name: &str) -> MaterialityIssue {
        MaterialityIssue {
            id: IssueId::new(id),
            name: name.to_string(),
            description: format!("About {name}"),
            impact_relevance: 30.0,
            financial_relevance: 40.0,
            is_material: false,
            stakeholder_relevance: None,
            iro_selections: None,
        }
    }

    fn header(id: &str, name: &str) -> MaterialityIssue {
        MaterialityIssue {
            id: IssueId::new(id),
            name: name.to_string(),
            description: String::new(),
            impact_relevance: 0.0,
            financial_relevance: 0.0,
            is_material: false,
            stakeholder_relevance: None,
            iro_selections: None,
        }
    }

    fn store_with(issues: Vec<MaterialityIssue>) -> IssueStore {
        IssueStore::with_issues(TemplateCatalog::default(), issues, 32)
    }

    // === set_field ===

    #[test]
    fn set_field_updates_text_fields() {
        let mut store = store_with(vec![predefined("water", "Water")]);
        let id = IssueId::new("water");

        let effect = store
            .set_field(
                &id,
                IssueField::Name,
                &FieldValue::Text("Water use".into()),
                NOW,
            )
            .unwrap();

        assert_eq!(effect, StoreEffect::Applied(SaveClass::TextEdit));
        assert_eq!(store.get(&id).unwrap().name, "Water use");
        assert_eq!(store.version(), StateVersion::new(1));
    }

    #[test]
    fn set_field_coerces_and_clamps_scores() {
        let mut store = store_with(vec![predefined("water", "Water")]);
        let id = IssueId::new("water");

        store
            .set_field(
                &id,
                IssueField::ImpactRelevance,
                &FieldValue::Text(" 73.5 ".into()),
                NOW,
            )
            .unwrap();
        assert!((store.get(&id).unwrap().impact_relevance - 73.5).abs() < f64::EPSILON);

        store
            .set_field(
                &id,
                IssueField::FinancialRelevance,
                &FieldValue::Number(250.0),
                NOW,
            )
            .unwrap();
        assert!((store.get(&id).unwrap().financial_relevance - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn set_field_rejects_bad_scores_without_mutating() {
        let mut store = store_with(vec![predefined("water", "Water")]);
        let id = IssueId::new("water");

        let err = store
            .set_field(
                &id,
                IssueField::ImpactRelevance,
                &FieldValue::Number(f64::NAN),
                NOW,
            )
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidFieldValue);

        let err = store
            .set_field(
                &id,
                IssueField::ImpactRelevance,
                &FieldValue::Text("high".into()),
                NOW,
            )
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidFieldValue);

        // Record and version untouched.
        assert!((store.get(&id).unwrap().impact_relevance - 30.0).abs() < f64::EPSILON);
        assert_eq!(store.version(), StateVersion::ZERO);
    }

    #[test]
    fn set_field_is_material_takes_strict_booleans_only() {
        let mut store = store_with(vec![predefined("water", "Water")]);
        let id = IssueId::new("water");

        store
            .set_field(&id, IssueField::IsMaterial, &FieldValue::Flag(true), NOW)
            .unwrap();
        assert!(store.get(&id).unwrap().is_material);

        // Truthy-looking non-booleans read as false.
        store
            .set_field(
                &id,
                IssueField::IsMaterial,
                &FieldValue::Text("true".into()),
                NOW,
            )
            .unwrap();
        assert!(!store.get(&id).unwrap().is_material);

        store
            .set_field(&id, IssueField::IsMaterial, &FieldValue::Number(1.0), NOW)
            .unwrap();
        assert!(!store.get(&id).unwrap().is_material);
    }

    #[test]
    fn set_field_is_material_records_a_stamped_op() {
        let mut store = store_with(vec![predefined("water", "Water")]);
        let id = IssueId::new("water");

        store
            .set_field(&id, IssueField::IsMaterial, &FieldValue::Flag(true), NOW)
            .unwrap();

        let op = store.ops().latest(&id).unwrap();
        assert_eq!(op.kind, OpKind::Select);
        assert_eq!(op.recorded_at_ms, NOW);
        assert_eq!(op.version, StateVersion::new(1));

        store
            .set_field(&id, IssueField::IsMaterial, &FieldValue::Flag(false), NOW + 10)
            .unwrap();
        let op = store.ops().latest(&id).unwrap();
        assert_eq!(op.kind, OpKind::Deselect);
        assert_eq!(op.version, StateVersion::new(2));
    }

    #[test]
    fn set_field_null_clears_optional_fields() {
        let mut store = store_with(vec![predefined("water", "Water")]);
        let id = IssueId::new("water");

        store
            .set_field(
                &id,
                IssueField::StakeholderRelevance,
                &FieldValue::Number(55.0),
                NOW,
            )
            .unwrap();
        assert_eq!(store.get(&id).unwrap().stakeholder_relevance, Some(55.0));

        store
            .set_field(
                &id,
                IssueField::StakeholderRelevance,
                &FieldValue::Json(serde_json::Value::Null),
                NOW,
            )
            .unwrap();
        assert_eq!(store.get(&id).unwrap().stakeholder_relevance, None);
    }

    #[test]
    fn set_field_passes_iro_selections_through() {
        let mut store = store_with(vec![predefined("water", "Water")]);
        let id = IssueId::new("water");
        let selections = serde_json::json!({"impacts": ["spill risk"]});

        store
            .set_field(
                &id,
                IssueField::IroSelections,
                &FieldValue::Json(selections.clone()),
                NOW,
            )
            .unwrap();
        assert_eq!(store.get(&id).unwrap().iro_selections, Some(selections));
    }

    #[test]
    fn set_field_on_header_is_a_no_op() {
        let mut store = store_with(vec![header("env", "Environment")]);
        let id = IssueId::new("env");

        let effect = store
            .set_field(&id, IssueField::IsMaterial, &FieldValue::Flag(true), NOW)
            .unwrap();

        assert_eq!(effect, StoreEffect::HeaderIgnored);
        assert_eq!(effect.save_class(), None);
        assert!(!store.get(&id).unwrap().is_material);
        assert_eq!(store.version(), StateVersion::ZERO);
        assert!(store.ops().is_empty());
    }

    #[test]
    fn set_field_unknown_id_errors() {
        let mut store = store_with(vec![]);
        let err = store
            .set_field(
                &IssueId::new("ghost"),
                IssueField::Name,
                &FieldValue::Text("x".into()),
                NOW,
            )
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::IssueNotFound);
    }

    // === add_issue ===

    #[test]
    fn add_issue_mints_a_custom_record() {
        let mut store = store_with(vec![]);

        let outcome = store.add_issue("Gestione rifiuti", "Waste handling", NOW);
        assert!(outcome.created);
        assert!(outcome.id.is_custom());
        assert_eq!(outcome.save_class(), Some(SaveClass::Explicit));

        let issue = store.get(&outcome.id).unwrap();
        assert!(issue.is_material);
        assert!((issue.impact_relevance - 50.0).abs() < f64::EPSILON);
        assert!((issue.financial_relevance - 50.0).abs() < f64::EPSILON);

        // The new selection is protected by a fresh op.
        assert_eq!(store.ops().latest(&outcome.id).unwrap().kind, OpKind::Select);
    }

    #[test]
    fn add_issue_dedups_against_matching_template() {
        let catalog = TemplateCatalog::new(vec![IssueTemplate::new(
            "waste",
            "Gestione rifiuti",
            "Waste handling",
        )]);
        let mut store = IssueStore::with_issues(
            catalog,
            vec![MaterialityIssue {
                id: IssueId::new("waste"),
                name: "Gestione rifiuti".to_string(),
                description: "Waste handling".to_string(),
                impact_relevance: 20.0,
                financial_relevance: 20.0,
                is_material: true,
                stakeholder_relevance: None,
                iro_selections: None,
            }],
            32,
        );

        let outcome = store.add_issue("Gestione rifiuti", "Waste handling", NOW);
        assert!(!outcome.created);
        assert_eq!(outcome.id, IssueId::new("waste"));
        assert_eq!(outcome.save_class(), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn add_issue_without_template_match_allows_duplicates() {
        let mut store = store_with(vec![]);

        let first = store.add_issue("Ad-hoc topic", "desc", NOW);
        let second = store.add_issue("Ad-hoc topic", "desc", NOW + 1);

        assert!(first.created);
        assert!(second.created);
        assert_ne!(first.id, second.id);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn add_issue_with_id_rejects_collisions() {
        let mut store = store_with(vec![]);
        let id = IssueId::new("custom-fixed");

        store
            .add_issue_with_id(id.clone(), "Topic", "desc", NOW)
            .unwrap();
        let err = store
            .add_issue_with_id(id.clone(), "Topic", "desc", NOW)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::DuplicateIssueId);
        assert_eq!(store.len(), 1);
    }

    // === deselect ===

    #[test]
    fn deselect_keeps_predefined_records() {
        let mut store = store_with(vec![{
            let mut issue = predefined("water", "Water");
            issue.is_material = true;
            issue
        }]);
        let id = IssueId::new("water");

        let outcome = store.deselect(&id, NOW).unwrap();
        assert_eq!(outcome, DeselectOutcome::Deselected);
        assert_eq!(outcome.save_class(), Some(SaveClass::Explicit));

        let issue = store.get(&id).unwrap();
        assert!(!issue.is_material);
        assert_eq!(store.ops().latest(&id).unwrap().kind, OpKind::Deselect);
    }

    #[test]
    fn deselect_removes_custom_records_but_keeps_the_op() {
        let mut store = store_with(vec![]);
        let outcome = store.add_issue("Ad-hoc", "desc", NOW);
        let id = outcome.id;

        let outcome = store.deselect(&id, NOW + 100).unwrap();
        assert_eq!(outcome, DeselectOutcome::Removed);
        assert!(store.get(&id).is_none());
        assert!(store.is_empty());

        // The op survives so a stale reload cannot resurrect the record.
        assert_eq!(store.ops().latest(&id).unwrap().kind, OpKind::Deselect);
    }

    #[test]
    fn deselect_on_header_is_a_no_op() {
        let mut store = store_with(vec![header("env", "Environment")]);
        let outcome = store.deselect(&IssueId::new("env"), NOW).unwrap();
        assert_eq!(outcome, DeselectOutcome::HeaderIgnored);
        assert_eq!(store.len(), 1);
        assert_eq!(store.version(), StateVersion::ZERO);
    }

    #[test]
    fn deselect_unknown_id_errors() {
        let mut store = store_with(vec![]);
        let err = store.deselect(&IssueId::new("ghost"), NOW).unwrap_err();
        assert_eq!(err.code(), ErrorCode::IssueNotFound);
    }

    // === material_ids and adoption ===

    #[test]
    fn material_ids_skips_headers_and_unselected() {
        let mut selected = predefined("water", "Water");
        selected.is_material = true;
        let mut header_selected = header("env", "Environment");
        header_selected.is_material = true; // corrupt input, must be ignored

        let store = store_with(vec![
            selected,
            predefined("waste", "Waste"),
            header_selected,
        ]);

        let ids = store.material_ids();
        assert_eq!(ids.len(), 1);
        assert!(ids.contains(&IssueId::new("water")));
    }

    #[test]
    fn adopt_writes_pool_memberships_back() {
        use crate::partition::partition;
        use crate::state::ReconcileState;

        let mut store = store_with(vec![
            predefined("water", "Water"),
            predefined("waste", "Waste"),
            header("env", "Environment"),
        ]);

        let selected: BTreeSet<IssueId> = [IssueId::new("water")].into();
        let outcome = partition(
            store.issues(),
            &selected,
            &ReconcileState::default(),
            store.ops(),
            NOW,
            4_000,
        );
        store.adopt(&outcome);

        assert!(store.get(&IssueId::new("water")).unwrap().is_material);
        assert!(!store.get(&IssueId::new("waste")).unwrap().is_material);
        assert!(!store.get(&IssueId::new("env")).unwrap().is_material);
    }

    #[test]
    fn replace_issues_does_not_bump_the_version() {
        let mut store = store_with(vec![predefined("water", "Water")]);
        store
            .set_field(
                &IssueId::new("water"),
                IssueField::Name,
                &FieldValue::Text("Water use".into()),
                NOW,
            )
            .unwrap();
        assert_eq!(store.version(), StateVersion::new(1));

        store.replace_issues(vec![predefined("waste", "Waste")]);
        assert_eq!(store.version(), StateVersion::new(1));
        assert_eq!(store.len(), 1);
    }
}
