//! Data model for materiality issues.
//!
//! Defines the canonical issue record, its editable fields with their
//! coercion rules, and the predefined template catalog custom issues are
//! deduplicated against.

pub mod issue;
pub mod template;

pub use issue::{
    FieldValue, InvalidFieldValue, IssueField, IssueId, MaterialityIssue, ParseEnumError,
    RelevanceScore,
};
pub use template::{IssueTemplate, TemplateCatalog};
