use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use ulid::Ulid;

/// Prefix for engine-minted custom issue ids.
const CUSTOM_ID_PREFIX: &str = "custom-";

/// Stable identifier for a materiality issue.
///
/// Predefined catalog topics carry semantic slugs (`climate-adaptation`);
/// user-created topics get a minted `custom-<ulid>` id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueId(String);

impl IssueId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Mint a fresh id for a user-created issue.
    #[must_use]
    pub fn mint_custom() -> Self {
        Self(format!("{CUSTOM_ID_PREFIX}{}", Ulid::new()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for user-created issues, which are hard-removed on deselect.
    #[must_use]
    pub fn is_custom(&self) -> bool {
        self.0.starts_with(CUSTOM_ID_PREFIX)
    }

    /// True when the id is empty or whitespace; such records are malformed.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Relevance score on the inclusive [0, 100] scale.
///
/// Construction clamps finite values into range and rejects non-finite
/// input; this is the single coercion point for every score mutation.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct RelevanceScore(f64);

impl RelevanceScore {
    pub const MIN: f64 = 0.0;
    pub const MAX: f64 = 100.0;
    /// Default score pair for freshly added custom issues.
    pub const CUSTOM_DEFAULT: Self = Self(50.0);

    /// Clamp `value` into [0, 100].
    ///
    /// # Errors
    ///
    /// Returns [`InvalidFieldValue::NonFiniteScore`] for NaN or infinities.
    pub fn new(value: f64) -> Result<Self, InvalidFieldValue> {
        if value.is_finite() {
            Ok(Self(value.clamp(Self::MIN, Self::MAX)))
        } else {
            Err(InvalidFieldValue::NonFiniteScore { got: value })
        }
    }

    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }
}

/// Fields addressable through the record store's `set_field`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueField {
    Name,
    Description,
    ImpactRelevance,
    FinancialRelevance,
    IsMaterial,
    StakeholderRelevance,
    IroSelections,
}

impl IssueField {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Description => "description",
            Self::ImpactRelevance => "impact_relevance",
            Self::FinancialRelevance => "financial_relevance",
            Self::IsMaterial => "is_material",
            Self::StakeholderRelevance => "stakeholder_relevance",
            Self::IroSelections => "iro_selections",
        }
    }

    /// True for the numeric fields that coerce and clamp their input.
    #[must_use]
    pub const fn is_score(self) -> bool {
        matches!(
            self,
            Self::ImpactRelevance | Self::FinancialRelevance | Self::StakeholderRelevance
        )
    }
}

impl fmt::Display for IssueField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn normalize(input: &str) -> String {
    input.trim().to_ascii_lowercase()
}

impl FromStr for IssueField {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = normalize(s);
        match normalized.as_str() {
            "name" => Ok(Self::Name),
            "description" => Ok(Self::Description),
            "impact_relevance" => Ok(Self::ImpactRelevance),
            "financial_relevance" => Ok(Self::FinancialRelevance),
            "is_material" => Ok(Self::IsMaterial),
            "stakeholder_relevance" => Ok(Self::StakeholderRelevance),
            "iro_selections" => Ok(Self::IroSelections),
            _ => Err(ParseEnumError {
                expected: "issue field",
                got: s.to_string(),
            }),
        }
    }
}

/// Loosely typed input accepted by `set_field` before coercion.
///
/// Variant order matters for untagged deserialization: booleans and
/// numbers must be tried before the catch-all JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Flag(bool),
    Number(f64),
    Text(String),
    Json(serde_json::Value),
}

impl FieldValue {
    /// Coerce to a clamped relevance score.
    ///
    /// Numbers clamp into [0, 100]; text is parsed as a number first.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidFieldValue`] for non-finite numbers, unparseable
    /// text, or value shapes that cannot carry a score.
    pub fn to_score(&self) -> Result<RelevanceScore, InvalidFieldValue> {
        match self {
            Self::Number(n) => RelevanceScore::new(*n),
            Self::Text(s) => match s.trim().parse::<f64>() {
                Ok(n) => RelevanceScore::new(n),
                Err(_) => Err(InvalidFieldValue::UnparseableScore { got: s.clone() }),
            },
            Self::Flag(_) | Self::Json(_) => Err(InvalidFieldValue::WrongShape {
                expected: "number",
                got: self.kind_str(),
            }),
        }
    }

    /// Strict-boolean selection semantics: only the exact boolean `true`
    /// selects. Numbers, strings, and objects never coerce to selected.
    #[must_use]
    pub const fn strict_flag(&self) -> bool {
        matches!(self, Self::Flag(true))
    }

    /// Coerce to display text.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidFieldValue::WrongShape`] for non-text input.
    pub fn to_text(&self) -> Result<String, InvalidFieldValue> {
        match self {
            Self::Text(s) => Ok(s.clone()),
            Self::Flag(_) | Self::Number(_) | Self::Json(_) => {
                Err(InvalidFieldValue::WrongShape {
                    expected: "text",
                    got: self.kind_str(),
                })
            }
        }
    }

    /// Coerce to an opaque JSON payload (for `iro_selections`).
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Flag(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Json(v) => v.clone(),
        }
    }

    const fn kind_str(&self) -> &'static str {
        match self {
            Self::Flag(_) => "flag",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
            Self::Json(_) => "json",
        }
    }
}

/// A single materiality issue record.
///
/// `is_material` is the single source of truth for "currently selected."
/// Records with an empty description and zero relevance scores are
/// category headers: display-only rows that are never selectable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialityIssue {
    pub id: IssueId,
    pub name: String,
    pub description: String,
    pub impact_relevance: f64,
    pub financial_relevance: f64,
    pub is_material: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stakeholder_relevance: Option<f64>,
    /// Selected impact/risk/opportunity text associations. Opaque to the
    /// engine; carried through on every mutation unchanged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iro_selections: Option<serde_json::Value>,
}

impl Default for MaterialityIssue {
    fn default() -> Self {
        Self {
            id: IssueId::new(""),
            name: String::new(),
            description: String::new(),
            impact_relevance: 0.0,
            financial_relevance: 0.0,
            is_material: false,
            stakeholder_relevance: None,
            iro_selections: None,
        }
    }
}

impl MaterialityIssue {
    /// Build a user-created custom issue: default 50/50 scores, selected.
    #[must_use]
    pub fn custom(id: IssueId, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: description.into(),
            impact_relevance: RelevanceScore::CUSTOM_DEFAULT.value(),
            financial_relevance: RelevanceScore::CUSTOM_DEFAULT.value(),
            is_material: true,
            stakeholder_relevance: None,
            iro_selections: None,
        }
    }

    /// Category-header detection: empty description and both relevance
    /// scores at zero. Headers are immutable and excluded from both
    /// partitions.
    #[must_use]
    pub fn is_header(&self) -> bool {
        self.description.trim().is_empty()
            && self.impact_relevance == 0.0
            && self.financial_relevance == 0.0
    }
}

/// Error returned when parsing an enum value from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub expected: &'static str,
    pub got: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: '{}'", self.expected, self.got)
    }
}

impl std::error::Error for ParseEnumError {}

/// Error returned when a field value cannot be coerced to its field's type.
#[derive(Debug, Clone, PartialEq)]
pub enum InvalidFieldValue {
    /// Relevance scores must be finite numbers.
    NonFiniteScore { got: f64 },
    /// Text offered for a score field did not parse as a number.
    UnparseableScore { got: String },
    /// The value's shape does not match the field.
    WrongShape {
        expected: &'static str,
        got: &'static str,
    },
}

impl fmt::Display for InvalidFieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonFiniteScore { got } => {
                write!(f, "relevance score must be finite, got {got}")
            }
            Self::UnparseableScore { got } => {
                write!(f, "cannot interpret '{got}' as a relevance score")
            }
            Self::WrongShape { expected, got } => {
                write!(f, "expected {expected} value, got {got}")
            }
        }
    }
}

impl std::error::Error for InvalidFieldValue {}
