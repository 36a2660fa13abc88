use serde::{Deserialize, Serialize};

use super::issue::IssueId;

/// One predefined issue definition from the host's reference catalog.
///
/// The catalog itself (the ~100 ESRS topic definitions) is host-supplied
/// input; the engine only consults it to deduplicate `add_issue` calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueTemplate {
    pub id: IssueId,
    pub name: String,
    pub description: String,
}

impl IssueTemplate {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: IssueId::new(id),
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Host-supplied set of predefined issue templates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateCatalog {
    templates: Vec<IssueTemplate>,
}

impl TemplateCatalog {
    #[must_use]
    pub const fn new(templates: Vec<IssueTemplate>) -> Self {
        Self { templates }
    }

    #[must_use]
    pub const fn empty() -> Self {
        Self {
            templates: Vec::new(),
        }
    }

    /// Find a template whose name and description both match exactly.
    #[must_use]
    pub fn matching(&self, name: &str, description: &str) -> Option<&IssueTemplate> {
        self.templates
            .iter()
            .find(|t| t.name == name && t.description == description)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IssueTemplate> {
        self.templates.iter()
    }
}
