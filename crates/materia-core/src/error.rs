use std::fmt;

/// Machine-readable error codes for host-application decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    IssueNotFound,
    HeaderImmutable,
    InvalidFieldValue,
    InvalidEnumValue,
    MalformedRecord,
    DuplicateIssueId,
    SaveInFlight,
    SaveFailed,
    LoadFailed,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::IssueNotFound => "E2001",
            Self::HeaderImmutable => "E2002",
            Self::InvalidFieldValue => "E2003",
            Self::InvalidEnumValue => "E2004",
            Self::MalformedRecord => "E3001",
            Self::DuplicateIssueId => "E3002",
            Self::SaveInFlight => "E5001",
            Self::SaveFailed => "E5002",
            Self::LoadFailed => "E5003",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and notifications.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::IssueNotFound => "Issue not found",
            Self::HeaderImmutable => "Header issues cannot be modified",
            Self::InvalidFieldValue => "Invalid field value",
            Self::InvalidEnumValue => "Invalid field/operation name",
            Self::MalformedRecord => "Malformed issue record",
            Self::DuplicateIssueId => "Duplicate issue id in canonical list",
            Self::SaveInFlight => "A save is already in flight",
            Self::SaveFailed => "Persisting issues failed",
            Self::LoadFailed => "Loading issues failed",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in the engine config TOML and retry."),
            Self::IssueNotFound => None,
            Self::HeaderImmutable => {
                Some("Category headers are display-only; target a selectable issue id.")
            }
            Self::InvalidFieldValue => {
                Some("Relevance scores must be finite numbers; text must parse as a number.")
            }
            Self::InvalidEnumValue => Some("Use one of the documented field/operation names."),
            Self::MalformedRecord => {
                Some("The record was placed in the available pool; repair id/scores upstream.")
            }
            Self::DuplicateIssueId => {
                Some("Deduplicate the canonical source list; the first occurrence was kept.")
            }
            Self::SaveInFlight => Some("Wait for the pending save to complete before forcing one."),
            Self::SaveFailed => Some("Local edits are retained. Retry the save manually."),
            Self::LoadFailed => Some("Check backend connectivity and retry the load."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
