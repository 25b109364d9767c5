use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportRef {
    pub report_id: String,
    pub dataset_id: String,
}

impl ReportRef {
    #[must_use]
    pub fn new(report_id: impl Into<String>, dataset_id: impl Into<String>) -> Self {
        Self {
            report_id: report_id.into(),
            dataset_id: dataset_id.into(),
        }
    }

    /// Names of the identifiers that are blank.
    #[must_use]
    pub fn missing_identifiers(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.report_id.trim().is_empty() {
            missing.push("report_id");
        }
        if self.dataset_id.trim().is_empty() {
            missing.push("dataset_id");
        }
        missing
    }
}

impl fmt::Display for ReportRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.report_id, self.dataset_id)
    }
}

/// Identity of one attach attempt. A controller issues tokens from a
/// monotonically increasing counter, so a larger token always supersedes a
/// smaller one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(u64);

impl SessionToken {
    #[must_use]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedPhase {
    Idle,
    Cleaning,
    Authenticating,
    Validating,
    Configuring,
    Rendering,
    Ready,
    Error,
}

impl EmbedPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Cleaning => "cleaning",
            Self::Authenticating => "authenticating",
            Self::Validating => "validating",
            Self::Configuring => "configuring",
            Self::Rendering => "rendering",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }

    /// Progress estimate shown while the phase is active.
    #[must_use]
    pub fn progress(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Cleaning => 10,
            Self::Authenticating => 25,
            Self::Validating => 40,
            Self::Configuring => 55,
            Self::Rendering => 70,
            Self::Ready => 100,
            Self::Error => 0,
        }
    }
}

/// Progress reported after the widget signals `loaded` but before `rendered`.
pub const LOADED_PROGRESS: u8 = 85;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentState {
    pub dom_clean: bool,
    pub widget_service_ready: bool,
    pub credential_valid: bool,
    pub locator_valid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MissingIdentifiers,
    CredentialUnavailable,
    LocatorInvalid,
    ContainerUnavailable,
    ServiceUnavailable,
    WidgetError,
    RenderTimeout,
}

impl FailureKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingIdentifiers => "missing_identifiers",
            Self::CredentialUnavailable => "credential_unavailable",
            Self::LocatorInvalid => "locator_invalid",
            Self::ContainerUnavailable => "container_unavailable",
            Self::ServiceUnavailable => "service_unavailable",
            Self::WidgetError => "widget_error",
            Self::RenderTimeout => "render_timeout",
        }
    }

    /// Failures that no retry can fix without the host changing something.
    #[must_use]
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::MissingIdentifiers | Self::ContainerUnavailable)
    }
}

/// The only error shape the host UI observes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedFailure {
    pub kind: FailureKind,
    pub message: String,
    pub attempt: u32,
    pub can_retry: bool,
}

impl fmt::Display for EmbedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

/// Matches a widget error message against the markers that identify a
/// locator or embed-specific failure. Heuristic: markers are compared
/// case-insensitively as substrings.
#[must_use]
pub fn is_embed_locator_error(message: &str, markers: &[String]) -> bool {
    let haystack = message.to_ascii_lowercase();
    markers
        .iter()
        .map(|marker| marker.trim().to_ascii_lowercase())
        .filter(|marker| !marker.is_empty())
        .any(|marker| haystack.contains(&marker))
}
