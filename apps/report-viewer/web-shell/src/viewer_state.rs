use report_embed_core::config::{DEFAULT_BACKEND_BASE_URL, normalize_base_url};
use report_embed_core::{ArtifactSignature, EmbedFailure, EmbedPhase, EmbedPolicy, PolicyError};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONTAINER_ID: &str = "report-embed-container";
pub const DEFAULT_STATUS_ID: &str = "report-embed-status";

/// Host-page options passed to the viewer constructor as JSON. Every field
/// is optional; an empty string yields the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerOptions {
    pub container_id: String,
    pub status_id: Option<String>,
    pub backend_base_url: String,
    pub policy: EmbedPolicy,
}

impl Default for ViewerOptions {
    fn default() -> Self {
        Self {
            container_id: DEFAULT_CONTAINER_ID.to_string(),
            status_id: Some(DEFAULT_STATUS_ID.to_string()),
            backend_base_url: DEFAULT_BACKEND_BASE_URL.to_string(),
            policy: EmbedPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ViewerOptionsError {
    #[error("viewer options json is invalid: {message}")]
    InvalidJson { message: String },
    #[error("viewer options need a container id")]
    ContainerIdMissing,
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

impl ViewerOptions {
    pub fn from_json(raw: &str) -> Result<Self, ViewerOptionsError> {
        let trimmed = raw.trim();
        let mut options = if trimmed.is_empty() {
            Self::default()
        } else {
            serde_json::from_str::<Self>(trimmed).map_err(|error| {
                ViewerOptionsError::InvalidJson {
                    message: error.to_string(),
                }
            })?
        };

        options.container_id = options.container_id.trim().to_string();
        if options.container_id.is_empty() {
            return Err(ViewerOptionsError::ContainerIdMissing);
        }
        options.status_id = options
            .status_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());
        options.backend_base_url = normalize_base_url(&options.backend_base_url)?;
        options.policy.validate()?;
        Ok(options)
    }
}

/// What the status line shows. Fed from observer callbacks only, so it never
/// needs a handle back to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusView {
    pub phase: EmbedPhase,
    pub progress: u8,
    pub error: Option<String>,
    pub can_retry: bool,
}

impl Default for StatusView {
    fn default() -> Self {
        Self {
            phase: EmbedPhase::Idle,
            progress: 0,
            error: None,
            can_retry: false,
        }
    }
}

impl StatusView {
    pub fn apply_phase(&mut self, phase: EmbedPhase, progress: u8) {
        self.phase = phase;
        self.progress = progress;
        if phase != EmbedPhase::Error {
            self.error = None;
            self.can_retry = false;
        }
    }

    pub fn apply_failure(&mut self, failure: &EmbedFailure) {
        self.phase = EmbedPhase::Error;
        self.error = Some(failure.message.clone());
        self.can_retry = failure.can_retry;
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.phase == EmbedPhase::Error
    }

    #[must_use]
    pub fn line(&self) -> String {
        match self.phase {
            EmbedPhase::Error => {
                let detail = self.error.as_deref().unwrap_or("embedding failed");
                let hint = if self.can_retry {
                    "retry available"
                } else {
                    "reload required"
                };
                format!("Report error: {detail} ({hint})")
            }
            EmbedPhase::Idle => "Report: idle".to_string(),
            EmbedPhase::Ready => "Report: ready".to_string(),
            phase => format!("Report: {} ({}%)", phase.as_str(), self.progress),
        }
    }
}

/// Joins the non-empty document selectors into one `querySelectorAll`
/// argument.
#[must_use]
pub fn selector_list(signature: &ArtifactSignature) -> Option<String> {
    let selectors = signature
        .document_selectors
        .iter()
        .map(|selector| selector.as_str().trim())
        .filter(|selector| !selector.is_empty())
        .collect::<Vec<_>>();
    if selectors.is_empty() {
        None
    } else {
        Some(selectors.join(", "))
    }
}
