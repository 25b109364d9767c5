use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_BACKEND_BASE_URL: &str = "http://127.0.0.1:8787";
pub const ENV_BACKEND_BASE_URL: &str = "REPORT_EMBED_BACKEND_BASE_URL";

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RENDER_TIMEOUT_MS: u64 = 45_000;
pub const DEFAULT_CREDENTIAL_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_CREDENTIAL_TTL_MS: u64 = 60 * 60 * 1_000;
pub const DEFAULT_CREDENTIAL_SAFETY_MARGIN_MS: u64 = 5 * 60 * 1_000;
pub const DEFAULT_SHALLOW_SETTLE_MS: u64 = 50;
pub const DEFAULT_DEEP_SETTLE_MS: u64 = 250;
pub const DEFAULT_LOG_CAPACITY: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,
    #[error("render_timeout_ms must be greater than zero")]
    ZeroRenderTimeout,
    #[error("credential_timeout_ms must be greater than zero")]
    ZeroCredentialTimeout,
    #[error("credential_safety_margin_ms ({margin_ms}) must be less than credential_ttl_ms ({ttl_ms})")]
    MarginNotBelowTtl { margin_ms: u64, ttl_ms: u64 },
    #[error("log_capacity must be at least 1")]
    ZeroLogCapacity,
    #[error("locator rule `{field}` must not be empty")]
    EmptyLocatorRule { field: &'static str },
    #[error("policy json is invalid: {message}")]
    InvalidJson { message: String },
    #[error("base url must not be empty")]
    EmptyBaseUrl,
    #[error("base url must be an http:// or https:// url with a host and no query")]
    InvalidBaseUrl,
}

/// Structural expectations for a signed embed locator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorRules {
    pub required_scheme: String,
    /// Hosts equal to this value or ending in `.{value}` are accepted.
    pub required_host_suffix: String,
    /// Accepted hosts other than this one produce a warning.
    pub canonical_host: String,
    pub embed_path_marker: String,
    pub report_param: String,
    pub group_param: String,
}

impl Default for LocatorRules {
    fn default() -> Self {
        Self {
            required_scheme: "https".to_string(),
            required_host_suffix: "powerbi.com".to_string(),
            canonical_host: "app.powerbi.com".to_string(),
            embed_path_marker: "reportEmbed".to_string(),
            report_param: "reportId".to_string(),
            group_param: "groupId".to_string(),
        }
    }
}

/// What the widget subsystem leaves behind in the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactSignature {
    /// Container attributes the widget writes, matched by exact name.
    pub container_attributes: Vec<String>,
    /// Container attributes the widget writes, matched by prefix.
    pub attribute_prefixes: Vec<String>,
    /// CSS selectors for nodes the widget creates anywhere in the document.
    pub document_selectors: Vec<String>,
}

impl Default for ArtifactSignature {
    fn default() -> Self {
        Self {
            container_attributes: vec!["powerbi-embed-url".to_string(), "powerbi-type".to_string()],
            attribute_prefixes: vec!["powerbi-".to_string()],
            document_selectors: vec![
                "iframe[src*=\"reportEmbed\"]".to_string(),
                "iframe[src*=\"powerbi.com\"]".to_string(),
                ".powerbi-frame".to_string(),
            ],
        }
    }
}

impl ArtifactSignature {
    #[must_use]
    pub fn matches_attribute(&self, name: &str) -> bool {
        let name = name.trim().to_ascii_lowercase();
        self.container_attributes
            .iter()
            .any(|attribute| attribute.eq_ignore_ascii_case(&name))
            || self
                .attribute_prefixes
                .iter()
                .filter(|prefix| !prefix.is_empty())
                .any(|prefix| name.starts_with(&prefix.to_ascii_lowercase()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedPolicy {
    pub max_attempts: u32,
    pub render_timeout_ms: u64,
    pub credential_timeout_ms: u64,
    pub credential_ttl_ms: u64,
    pub credential_safety_margin_ms: u64,
    pub shallow_settle_ms: u64,
    pub deep_settle_ms: u64,
    pub log_capacity: usize,
    /// Substrings that mark a widget error as locator/embed specific and
    /// therefore eligible for a silent retry.
    pub auto_retry_error_markers: Vec<String>,
    pub locator: LocatorRules,
    pub artifacts: ArtifactSignature,
}

impl Default for EmbedPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            render_timeout_ms: DEFAULT_RENDER_TIMEOUT_MS,
            credential_timeout_ms: DEFAULT_CREDENTIAL_TIMEOUT_MS,
            credential_ttl_ms: DEFAULT_CREDENTIAL_TTL_MS,
            credential_safety_margin_ms: DEFAULT_CREDENTIAL_SAFETY_MARGIN_MS,
            shallow_settle_ms: DEFAULT_SHALLOW_SETTLE_MS,
            deep_settle_ms: DEFAULT_DEEP_SETTLE_MS,
            log_capacity: DEFAULT_LOG_CAPACITY,
            auto_retry_error_markers: vec![
                "embed url".to_string(),
                "embedurl".to_string(),
                "invalid url".to_string(),
                "reportembed".to_string(),
                "powerbientitynotfound".to_string(),
                "loadreportfailed".to_string(),
            ],
            locator: LocatorRules::default(),
            artifacts: ArtifactSignature::default(),
        }
    }
}

impl EmbedPolicy {
    pub fn from_json(raw: &str) -> Result<Self, PolicyError> {
        let trimmed = raw.trim();
        let policy = if trimmed.is_empty() {
            Self::default()
        } else {
            serde_json::from_str::<Self>(trimmed).map_err(|error| PolicyError::InvalidJson {
                message: error.to_string(),
            })?
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.max_attempts == 0 {
            return Err(PolicyError::ZeroAttempts);
        }
        if self.render_timeout_ms == 0 {
            return Err(PolicyError::ZeroRenderTimeout);
        }
        if self.credential_timeout_ms == 0 {
            return Err(PolicyError::ZeroCredentialTimeout);
        }
        if self.credential_safety_margin_ms >= self.credential_ttl_ms {
            return Err(PolicyError::MarginNotBelowTtl {
                margin_ms: self.credential_safety_margin_ms,
                ttl_ms: self.credential_ttl_ms,
            });
        }
        if self.log_capacity == 0 {
            return Err(PolicyError::ZeroLogCapacity);
        }
        let rules = &self.locator;
        for (field, value) in [
            ("required_scheme", &rules.required_scheme),
            ("required_host_suffix", &rules.required_host_suffix),
            ("embed_path_marker", &rules.embed_path_marker),
            ("report_param", &rules.report_param),
            ("group_param", &rules.group_param),
        ] {
            if value.trim().is_empty() {
                return Err(PolicyError::EmptyLocatorRule { field });
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }

    #[must_use]
    pub fn credential_timeout(&self) -> Duration {
        Duration::from_millis(self.credential_timeout_ms)
    }

    #[must_use]
    pub fn settle_delay(&self, deep: bool) -> Duration {
        if deep {
            Duration::from_millis(self.deep_settle_ms)
        } else {
            Duration::from_millis(self.shallow_settle_ms)
        }
    }
}

/// Where the backend base URL was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseUrlSource {
    Env,
    DefaultLocal,
}

impl BaseUrlSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Env => ENV_BACKEND_BASE_URL,
            Self::DefaultLocal => "default_local",
        }
    }
}

pub fn resolve_backend_base_url() -> Result<(String, BaseUrlSource), PolicyError> {
    backend_base_url_from(std::env::var(ENV_BACKEND_BASE_URL).ok().as_deref())
}

/// A missing or blank override falls back to the local default.
pub fn backend_base_url_from(
    override_value: Option<&str>,
) -> Result<(String, BaseUrlSource), PolicyError> {
    match override_value.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => Ok((normalize_base_url(value)?, BaseUrlSource::Env)),
        None => Ok((
            normalize_base_url(DEFAULT_BACKEND_BASE_URL)?,
            BaseUrlSource::DefaultLocal,
        )),
    }
}

/// Parses `raw` as an absolute http(s) URL and returns it without a
/// trailing slash so request paths can be appended directly.
pub fn normalize_base_url(raw: &str) -> Result<String, PolicyError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PolicyError::EmptyBaseUrl);
    }
    let url = Url::parse(trimmed).map_err(|_| PolicyError::InvalidBaseUrl)?;
    let has_host = url.host_str().is_some_and(|host| !host.is_empty());
    if !matches!(url.scheme(), "http" | "https")
        || !has_host
        || url.query().is_some()
        || url.fragment().is_some()
    {
        return Err(PolicyError::InvalidBaseUrl);
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}
