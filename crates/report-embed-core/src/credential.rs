use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use futures::{FutureExt, pin_mut, select_biased};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::{EmbedPolicy, PolicyError, normalize_base_url};
use crate::platform::{CredentialTransport, EmbedClock};
use crate::session::ReportRef;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("embed_token_timeout:{timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("embed_token_http_{status}:{body}")]
    Http { status: u16, body: String },
    #[error("embed_token_request_failed:{message}")]
    Request { message: String },
    #[error("embed_token_decode_failed:{message}")]
    Decode { message: String },
    #[error("embed_token_missing_field:{field}")]
    MissingField { field: &'static str },
    #[error("embed_token_aborted")]
    Aborted,
}

/// Backend reply for `GET /embed-token/{reportId}?datasetId=...`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedTokenResponse {
    pub token: String,
    #[serde(rename = "embedUrl", alias = "embed_url")]
    pub embed_url: String,
    /// RFC 3339 expiry reported by the backend, when it knows one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedCredential {
    pub token: String,
    pub locator: String,
    pub expires_at_unix_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedCredential {
    pub report: ReportRef,
    pub credential: EmbedCredential,
}

pub struct CredentialProvider {
    transport: Rc<dyn CredentialTransport>,
    clock: Rc<dyn EmbedClock>,
    ttl_ms: u64,
    safety_margin_ms: u64,
    timeout: Duration,
    cache: RefCell<Option<CachedCredential>>,
    network_fetches: Cell<u64>,
}

impl CredentialProvider {
    #[must_use]
    pub fn new(
        transport: Rc<dyn CredentialTransport>,
        clock: Rc<dyn EmbedClock>,
        policy: &EmbedPolicy,
    ) -> Self {
        Self {
            transport,
            clock,
            ttl_ms: policy.credential_ttl_ms,
            safety_margin_ms: policy
                .credential_safety_margin_ms
                .min(policy.credential_ttl_ms.saturating_sub(1)),
            timeout: policy.credential_timeout(),
            cache: RefCell::new(None),
            network_fetches: Cell::new(0),
        }
    }

    /// Cache read. A different report, or an expired entry, removes the
    /// entry instead of leaving it behind.
    pub fn lookup(&self, report: &ReportRef) -> Option<EmbedCredential> {
        let mut cache = self.cache.borrow_mut();
        let entry = cache.as_ref()?;
        if &entry.report != report {
            tracing::debug!(
                previous = %entry.report,
                next = %report,
                "report changed; dropping cached embed credential"
            );
            cache.take();
            return None;
        }
        if self.clock.now_unix_ms() >= entry.credential.expires_at_unix_ms {
            tracing::debug!(%report, "cached embed credential expired");
            cache.take();
            return None;
        }
        Some(entry.credential.clone())
    }

    /// Network fetch bounded by the credential timeout. Does not touch the
    /// cache; callers that are still current follow up with [`Self::store`].
    pub async fn fetch(&self, report: &ReportRef) -> Result<EmbedCredential, CredentialError> {
        self.network_fetches
            .set(self.network_fetches.get().saturating_add(1));
        let response = self.fetch_with_timeout(report).await?;
        self.credential_from_response(response)
    }

    pub fn store(&self, report: &ReportRef, credential: &EmbedCredential) {
        if credential.expires_at_unix_ms <= self.clock.now_unix_ms() {
            tracing::warn!(%report, "embed credential expires within the safety margin; not cached");
            return;
        }
        *self.cache.borrow_mut() = Some(CachedCredential {
            report: report.clone(),
            credential: credential.clone(),
        });
    }

    pub fn invalidate(&self) {
        self.cache.borrow_mut().take();
    }

    #[must_use]
    pub fn cached(&self) -> Option<CachedCredential> {
        self.cache.borrow().clone()
    }

    #[must_use]
    pub fn network_fetches(&self) -> u64 {
        self.network_fetches.get()
    }

    pub fn abort_in_flight(&self) {
        self.transport.abort_in_flight();
    }

    async fn fetch_with_timeout(
        &self,
        report: &ReportRef,
    ) -> Result<EmbedTokenResponse, CredentialError> {
        let fetch = self.transport.fetch_embed_credential(report).fuse();
        let deadline = self.clock.sleep(self.timeout).fuse();
        pin_mut!(fetch, deadline);

        // Returning drops the fetch future; transports cancel the request on
        // drop, so only this request is abandoned.
        select_biased! {
            result = fetch => result,
            () = deadline => {
                Err(CredentialError::Timeout {
                    timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    fn credential_from_response(
        &self,
        response: EmbedTokenResponse,
    ) -> Result<EmbedCredential, CredentialError> {
        let token = response.token.trim().to_string();
        if token.is_empty() {
            return Err(CredentialError::MissingField { field: "token" });
        }
        let locator = response.embed_url.trim().to_string();
        if locator.is_empty() {
            return Err(CredentialError::MissingField { field: "embedUrl" });
        }

        let now = self.clock.now_unix_ms();
        let mut expires_at = now.saturating_add(self.ttl_ms);
        if let Some(reported) = response
            .expiration
            .as_deref()
            .and_then(parse_expiration_unix_ms)
        {
            expires_at = expires_at.min(reported);
        }

        Ok(EmbedCredential {
            token,
            locator,
            expires_at_unix_ms: expires_at.saturating_sub(self.safety_margin_ms),
        })
    }
}

fn parse_expiration_unix_ms(raw: &str) -> Option<u64> {
    let parsed = chrono::DateTime::parse_from_rfc3339(raw.trim()).ok()?;
    u64::try_from(parsed.timestamp_millis()).ok()
}

/// Builds `{base}/embed-token/{reportId}?datasetId={datasetId}` with both
/// identifiers percent-encoded.
pub fn embed_token_url(base_url: &str, report: &ReportRef) -> Result<String, PolicyError> {
    let base = normalize_base_url(base_url)?;
    let mut url = Url::parse(&base).map_err(|_| PolicyError::InvalidBaseUrl)?;
    url.path_segments_mut()
        .map_err(|()| PolicyError::InvalidBaseUrl)?
        .pop_if_empty()
        .push("embed-token")
        .push(report.report_id.trim());
    url.query_pairs_mut()
        .append_pair("datasetId", report.dataset_id.trim());
    Ok(url.to_string())
}
