//! Seams between the controller and the outside world: the host document,
//! the embedding SDK, the backend token endpoint, and time.

use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};

use crate::config::ArtifactSignature;
use crate::credential::{CredentialError, EmbedCredential, EmbedTokenResponse};
use crate::session::ReportRef;

pub trait EmbedClock {
    fn now_unix_ms(&self) -> u64;
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()>;
}

/// The host document as seen by the hygiene manager. The container element
/// keeps its identity for the lifetime of the surface; only its children and
/// attributes change.
pub trait EmbedSurface {
    fn container_present(&self) -> bool;
    fn child_count(&self) -> usize;
    /// Names of container attributes that match `signature`.
    fn widget_attributes(&self, signature: &ArtifactSignature) -> Vec<String>;
    fn clear_children(&self);
    fn remove_attribute(&self, name: &str);
    /// Removes nodes matching `signature` anywhere in the document, including
    /// outside the container. Returns the number of nodes removed.
    fn purge_document_artifacts(&self, signature: &ArtifactSignature) -> usize;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmbedSdkError {
    #[error("embed_sdk_unavailable:{0}")]
    Unavailable(String),
    #[error("embed_rejected:{0}")]
    EmbedRejected(String),
    #[error("embed_handler_failed:{0}")]
    Handler(String),
    #[error("embed_reset_failed:{0}")]
    Reset(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetEventKind {
    Loaded,
    Rendered,
    Error,
}

impl WidgetEventKind {
    pub const ALL: [Self; 3] = [Self::Loaded, Self::Rendered, Self::Error];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loaded => "loaded",
            Self::Rendered => "rendered",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WidgetEvent {
    Loaded,
    Rendered,
    Error { message: String },
}

impl WidgetEvent {
    #[must_use]
    pub fn kind(&self) -> WidgetEventKind {
        match self {
            Self::Loaded => WidgetEventKind::Loaded,
            Self::Rendered => WidgetEventKind::Rendered,
            Self::Error { .. } => WidgetEventKind::Error,
        }
    }
}

pub type WidgetEventHandler = Box<dyn FnMut(WidgetEvent)>;

/// A live embedded report.
pub trait ReportHandle {
    fn on(&self, kind: WidgetEventKind, handler: WidgetEventHandler) -> Result<(), EmbedSdkError>;
    fn off(&self, kind: WidgetEventKind) -> Result<(), EmbedSdkError>;
}

/// One embedding service instance bound to the viewer's container.
pub trait EmbeddingService {
    fn embed(&self, config: &EmbedConfig) -> Result<Rc<dyn ReportHandle>, EmbedSdkError>;
    fn reset(&self) -> Result<(), EmbedSdkError>;
    fn has_embed(&self) -> bool;
}

pub trait EmbeddingSdk {
    fn create_service(&self) -> Result<Rc<dyn EmbeddingService>, EmbedSdkError>;
}

/// Backend token endpoint. Dropping a pending fetch should cancel that
/// request only.
#[async_trait(?Send)]
pub trait CredentialTransport {
    async fn fetch_embed_credential(
        &self,
        report: &ReportRef,
    ) -> Result<EmbedTokenResponse, CredentialError>;

    /// Cancels every request still in flight. Best effort; used on unmount.
    fn abort_in_flight(&self) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedSettings {
    pub filter_pane_enabled: bool,
    pub nav_content_pane_enabled: bool,
}

impl Default for EmbedSettings {
    fn default() -> Self {
        Self {
            filter_pane_enabled: false,
            nav_content_pane_enabled: true,
        }
    }
}

/// Configuration handed to [`EmbeddingService::embed`]; serialises to the
/// shape the browser SDK expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedConfig {
    #[serde(rename = "type")]
    pub embed_type: String,
    pub id: String,
    pub embed_url: String,
    pub access_token: String,
    /// 1 = embed token, the only kind the backend issues.
    pub token_type: u8,
    pub settings: EmbedSettings,
}

impl EmbedConfig {
    #[must_use]
    pub fn for_report(report: &ReportRef, credential: &EmbedCredential) -> Self {
        Self {
            embed_type: "report".to_string(),
            id: report.report_id.clone(),
            embed_url: credential.locator.clone(),
            access_token: credential.token.clone(),
            token_type: 1,
            settings: EmbedSettings::default(),
        }
    }
}
