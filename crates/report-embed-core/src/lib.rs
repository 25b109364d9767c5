//! Embed session controller for third-party report widgets.
//!
//! The crate is platform-neutral: the DOM container, the embedding SDK, the
//! backend token endpoint, and time are all reached through the traits in
//! [`platform`] so the same controller drives the browser host and the unit
//! tests.

pub mod config;
pub mod controller;
pub mod credential;
pub mod hygiene;
pub mod locator;
pub mod log;
pub mod platform;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ArtifactSignature, EmbedPolicy, LocatorRules, PolicyError};
pub use controller::{
    CommandError, ControllerSnapshot, EmbedController, EmbedDeps, EmbedObserver, SessionTask,
};
pub use credential::{
    CachedCredential, CredentialError, CredentialProvider, EmbedCredential, EmbedTokenResponse,
    embed_token_url,
};
pub use hygiene::{AttachedWidget, HygieneManager, HygieneReport};
pub use locator::{LocatorReport, LocatorValidator};
pub use log::{EmbedLog, LogCategory, LogEntry, LogLevel};
pub use platform::{
    CredentialTransport, EmbedClock, EmbedConfig, EmbedSdkError, EmbedSettings, EmbedSurface,
    EmbeddingSdk, EmbeddingService, ReportHandle, WidgetEvent, WidgetEventHandler,
    WidgetEventKind,
};
pub use session::{
    EmbedFailure, EmbedPhase, EnvironmentState, FailureKind, ReportRef, SessionToken,
};
