//! Teardown and verification of the embed container between sessions.
//!
//! The widget subsystem is treated as untrusted: detaching handlers may fail,
//! service instances may keep stale registrations, and widget nodes may end
//! up outside the container. Every step here is best effort and the final
//! verification re-clears once instead of blocking the next attach.

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::config::{ArtifactSignature, EmbedPolicy};
use crate::platform::{
    EmbedClock, EmbedSdkError, EmbedSurface, EmbeddingSdk, EmbeddingService, ReportHandle,
    WidgetEventKind,
};
use crate::session::SessionToken;

/// The live widget, owned by the session that attached it.
pub struct AttachedWidget {
    handle: Rc<dyn ReportHandle>,
    session: SessionToken,
    subscribed: Vec<WidgetEventKind>,
}

impl AttachedWidget {
    #[must_use]
    pub fn new(
        handle: Rc<dyn ReportHandle>,
        session: SessionToken,
        subscribed: Vec<WidgetEventKind>,
    ) -> Self {
        Self {
            handle,
            session,
            subscribed,
        }
    }

    #[must_use]
    pub fn session(&self) -> SessionToken {
        self.session
    }

    /// Removes every handler this session subscribed. Returns the number of
    /// detach calls that failed; those are expected for already-gone widgets.
    fn detach(&self) -> usize {
        let mut failures = 0;
        for kind in WidgetEventKind::ALL {
            if let Err(error) = self.handle.off(kind) {
                if self.subscribed.contains(&kind) {
                    tracing::debug!(
                        session = %self.session,
                        event = kind.as_str(),
                        %error,
                        "widget handler detach failed"
                    );
                }
                failures += 1;
            }
        }
        failures
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HygieneReport {
    pub deep: bool,
    pub detached_widget: bool,
    pub detach_failures: usize,
    pub service_recreated: bool,
    pub service_error: Option<String>,
    pub purged_nodes: usize,
    pub removed_attributes: usize,
    pub forced_reclean: bool,
    pub verified_clean: bool,
}

impl HygieneReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.verified_clean
    }
}

pub struct HygieneManager {
    surface: Rc<dyn EmbedSurface>,
    sdk: Rc<dyn EmbeddingSdk>,
    clock: Rc<dyn EmbedClock>,
    signature: ArtifactSignature,
    policy: EmbedPolicy,
    service: RefCell<Option<Rc<dyn EmbeddingService>>>,
    widget: RefCell<Option<AttachedWidget>>,
}

impl HygieneManager {
    #[must_use]
    pub fn new(
        surface: Rc<dyn EmbedSurface>,
        sdk: Rc<dyn EmbeddingSdk>,
        clock: Rc<dyn EmbedClock>,
        policy: &EmbedPolicy,
    ) -> Self {
        Self {
            surface,
            sdk,
            clock,
            signature: policy.artifacts.clone(),
            policy: policy.clone(),
            service: RefCell::new(None),
            widget: RefCell::new(None),
        }
    }

    /// Full cleanup pass. `deep` always replaces the service instance and
    /// waits the longer settle delay.
    pub async fn hygiene(&self, deep: bool) -> HygieneReport {
        let mut report = self.strip(deep, deep);

        self.clock.sleep(self.policy.settle_delay(deep)).await;

        report.verified_clean = self.verify_clean();
        if !report.verified_clean {
            tracing::warn!(
                children = self.surface.child_count(),
                deep,
                "container not clean after hygiene; forcing another clear"
            );
            report.forced_reclean = true;
            if let Some(error) = self.reset_lingering_service() {
                report.service_error = Some(error.to_string());
            }
            report.removed_attributes += self.clear_container();
            report.purged_nodes += self.surface.purge_document_artifacts(&self.signature);
            report.verified_clean = self.verify_clean();
        }
        report
    }

    /// One extra clear followed by the settle delay. Used when a hygiene
    /// pass could not confirm an empty container.
    pub async fn force_clear(&self, deep: bool) -> bool {
        if let Some(error) = self.reset_lingering_service() {
            tracing::debug!(%error, "embedding service reset failed");
        }
        self.clear_container();
        self.surface.purge_document_artifacts(&self.signature);
        self.clock.sleep(self.policy.settle_delay(deep)).await;
        self.verify_clean()
    }

    /// Synchronous teardown for unmount: nothing is awaited because the host
    /// may already be gone.
    pub fn teardown_now(&self) -> HygieneReport {
        let mut report = self.strip(true, false);
        report.verified_clean = self.verify_clean();
        if !report.verified_clean {
            report.forced_reclean = true;
            report.removed_attributes += self.clear_container();
            report.verified_clean = self.verify_clean();
        }
        report
    }

    /// Empty container, no widget attributes, and no widget still
    /// registered with the held service instance.
    #[must_use]
    pub fn verify_clean(&self) -> bool {
        let unregistered = self
            .service
            .borrow()
            .as_ref()
            .is_none_or(|service| !service.has_embed());
        unregistered
            && self.surface.child_count() == 0
            && self.surface.widget_attributes(&self.signature).is_empty()
    }

    /// Returns the current service instance, creating one if none exists.
    pub fn ensure_service(&self) -> Result<Rc<dyn EmbeddingService>, EmbedSdkError> {
        if let Some(service) = self.service.borrow().as_ref() {
            return Ok(service.clone());
        }
        let service = self.sdk.create_service()?;
        *self.service.borrow_mut() = Some(service.clone());
        Ok(service)
    }

    #[must_use]
    pub fn service_ready(&self) -> bool {
        self.service.borrow().is_some()
    }

    /// Takes ownership of a freshly attached widget. Any widget still held is
    /// detached first so the container never has two.
    pub fn adopt(&self, widget: AttachedWidget) {
        let previous = self.widget.borrow_mut().replace(widget);
        if let Some(previous) = previous {
            tracing::warn!(
                session = %previous.session(),
                "replacing a widget that was never torn down"
            );
            previous.detach();
        }
    }

    #[must_use]
    pub fn attached_session(&self) -> Option<SessionToken> {
        self.widget.borrow().as_ref().map(AttachedWidget::session)
    }

    fn strip(&self, deep: bool, recreate: bool) -> HygieneReport {
        let mut report = HygieneReport {
            deep,
            ..HygieneReport::default()
        };

        let widget = self.widget.borrow_mut().take();
        if let Some(widget) = widget {
            report.detached_widget = true;
            report.detach_failures = widget.detach();
        }

        self.reset_service(deep, recreate, &mut report);
        report.purged_nodes = self.surface.purge_document_artifacts(&self.signature);
        report.removed_attributes = self.clear_container();
        report
    }

    /// `deep` drops the instance; `recreate` replaces it with a new one.
    fn reset_service(&self, deep: bool, recreate: bool, report: &mut HygieneReport) {
        let current = self.service.borrow().clone();
        if let Some(service) = current {
            if let Err(error) = service.reset() {
                tracing::debug!(%error, "embedding service reset failed");
                report.service_error = Some(error.to_string());
            }
        }
        if !deep {
            return;
        }

        self.service.borrow_mut().take();
        if !recreate {
            return;
        }
        match self.sdk.create_service() {
            Ok(service) => {
                *self.service.borrow_mut() = Some(service);
                report.service_recreated = true;
            }
            Err(error) => {
                tracing::warn!(%error, "could not create a fresh embedding service");
                report.service_error = Some(error.to_string());
            }
        }
    }

    /// Resets the held service again when it still reports a widget.
    fn reset_lingering_service(&self) -> Option<EmbedSdkError> {
        let service = self.service.borrow().clone()?;
        if !service.has_embed() {
            return None;
        }
        tracing::debug!("embedding service still holds a widget; resetting again");
        service.reset().err()
    }

    fn clear_container(&self) -> usize {
        if !self.surface.container_present() {
            return 0;
        }
        self.surface.clear_children();
        let attributes = self.surface.widget_attributes(&self.signature);
        for name in &attributes {
            self.surface.remove_attribute(name);
        }
        attributes.len()
    }
}
