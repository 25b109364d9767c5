//! The embed session state machine.
//!
//! One controller per mounted viewer. Every command that starts work issues a
//! new [`SessionToken`]; every continuation compares its captured token with
//! the current one after each suspension point and drops itself when it has
//! been superseded. The controller never spawns: commands hand back a
//! [`SessionTask`] for the host executor to drive.

use std::cell::RefCell;
use std::rc::Rc;

use futures::channel::mpsc;
use futures::future::LocalBoxFuture;
use futures::{FutureExt, StreamExt, pin_mut, select_biased};
use serde::{Deserialize, Serialize};

use crate::config::{EmbedPolicy, PolicyError};
use crate::credential::{CredentialError, CredentialProvider};
use crate::hygiene::{AttachedWidget, HygieneManager};
use crate::locator::LocatorValidator;
use crate::log::{EmbedLog, LogCategory, LogEntry, LogLevel};
use crate::platform::{
    CredentialTransport, EmbedClock, EmbedConfig, EmbedSdkError, EmbedSurface, EmbeddingSdk,
    EmbeddingService, WidgetEvent, WidgetEventKind,
};
use crate::session::{
    EmbedFailure, EmbedPhase, EnvironmentState, FailureKind, LOADED_PROGRESS, ReportRef,
    SessionToken, is_embed_locator_error,
};

/// Work for one logical session. The host drives it on its local executor;
/// dropping it early is equivalent to the session being superseded.
pub type SessionTask = LocalBoxFuture<'static, ()>;

/// Platform collaborators a controller is built from.
#[derive(Clone)]
pub struct EmbedDeps {
    pub surface: Rc<dyn EmbedSurface>,
    pub sdk: Rc<dyn EmbeddingSdk>,
    pub transport: Rc<dyn CredentialTransport>,
    pub clock: Rc<dyn EmbedClock>,
}

/// Lifecycle hooks for the host UI. Called with no controller state
/// borrowed, so implementations may query the controller.
pub trait EmbedObserver {
    fn phase_changed(&self, _phase: EmbedPhase, _progress: u8) {}
    fn log_appended(&self, _entry: &LogEntry) {}
    fn ready(&self, _report: &ReportRef) {}
    fn failed(&self, _failure: &EmbedFailure) {}
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("retry requires the error phase; controller is {phase:?}")]
    NotInErrorState { phase: EmbedPhase },
    #[error("all {max_attempts} attempts used ({attempts}); reset the viewer to start over")]
    AttemptsExhausted { attempts: u32, max_attempts: u32 },
    #[error("{kind:?} cannot be fixed by retrying; reset with a corrected report reference")]
    NotRetryable { kind: FailureKind },
    #[error("controller has been disposed")]
    Disposed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerSnapshot {
    pub report: ReportRef,
    pub phase: EmbedPhase,
    pub progress: u8,
    pub error: Option<String>,
    pub failure: Option<EmbedFailure>,
    pub attempt: u32,
    pub max_attempts: u32,
    pub session: Option<SessionToken>,
    pub environment: EnvironmentState,
    pub can_retry: bool,
    pub disposed: bool,
}

/// Why a single attempt stopped short of `ready`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
enum AttemptFailure {
    #[error("superseded by a newer session")]
    Superseded,
    #[error("report reference is missing {fields}")]
    MissingIdentifiers { fields: String },
    #[error("credential unavailable: {0}")]
    Credential(CredentialError),
    #[error("embed locator rejected: {errors}")]
    Locator { errors: String },
    #[error("embed container is not available")]
    ContainerUnavailable,
    #[error("embedding service unavailable: {0}")]
    Service(EmbedSdkError),
    #[error("widget reported an error: {message}")]
    Widget { message: String },
    #[error("report did not render within {timeout_ms}ms")]
    RenderTimeout { timeout_ms: u64 },
}

impl AttemptFailure {
    fn kind(&self) -> Option<FailureKind> {
        let kind = match self {
            Self::Superseded => return None,
            Self::MissingIdentifiers { .. } => FailureKind::MissingIdentifiers,
            Self::Credential(_) => FailureKind::CredentialUnavailable,
            Self::Locator { .. } => FailureKind::LocatorInvalid,
            Self::ContainerUnavailable => FailureKind::ContainerUnavailable,
            Self::Service(_) => FailureKind::ServiceUnavailable,
            Self::Widget { .. } => FailureKind::WidgetError,
            Self::RenderTimeout { .. } => FailureKind::RenderTimeout,
        };
        Some(kind)
    }
}

fn category_for(kind: FailureKind) -> LogCategory {
    match kind {
        FailureKind::MissingIdentifiers => LogCategory::Session,
        FailureKind::CredentialUnavailable => LogCategory::Credential,
        FailureKind::LocatorInvalid => LogCategory::Locator,
        FailureKind::ContainerUnavailable | FailureKind::ServiceUnavailable => {
            LogCategory::Hygiene
        }
        FailureKind::WidgetError | FailureKind::RenderTimeout => LogCategory::Widget,
    }
}

struct SessionState {
    report: ReportRef,
    phase: EmbedPhase,
    progress: u8,
    failure: Option<EmbedFailure>,
    attempt: u32,
    current: Option<SessionToken>,
    last_issued: u64,
    terminal_notified: bool,
    environment: EnvironmentState,
    events: Option<mpsc::UnboundedSender<WidgetEvent>>,
    disposed: bool,
    log: EmbedLog,
}

impl SessionState {
    /// Supersedes whatever session was current.
    fn issue_token(&mut self) -> SessionToken {
        self.last_issued = self.last_issued.saturating_add(1);
        let token = SessionToken::new(self.last_issued);
        self.current = Some(token);
        self.close_events();
        token
    }

    /// Closing the channel wakes a superseded render wait immediately.
    fn close_events(&mut self) {
        if let Some(events) = self.events.take() {
            events.close_channel();
        }
    }
}

struct ControllerInner {
    surface: Rc<dyn EmbedSurface>,
    clock: Rc<dyn EmbedClock>,
    policy: EmbedPolicy,
    hygiene: HygieneManager,
    credentials: CredentialProvider,
    validator: LocatorValidator,
    state: RefCell<SessionState>,
    observers: RefCell<Vec<Rc<dyn EmbedObserver>>>,
}

#[derive(Clone)]
pub struct EmbedController {
    inner: Rc<ControllerInner>,
}

impl EmbedController {
    pub fn new(report: ReportRef, deps: EmbedDeps, policy: EmbedPolicy) -> Result<Self, PolicyError> {
        policy.validate()?;
        let hygiene = HygieneManager::new(
            deps.surface.clone(),
            deps.sdk.clone(),
            deps.clock.clone(),
            &policy,
        );
        let credentials =
            CredentialProvider::new(deps.transport.clone(), deps.clock.clone(), &policy);
        let state = SessionState {
            report,
            phase: EmbedPhase::Idle,
            progress: EmbedPhase::Idle.progress(),
            failure: None,
            attempt: 0,
            current: None,
            last_issued: 0,
            terminal_notified: false,
            environment: EnvironmentState::default(),
            events: None,
            disposed: false,
            log: EmbedLog::with_capacity(policy.log_capacity),
        };
        Ok(Self {
            inner: Rc::new(ControllerInner {
                surface: deps.surface,
                clock: deps.clock,
                validator: LocatorValidator::new(policy.locator.clone()),
                policy,
                hygiene,
                credentials,
                state: RefCell::new(state),
                observers: RefCell::new(Vec::new()),
            }),
        })
    }

    pub fn add_observer(&self, observer: Rc<dyn EmbedObserver>) {
        self.inner.observers.borrow_mut().push(observer);
    }

    /// Starts a new logical session for the current report, superseding any
    /// session in flight and resetting the attempt counter.
    #[must_use]
    pub fn start(&self) -> SessionTask {
        self.inner.begin(None, true)
    }

    /// Starts another attempt after a surfaced failure. Attempts keep
    /// counting from where the failed session stopped.
    pub fn retry(&self) -> Result<SessionTask, CommandError> {
        {
            let state = self.inner.state.borrow();
            if state.disposed {
                return Err(CommandError::Disposed);
            }
            if state.phase != EmbedPhase::Error {
                return Err(CommandError::NotInErrorState { phase: state.phase });
            }
            if state.attempt >= self.inner.policy.max_attempts {
                return Err(CommandError::AttemptsExhausted {
                    attempts: state.attempt,
                    max_attempts: self.inner.policy.max_attempts,
                });
            }
            if let Some(failure) = state.failure.as_ref().filter(|f| f.kind.is_fatal()) {
                return Err(CommandError::NotRetryable { kind: failure.kind });
            }
        }
        Ok(self.inner.begin(None, false))
    }

    /// Switches to `report` (or restarts the same one): re-enters `idle`,
    /// then starts a fresh logical session.
    #[must_use]
    pub fn reset(&self, report: ReportRef) -> SessionTask {
        self.inner.begin(Some(report), true)
    }

    /// Unmount. Invalidates the session, aborts outstanding requests, and
    /// tears the widget down without awaiting anything. Safe to call twice.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    #[must_use]
    pub fn snapshot(&self) -> ControllerSnapshot {
        let state = self.inner.state.borrow();
        ControllerSnapshot {
            report: state.report.clone(),
            phase: state.phase,
            progress: state.progress,
            error: state.failure.as_ref().map(|failure| failure.message.clone()),
            failure: state.failure.clone(),
            attempt: state.attempt,
            max_attempts: self.inner.policy.max_attempts,
            session: state.current,
            environment: state.environment,
            can_retry: state.phase == EmbedPhase::Error
                && state.failure.as_ref().is_some_and(|failure| failure.can_retry),
            disposed: state.disposed,
        }
    }

    #[must_use]
    pub fn phase(&self) -> EmbedPhase {
        self.inner.state.borrow().phase
    }

    #[must_use]
    pub fn progress(&self) -> u8 {
        self.inner.state.borrow().progress
    }

    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.inner
            .state
            .borrow()
            .failure
            .as_ref()
            .map(|failure| failure.message.clone())
    }

    #[must_use]
    pub fn failure(&self) -> Option<EmbedFailure> {
        self.inner.state.borrow().failure.clone()
    }

    #[must_use]
    pub fn logs(&self) -> Vec<LogEntry> {
        self.inner.state.borrow().log.entries()
    }

    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.inner.state.borrow().attempt
    }

    #[must_use]
    pub fn can_retry(&self) -> bool {
        self.snapshot().can_retry
    }

    #[must_use]
    pub fn report(&self) -> ReportRef {
        self.inner.state.borrow().report.clone()
    }

    #[must_use]
    pub fn environment(&self) -> EnvironmentState {
        self.inner.state.borrow().environment
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.state.borrow().disposed
    }

    #[must_use]
    pub fn policy(&self) -> &EmbedPolicy {
        &self.inner.policy
    }
}

impl ControllerInner {
    fn begin(self: &Rc<Self>, next_report: Option<ReportRef>, reset_attempts: bool) -> SessionTask {
        let Some(token) = self.open_session(next_report, reset_attempts) else {
            self.log(
                None,
                LogLevel::Warn,
                LogCategory::Session,
                "ignoring command on a disposed controller",
            );
            return futures::future::ready(()).boxed_local();
        };
        let inner = Rc::clone(self);
        async move { inner.run(token).await }.boxed_local()
    }

    fn open_session(
        &self,
        next_report: Option<ReportRef>,
        reset_attempts: bool,
    ) -> Option<SessionToken> {
        let (token, previous_phase, report, entered_idle) = {
            let mut state = self.state.borrow_mut();
            if state.disposed {
                return None;
            }
            let previous_phase = state.phase;
            let token = state.issue_token();
            state.terminal_notified = false;
            state.failure = None;
            state.environment = EnvironmentState::default();
            if reset_attempts {
                state.attempt = 0;
            }
            let entered_idle = next_report.is_some();
            if let Some(report) = next_report {
                state.report = report;
                state.phase = EmbedPhase::Idle;
                state.progress = EmbedPhase::Idle.progress();
            }
            (token, previous_phase, state.report.clone(), entered_idle)
        };

        if previous_phase == EmbedPhase::Authenticating {
            self.credentials.abort_in_flight();
        }
        if entered_idle {
            self.notify(|observer| observer.phase_changed(EmbedPhase::Idle, 0));
        }
        self.log(
            Some(token),
            LogLevel::Info,
            LogCategory::Session,
            format!("session {token} opened for {report}"),
        );
        Some(token)
    }

    async fn run(&self, mut token: SessionToken) {
        let mut deep = self.hygiene.service_ready();
        loop {
            let Some(attempt) = self.begin_attempt(token) else {
                return;
            };
            match self.attempt(token, deep).await {
                Ok(()) => {
                    self.finish_ready(token, attempt);
                    return;
                }
                Err(AttemptFailure::Superseded) => return,
                Err(failure) if self.auto_retry_allowed(&failure, attempt) => {
                    self.log(
                        Some(token),
                        LogLevel::Warn,
                        LogCategory::Session,
                        format!("attempt {attempt} failed ({failure}); retrying after a deep cleanup"),
                    );
                    self.credentials.invalidate();
                    deep = true;
                    match self.rotate_token(token) {
                        Some(next) => token = next,
                        None => return,
                    }
                }
                Err(failure) => {
                    self.finish_failed(token, &failure, attempt);
                    return;
                }
            }
        }
    }

    fn begin_attempt(&self, token: SessionToken) -> Option<u32> {
        let (attempt, report) = {
            let mut state = self.state.borrow_mut();
            if state.current != Some(token) {
                return None;
            }
            state.attempt = state.attempt.saturating_add(1);
            (state.attempt, state.report.clone())
        };
        self.log(
            Some(token),
            LogLevel::Info,
            LogCategory::Session,
            format!(
                "attempt {attempt}/{} for {report}",
                self.policy.max_attempts
            ),
        );
        Some(attempt)
    }

    /// Each automatic retry runs under its own token.
    fn rotate_token(&self, token: SessionToken) -> Option<SessionToken> {
        let mut state = self.state.borrow_mut();
        if state.current != Some(token) {
            return None;
        }
        Some(state.issue_token())
    }

    fn auto_retry_allowed(&self, failure: &AttemptFailure, attempt: u32) -> bool {
        if attempt >= self.policy.max_attempts {
            return false;
        }
        match failure {
            AttemptFailure::Credential(_) | AttemptFailure::RenderTimeout { .. } => true,
            AttemptFailure::Widget { message } => {
                is_embed_locator_error(message, &self.policy.auto_retry_error_markers)
            }
            _ => false,
        }
    }

    async fn attempt(&self, token: SessionToken, deep: bool) -> Result<(), AttemptFailure> {
        self.enter_phase(token, EmbedPhase::Cleaning)?;
        self.clean(token, deep).await?;

        let report = self.state.borrow().report.clone();
        let missing = report.missing_identifiers();
        if !missing.is_empty() {
            return Err(AttemptFailure::MissingIdentifiers {
                fields: missing.join(", "),
            });
        }

        self.enter_phase(token, EmbedPhase::Authenticating)?;
        let credential = match self.credentials.lookup(&report) {
            Some(credential) => {
                self.log(
                    Some(token),
                    LogLevel::Debug,
                    LogCategory::Credential,
                    "embed credential served from cache",
                );
                credential
            }
            None => {
                let fetched = self.credentials.fetch(&report).await;
                self.ensure_current(token)?;
                let credential = fetched.map_err(AttemptFailure::Credential)?;
                self.credentials.store(&report, &credential);
                self.log(
                    Some(token),
                    LogLevel::Info,
                    LogCategory::Credential,
                    "embed credential fetched",
                );
                credential
            }
        };
        self.update_environment(|environment| environment.credential_valid = true);

        self.enter_phase(token, EmbedPhase::Validating)?;
        let verdict = self
            .validator
            .validate(&credential.locator, &report.report_id);
        for warning in &verdict.warnings {
            self.log(Some(token), LogLevel::Warn, LogCategory::Locator, warning.clone());
        }
        if !verdict.valid {
            self.credentials.invalidate();
            return Err(AttemptFailure::Locator {
                errors: verdict.joined_errors(),
            });
        }
        self.update_environment(|environment| environment.locator_valid = true);

        self.enter_phase(token, EmbedPhase::Configuring)?;
        if !self.surface.container_present() {
            return Err(AttemptFailure::ContainerUnavailable);
        }
        let service = self
            .hygiene
            .ensure_service()
            .map_err(AttemptFailure::Service)?;
        self.update_environment(|environment| environment.widget_service_ready = true);
        let config = EmbedConfig::for_report(&report, &credential);

        self.enter_phase(token, EmbedPhase::Rendering)?;
        let events = self.attach(token, service.as_ref(), &config)?;
        self.await_render(token, events).await
    }

    /// Hygiene plus at most one forced clear. A container that still is not
    /// clean is logged and does not block the attempt.
    async fn clean(&self, token: SessionToken, deep: bool) -> Result<(), AttemptFailure> {
        let report = self.hygiene.hygiene(deep).await;
        self.ensure_current(token)?;

        let mut clean = report.is_clean();
        if report.detach_failures > 0 {
            self.log(
                Some(token),
                LogLevel::Debug,
                LogCategory::Hygiene,
                format!("{} handler detach calls failed", report.detach_failures),
            );
        }
        if !clean {
            self.log(
                Some(token),
                LogLevel::Warn,
                LogCategory::Hygiene,
                "container not verified clean; forcing one more clear",
            );
            clean = self.hygiene.force_clear(deep).await;
            self.ensure_current(token)?;
            if !clean {
                self.log(
                    Some(token),
                    LogLevel::Warn,
                    LogCategory::Hygiene,
                    "container still has residue; continuing anyway",
                );
            }
        }

        let service_ready = self.hygiene.service_ready();
        self.update_environment(|environment| {
            environment.dom_clean = clean;
            environment.widget_service_ready = service_ready;
        });
        self.log(
            Some(token),
            LogLevel::Info,
            LogCategory::Hygiene,
            format!(
                "{} cleanup done (purged {}, service recreated: {})",
                if deep { "deep" } else { "shallow" },
                report.purged_nodes,
                report.service_recreated
            ),
        );
        Ok(())
    }

    fn attach(
        &self,
        token: SessionToken,
        service: &dyn EmbeddingService,
        config: &EmbedConfig,
    ) -> Result<mpsc::UnboundedReceiver<WidgetEvent>, AttemptFailure> {
        let (sender, receiver) = mpsc::unbounded();
        {
            let mut state = self.state.borrow_mut();
            if state.current != Some(token) {
                return Err(AttemptFailure::Superseded);
            }
            state.close_events();
            state.events = Some(sender.clone());
        }

        let handle = service.embed(config).map_err(AttemptFailure::Service)?;
        self.hygiene.adopt(AttachedWidget::new(
            handle.clone(),
            token,
            WidgetEventKind::ALL.to_vec(),
        ));
        for kind in WidgetEventKind::ALL {
            let sender = sender.clone();
            handle
                .on(
                    kind,
                    Box::new(move |event| {
                        // Fails once the session is over; nothing to do then.
                        let _ = sender.unbounded_send(event);
                    }),
                )
                .map_err(AttemptFailure::Service)?;
        }
        self.log(
            Some(token),
            LogLevel::Info,
            LogCategory::Widget,
            format!("widget attached for report {}", config.id),
        );
        Ok(receiver)
    }

    async fn await_render(
        &self,
        token: SessionToken,
        mut events: mpsc::UnboundedReceiver<WidgetEvent>,
    ) -> Result<(), AttemptFailure> {
        let deadline = self.clock.sleep(self.policy.render_timeout()).fuse();
        pin_mut!(deadline);

        loop {
            select_biased! {
                event = events.next() => {
                    self.ensure_current(token)?;
                    match event {
                        Some(WidgetEvent::Loaded) => self.mark_loaded(token),
                        Some(WidgetEvent::Rendered) => return Ok(()),
                        Some(WidgetEvent::Error { message }) => {
                            return Err(AttemptFailure::Widget { message });
                        }
                        None => return Err(AttemptFailure::Superseded),
                    }
                }
                () = deadline => {
                    self.ensure_current(token)?;
                    return Err(AttemptFailure::RenderTimeout {
                        timeout_ms: self.policy.render_timeout_ms,
                    });
                }
            }
        }
    }

    fn mark_loaded(&self, token: SessionToken) {
        self.state.borrow_mut().progress = LOADED_PROGRESS;
        self.notify(|observer| observer.phase_changed(EmbedPhase::Rendering, LOADED_PROGRESS));
        self.log(
            Some(token),
            LogLevel::Info,
            LogCategory::Widget,
            "report loaded; waiting for render",
        );
    }

    fn enter_phase(&self, token: SessionToken, phase: EmbedPhase) -> Result<(), AttemptFailure> {
        self.ensure_current(token)?;
        let progress = phase.progress();
        {
            let mut state = self.state.borrow_mut();
            state.phase = phase;
            state.progress = progress;
        }
        self.notify(|observer| observer.phase_changed(phase, progress));
        Ok(())
    }

    fn ensure_current(&self, token: SessionToken) -> Result<(), AttemptFailure> {
        let current = self.state.borrow().current;
        if current == Some(token) {
            return Ok(());
        }
        tracing::info!(
            session = %token,
            current = ?current.map(SessionToken::get),
            "dropping continuation of a superseded session"
        );
        Err(AttemptFailure::Superseded)
    }

    fn finish_ready(&self, token: SessionToken, attempt: u32) {
        let (report, first_terminal) = {
            let mut state = self.state.borrow_mut();
            if state.current != Some(token) {
                return;
            }
            state.phase = EmbedPhase::Ready;
            state.progress = EmbedPhase::Ready.progress();
            let first_terminal = !state.terminal_notified;
            state.terminal_notified = true;
            (state.report.clone(), first_terminal)
        };
        self.log(
            Some(token),
            LogLevel::Success,
            LogCategory::Widget,
            format!("report {report} rendered on attempt {attempt}"),
        );
        self.notify(|observer| observer.phase_changed(EmbedPhase::Ready, 100));
        if first_terminal {
            self.notify(|observer| observer.ready(&report));
        }
    }

    fn finish_failed(&self, token: SessionToken, failure: &AttemptFailure, attempt: u32) {
        let Some(kind) = failure.kind() else {
            return;
        };
        let surfaced = EmbedFailure {
            kind,
            message: failure.to_string(),
            attempt,
            can_retry: !kind.is_fatal() && attempt < self.policy.max_attempts,
        };
        let (progress, first_terminal) = {
            let mut state = self.state.borrow_mut();
            if state.current != Some(token) {
                return;
            }
            state.phase = EmbedPhase::Error;
            state.failure = Some(surfaced.clone());
            let first_terminal = !state.terminal_notified;
            state.terminal_notified = true;
            (state.progress, first_terminal)
        };
        self.log(
            Some(token),
            LogLevel::Error,
            category_for(kind),
            format!(
                "attempt {attempt}/{} failed: {}",
                self.policy.max_attempts, surfaced.message
            ),
        );
        self.notify(|observer| observer.phase_changed(EmbedPhase::Error, progress));
        if first_terminal {
            self.notify(|observer| observer.failed(&surfaced));
        }
    }

    fn dispose(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.disposed {
                tracing::debug!("embed controller already disposed");
                return;
            }
            state.disposed = true;
            state.current = None;
            state.close_events();
            state.phase = EmbedPhase::Idle;
            state.progress = EmbedPhase::Idle.progress();
            state.environment = EnvironmentState::default();
        }

        self.credentials.abort_in_flight();
        self.credentials.invalidate();
        let report = self.hygiene.teardown_now();
        self.update_environment(|environment| environment.dom_clean = report.is_clean());
        self.log(
            None,
            LogLevel::Info,
            LogCategory::Session,
            format!(
                "disposed; widget detached: {}, container clean: {}",
                report.detached_widget,
                report.is_clean()
            ),
        );
        self.notify(|observer| observer.phase_changed(EmbedPhase::Idle, 0));
    }

    fn update_environment(&self, update: impl FnOnce(&mut EnvironmentState)) {
        update(&mut self.state.borrow_mut().environment);
    }

    fn log(
        &self,
        session: Option<SessionToken>,
        level: LogLevel,
        category: LogCategory,
        message: impl Into<String>,
    ) {
        let entry = LogEntry {
            at_unix_ms: self.clock.now_unix_ms(),
            level,
            category,
            message: message.into(),
            session,
        };
        self.state.borrow_mut().log.push(entry.clone());
        self.notify(|observer| observer.log_appended(&entry));
    }

    fn notify(&self, event: impl Fn(&dyn EmbedObserver)) {
        let observers = self.observers.borrow().clone();
        for observer in &observers {
            event(observer.as_ref());
        }
    }
}
