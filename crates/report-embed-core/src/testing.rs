//! In-memory doubles for the platform seams.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::oneshot;
use futures::executor::LocalPool;
use futures::future::LocalBoxFuture;

use crate::config::{ArtifactSignature, EmbedPolicy, LocatorRules};
use crate::controller::EmbedObserver;
use crate::credential::{CredentialError, EmbedTokenResponse};
use crate::platform::{
    CredentialTransport, EmbedClock, EmbedConfig, EmbedSdkError, EmbedSurface, EmbeddingSdk,
    EmbeddingService, ReportHandle, WidgetEvent, WidgetEventHandler, WidgetEventKind,
};
use crate::session::{EmbedFailure, EmbedPhase, ReportRef};

pub(crate) fn block_on<F: Future>(future: F) -> F::Output {
    futures::executor::block_on(future)
}

/// Policy used by controller tests: example.com locators, no settle delays.
pub(crate) fn test_policy() -> EmbedPolicy {
    EmbedPolicy {
        shallow_settle_ms: 0,
        deep_settle_ms: 0,
        locator: LocatorRules {
            required_host_suffix: "example.com".to_string(),
            canonical_host: "app.example.com".to_string(),
            ..LocatorRules::default()
        },
        ..EmbedPolicy::default()
    }
}

/// Runs the pool, jumping virtual time to the next pending sleep whenever
/// every task is blocked, until nothing is left to wake.
pub(crate) fn drive(pool: &mut LocalPool, clock: &ManualClock) {
    for _ in 0..10_000 {
        pool.run_until_stalled();
        match clock.next_deadline() {
            Some(deadline) => clock.advance_to(deadline),
            None => return,
        }
    }
}

struct SleepState {
    deadline: u64,
    done: Cell<bool>,
    waker: RefCell<Option<Waker>>,
}

struct SleepFuture {
    state: Rc<SleepState>,
}

impl Future for SleepFuture {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.state.done.get() {
            return Poll::Ready(());
        }
        *self.state.waker.borrow_mut() = Some(cx.waker().clone());
        Poll::Pending
    }
}

pub(crate) struct ManualClock {
    now: Cell<u64>,
    sleepers: RefCell<Vec<Weak<SleepState>>>,
}

impl ManualClock {
    pub(crate) fn new(start_unix_ms: u64) -> Self {
        Self {
            now: Cell::new(start_unix_ms),
            sleepers: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn advance(&self, ms: u64) {
        self.advance_to(self.now.get().saturating_add(ms));
    }

    pub(crate) fn advance_to(&self, unix_ms: u64) {
        if unix_ms > self.now.get() {
            self.now.set(unix_ms);
        }
        let now = self.now.get();
        let mut due = Vec::new();
        self.sleepers.borrow_mut().retain(|weak| match weak.upgrade() {
            Some(state) if state.deadline <= now => {
                due.push(state);
                false
            }
            Some(_) => true,
            None => false,
        });
        for state in due {
            state.done.set(true);
            if let Some(waker) = state.waker.borrow_mut().take() {
                waker.wake();
            }
        }
    }

    pub(crate) fn next_deadline(&self) -> Option<u64> {
        self.sleepers
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .map(|state| state.deadline)
            .min()
    }
}

impl EmbedClock for ManualClock {
    fn now_unix_ms(&self) -> u64 {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let state = Rc::new(SleepState {
            deadline: self.now.get().saturating_add(millis),
            done: Cell::new(millis == 0),
            waker: RefCell::new(None),
        });
        if millis > 0 {
            self.sleepers.borrow_mut().push(Rc::downgrade(&state));
        }
        Box::pin(SleepFuture { state })
    }
}

#[derive(Default)]
pub(crate) struct FakeSurface {
    missing: Cell<bool>,
    children: RefCell<Vec<String>>,
    attributes: RefCell<BTreeMap<String, String>>,
    stray_nodes: RefCell<Vec<String>>,
    sticky_clears: Cell<u32>,
    clears: Cell<u32>,
}

impl FakeSurface {
    pub(crate) fn set_missing(&self, missing: bool) {
        self.missing.set(missing);
    }

    pub(crate) fn add_child(&self, node: &str) {
        self.children.borrow_mut().push(node.to_string());
    }

    pub(crate) fn set_attribute(&self, name: &str, value: &str) {
        self.attributes
            .borrow_mut()
            .insert(name.to_string(), value.to_string());
    }

    pub(crate) fn add_stray_node(&self, node: &str) {
        self.stray_nodes.borrow_mut().push(node.to_string());
    }

    /// The next `count` clears leave the children in place.
    pub(crate) fn make_sticky(&self, count: u32) {
        self.sticky_clears.set(count);
    }

    pub(crate) fn attribute_names(&self) -> Vec<String> {
        self.attributes.borrow().keys().cloned().collect()
    }

    pub(crate) fn stray_count(&self) -> usize {
        self.stray_nodes.borrow().len()
    }

    pub(crate) fn clears(&self) -> u32 {
        self.clears.get()
    }
}

impl EmbedSurface for FakeSurface {
    fn container_present(&self) -> bool {
        !self.missing.get()
    }

    fn child_count(&self) -> usize {
        self.children.borrow().len()
    }

    fn widget_attributes(&self, signature: &ArtifactSignature) -> Vec<String> {
        self.attributes
            .borrow()
            .keys()
            .filter(|name| signature.matches_attribute(name))
            .cloned()
            .collect()
    }

    fn clear_children(&self) {
        self.clears.set(self.clears.get() + 1);
        let sticky = self.sticky_clears.get();
        if sticky > 0 {
            self.sticky_clears.set(sticky - 1);
            return;
        }
        self.children.borrow_mut().clear();
    }

    fn remove_attribute(&self, name: &str) {
        self.attributes.borrow_mut().remove(name);
    }

    fn purge_document_artifacts(&self, _signature: &ArtifactSignature) -> usize {
        let mut stray = self.stray_nodes.borrow_mut();
        let removed = stray.len();
        stray.clear();
        removed
    }
}

#[derive(Default)]
pub(crate) struct FakeHandle {
    handlers: RefCell<HashMap<WidgetEventKind, WidgetEventHandler>>,
    scripted: RefCell<VecDeque<WidgetEvent>>,
    offs: RefCell<Vec<WidgetEventKind>>,
    fail_off: Cell<bool>,
}

impl FakeHandle {
    /// Delivers `event` to its handler. Returns false when nobody listens.
    pub(crate) fn emit(&self, event: WidgetEvent) -> bool {
        let mut handlers = self.handlers.borrow_mut();
        match handlers.get_mut(&event.kind()) {
            Some(handler) => {
                handler(event);
                true
            }
            None => false,
        }
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.handlers.borrow().len()
    }

    pub(crate) fn offs(&self) -> Vec<WidgetEventKind> {
        self.offs.borrow().clone()
    }

    pub(crate) fn fail_detach(&self) {
        self.fail_off.set(true);
    }

    fn flush_scripted(&self) {
        loop {
            let next = {
                let mut scripted = self.scripted.borrow_mut();
                let kind = scripted.front().map(WidgetEvent::kind);
                match kind {
                    Some(kind) if self.handlers.borrow().contains_key(&kind) => {
                        scripted.pop_front()
                    }
                    _ => None,
                }
            };
            match next {
                Some(event) => {
                    self.emit(event);
                }
                None => return,
            }
        }
    }
}

impl ReportHandle for FakeHandle {
    fn on(&self, kind: WidgetEventKind, handler: WidgetEventHandler) -> Result<(), EmbedSdkError> {
        self.handlers.borrow_mut().insert(kind, handler);
        self.flush_scripted();
        Ok(())
    }

    fn off(&self, kind: WidgetEventKind) -> Result<(), EmbedSdkError> {
        self.offs.borrow_mut().push(kind);
        self.handlers.borrow_mut().remove(&kind);
        if self.fail_off.get() {
            return Err(EmbedSdkError::Handler("handle already gone".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
struct SdkShared {
    services_created: Cell<u32>,
    resets: Cell<u32>,
    embeds: RefCell<Vec<EmbedConfig>>,
    handles: RefCell<Vec<Rc<FakeHandle>>>,
    scripts: RefCell<VecDeque<Vec<WidgetEvent>>>,
    unavailable: Cell<bool>,
    sticky_resets: Cell<u32>,
}

/// SDK double that writes the same DOM residue a real widget would: a child
/// node and attributes on the container plus a stray node elsewhere.
pub(crate) struct FakeSdk {
    surface: Rc<FakeSurface>,
    shared: Rc<SdkShared>,
}

impl FakeSdk {
    pub(crate) fn new(surface: Rc<FakeSurface>) -> Self {
        Self {
            surface,
            shared: Rc::new(SdkShared::default()),
        }
    }

    /// Events the next embedded widget emits as soon as it is subscribed.
    /// Without a script the widget loads and renders.
    pub(crate) fn script(&self, events: Vec<WidgetEvent>) {
        self.shared.scripts.borrow_mut().push_back(events);
    }

    pub(crate) fn set_unavailable(&self, unavailable: bool) {
        self.shared.unavailable.set(unavailable);
    }

    /// The next `count` service resets succeed but leave the widget
    /// registered with the service.
    pub(crate) fn keep_registration(&self, count: u32) {
        self.shared.sticky_resets.set(count);
    }

    pub(crate) fn embed_count(&self) -> usize {
        self.shared.embeds.borrow().len()
    }

    pub(crate) fn embeds(&self) -> Vec<EmbedConfig> {
        self.shared.embeds.borrow().clone()
    }

    pub(crate) fn services_created(&self) -> u32 {
        self.shared.services_created.get()
    }

    pub(crate) fn resets(&self) -> u32 {
        self.shared.resets.get()
    }

    pub(crate) fn handles(&self) -> Vec<Rc<FakeHandle>> {
        self.shared.handles.borrow().clone()
    }

    pub(crate) fn last_handle(&self) -> Option<Rc<FakeHandle>> {
        self.shared.handles.borrow().last().cloned()
    }

    /// Widgets that still have at least one subscribed handler.
    pub(crate) fn live_handles(&self) -> usize {
        self.shared
            .handles
            .borrow()
            .iter()
            .filter(|handle| handle.listener_count() > 0)
            .count()
    }
}

impl EmbeddingSdk for FakeSdk {
    fn create_service(&self) -> Result<Rc<dyn EmbeddingService>, EmbedSdkError> {
        if self.shared.unavailable.get() {
            return Err(EmbedSdkError::Unavailable("sdk script not loaded".to_string()));
        }
        self.shared
            .services_created
            .set(self.shared.services_created.get() + 1);
        Ok(Rc::new(FakeService {
            surface: self.surface.clone(),
            shared: self.shared.clone(),
            embedded: Cell::new(false),
        }))
    }
}

struct FakeService {
    surface: Rc<FakeSurface>,
    shared: Rc<SdkShared>,
    embedded: Cell<bool>,
}

impl EmbeddingService for FakeService {
    fn embed(&self, config: &EmbedConfig) -> Result<Rc<dyn ReportHandle>, EmbedSdkError> {
        self.shared.embeds.borrow_mut().push(config.clone());
        self.surface.add_child("iframe");
        self.surface.set_attribute("powerbi-embed-url", &config.embed_url);
        self.surface.add_stray_node("iframe.powerbi-frame");
        self.embedded.set(true);

        let script = self
            .shared
            .scripts
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| vec![WidgetEvent::Loaded, WidgetEvent::Rendered]);
        let handle = Rc::new(FakeHandle::default());
        handle.scripted.borrow_mut().extend(script);
        self.shared.handles.borrow_mut().push(handle.clone());
        Ok(handle)
    }

    fn reset(&self) -> Result<(), EmbedSdkError> {
        self.shared.resets.set(self.shared.resets.get() + 1);
        let sticky = self.shared.sticky_resets.get();
        if sticky > 0 {
            self.shared.sticky_resets.set(sticky - 1);
            return Ok(());
        }
        self.embedded.set(false);
        Ok(())
    }

    fn has_embed(&self) -> bool {
        self.embedded.get()
    }
}

pub(crate) enum FakeReply {
    Ok(EmbedTokenResponse),
    Err(CredentialError),
    Hang,
}

#[derive(Default)]
pub(crate) struct FakeTransport {
    replies: RefCell<VecDeque<FakeReply>>,
    gates: RefCell<VecDeque<oneshot::Receiver<()>>>,
    calls: RefCell<Vec<ReportRef>>,
    aborts: Cell<u32>,
    abandoned: Cell<u32>,
}

/// Counts fetches whose future was dropped before completing.
struct InFlight<'a> {
    abandoned: &'a Cell<u32>,
    finished: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.abandoned.set(self.abandoned.get() + 1);
        }
    }
}

impl FakeTransport {
    pub(crate) fn push_reply(&self, reply: FakeReply) {
        self.replies.borrow_mut().push_back(reply);
    }

    /// Holds the next fetch until the returned sender fires or is dropped.
    pub(crate) fn gate_next(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.gates.borrow_mut().push_back(rx);
        tx
    }

    pub(crate) fn calls(&self) -> Vec<ReportRef> {
        self.calls.borrow().clone()
    }

    pub(crate) fn aborts(&self) -> u32 {
        self.aborts.get()
    }

    pub(crate) fn abandoned(&self) -> u32 {
        self.abandoned.get()
    }
}

pub(crate) fn locator_for(report: &ReportRef) -> String {
    format!(
        "https://app.example.com/reportEmbed?reportId={}&groupId=G1",
        report.report_id
    )
}

#[async_trait(?Send)]
impl CredentialTransport for FakeTransport {
    async fn fetch_embed_credential(
        &self,
        report: &ReportRef,
    ) -> Result<EmbedTokenResponse, CredentialError> {
        self.calls.borrow_mut().push(report.clone());
        let mut in_flight = InFlight {
            abandoned: &self.abandoned,
            finished: false,
        };
        let gate = self.gates.borrow_mut().pop_front();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        let reply = self.replies.borrow_mut().pop_front();
        let result = match reply {
            Some(FakeReply::Ok(response)) => Ok(response),
            Some(FakeReply::Err(error)) => Err(error),
            Some(FakeReply::Hang) => futures::future::pending().await,
            None => Ok(EmbedTokenResponse {
                token: format!("token-{}", report.report_id),
                embed_url: locator_for(report),
                expiration: None,
            }),
        };
        in_flight.finished = true;
        result
    }

    fn abort_in_flight(&self) {
        self.aborts.set(self.aborts.get() + 1);
    }
}

#[derive(Default)]
pub(crate) struct RecordingObserver {
    pub(crate) phases: RefCell<Vec<(EmbedPhase, u8)>>,
    pub(crate) ready: RefCell<Vec<ReportRef>>,
    pub(crate) failed: RefCell<Vec<EmbedFailure>>,
    pub(crate) logs: Cell<usize>,
}

impl RecordingObserver {
    pub(crate) fn phase_list(&self) -> Vec<EmbedPhase> {
        self.phases.borrow().iter().map(|(phase, _)| *phase).collect()
    }

    pub(crate) fn terminal_count(&self) -> usize {
        self.ready.borrow().len() + self.failed.borrow().len()
    }
}

impl EmbedObserver for RecordingObserver {
    fn phase_changed(&self, phase: EmbedPhase, progress: u8) {
        self.phases.borrow_mut().push((phase, progress));
    }

    fn log_appended(&self, _entry: &crate::log::LogEntry) {
        self.logs.set(self.logs.get() + 1);
    }

    fn ready(&self, report: &ReportRef) {
        self.ready.borrow_mut().push(report.clone());
    }

    fn failed(&self, failure: &EmbedFailure) {
        self.failed.borrow_mut().push(failure.clone());
    }
}
