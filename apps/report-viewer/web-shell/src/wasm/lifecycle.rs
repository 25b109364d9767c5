use super::*;

pub(super) struct WebClock;

impl EmbedClock for WebClock {
    fn now_unix_ms(&self) -> u64 {
        web_time::SystemTime::now()
            .duration_since(web_time::UNIX_EPOCH)
            .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
    }

    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        gloo_timers::future::sleep(duration).boxed_local()
    }
}

/// Mirrors controller notifications into the page status element and an
/// optional host callback.
pub(super) struct StatusObserver {
    status_id: Option<String>,
    view: RefCell<StatusView>,
    callback: RefCell<Option<js_sys::Function>>,
}

impl StatusObserver {
    pub(super) fn new(status_id: Option<String>) -> Self {
        Self {
            status_id,
            view: RefCell::new(StatusView::default()),
            callback: RefCell::new(None),
        }
    }

    pub(super) fn set_callback(&self, callback: Option<js_sys::Function>) {
        *self.callback.borrow_mut() = callback;
    }

    fn publish(&self) {
        let view = self.view.borrow().clone();
        if let Some(status_id) = self.status_id.as_deref() {
            update_status_dom(status_id, &view);
        }
        let callback = self.callback.borrow().clone();
        if let Some(callback) = callback {
            let payload = serde_json::to_string(&view).unwrap_or_else(|_| "{}".to_string());
            if let Err(error) = callback.call1(&JsValue::NULL, &JsValue::from_str(&payload)) {
                web_sys::console::warn_2(&JsValue::from_str("report status callback failed"), &error);
            }
        }
    }
}

impl EmbedObserver for StatusObserver {
    fn phase_changed(&self, phase: EmbedPhase, progress: u8) {
        self.view.borrow_mut().apply_phase(phase, progress);
        self.publish();
    }

    fn ready(&self, report: &ReportRef) {
        web_sys::console::info_1(&JsValue::from_str(&format!(
            "report {} rendered",
            report.report_id
        )));
    }

    fn failed(&self, failure: &EmbedFailure) {
        self.view.borrow_mut().apply_failure(failure);
        self.publish();
    }
}

pub(super) fn update_status_dom(status_id: &str, view: &StatusView) {
    if let Some(window) = web_sys::window() {
        if let Some(document) = window.document() {
            if let Some(status) = document.get_element_by_id(status_id) {
                if let Ok(status) = status.dyn_into::<HtmlElement>() {
                    status.set_inner_text(&view.line());
                    let color = if view.is_error() {
                        STATUS_COLOR_ERROR
                    } else {
                        STATUS_COLOR_OK
                    };
                    let _ = status.style().set_property("color", color);
                }
            }
        }
    }
}
