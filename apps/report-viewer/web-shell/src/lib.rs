#[cfg(any(target_arch = "wasm32", test))]
mod viewer_state;
#[cfg(target_arch = "wasm32")]
mod wasm_constants;

#[cfg(target_arch = "wasm32")]
mod wasm {
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;
    use std::rc::Rc;
    use std::time::Duration;

    use async_trait::async_trait;
    use futures_util::FutureExt;
    use futures_util::future::LocalBoxFuture;
    use gloo_net::http::Request;
    use report_embed_core::{
        ArtifactSignature, CredentialError, CredentialTransport, EmbedClock, EmbedConfig,
        EmbedController, EmbedDeps, EmbedFailure, EmbedObserver, EmbedPhase, EmbedSdkError,
        EmbedSurface, EmbedTokenResponse, EmbeddingSdk, EmbeddingService, ReportHandle,
        ReportRef, WidgetEvent, WidgetEventHandler, WidgetEventKind, embed_token_url,
    };
    use wasm_bindgen::JsCast;
    use wasm_bindgen::prelude::*;
    use wasm_bindgen_futures::spawn_local;
    use web_sys::{AbortController, Document, HtmlElement};

    use crate::viewer_state::{StatusView, ViewerOptions, selector_list};
    use crate::wasm_constants::*;

    mod dom;
    mod lifecycle;
    mod network;
    mod sdk;

    use dom::DomSurface;
    use lifecycle::{StatusObserver, WebClock};
    use network::BrowserTransport;
    use sdk::PowerBiSdk;

    #[wasm_bindgen(start)]
    pub fn boot() {
        console_error_panic_hook::set_once();
        lifecycle::update_status_dom(DEFAULT_STATUS_ELEMENT_ID, &StatusView::default());
    }

    /// Browser host for one embedded report. Commands spawn their session
    /// work on the page's local executor and return immediately.
    #[wasm_bindgen]
    pub struct ReportViewer {
        controller: EmbedController,
        status: Rc<StatusObserver>,
    }

    #[wasm_bindgen]
    impl ReportViewer {
        #[wasm_bindgen(constructor)]
        pub fn new(
            report_id: String,
            dataset_id: String,
            options_json: String,
        ) -> Result<ReportViewer, JsValue> {
            let options = ViewerOptions::from_json(&options_json)
                .map_err(|error| JsValue::from_str(&error.to_string()))?;
            let surface = DomSurface::locate(&options.container_id)
                .map_err(|error| JsValue::from_str(&error))?;
            let deps = EmbedDeps {
                sdk: Rc::new(PowerBiSdk::new(surface.container())),
                surface: Rc::new(surface),
                transport: Rc::new(BrowserTransport::new(options.backend_base_url.clone())),
                clock: Rc::new(WebClock),
            };
            let controller = EmbedController::new(
                ReportRef::new(report_id, dataset_id),
                deps,
                options.policy,
            )
            .map_err(|error| JsValue::from_str(&error.to_string()))?;
            let status = Rc::new(StatusObserver::new(options.status_id));
            controller.add_observer(status.clone());
            Ok(Self { controller, status })
        }

        pub fn start(&self) {
            spawn_local(self.controller.start());
        }

        pub fn retry(&self) -> Result<(), JsValue> {
            let task = self
                .controller
                .retry()
                .map_err(|error| JsValue::from_str(&error.to_string()))?;
            spawn_local(task);
            Ok(())
        }

        pub fn reset(&self, report_id: String, dataset_id: String) {
            spawn_local(
                self.controller
                    .reset(ReportRef::new(report_id, dataset_id)),
            );
        }

        pub fn dispose(&self) {
            self.controller.dispose();
        }

        /// Registers `callback(statusJson)` for every phase change and
        /// terminal notification.
        pub fn on_status(&self, callback: js_sys::Function) {
            self.status.set_callback(Some(callback));
        }

        pub fn phase(&self) -> String {
            self.controller.phase().as_str().to_string()
        }

        pub fn progress(&self) -> u8 {
            self.controller.progress()
        }

        pub fn error_message(&self) -> Option<String> {
            self.controller.error_message()
        }

        pub fn can_retry(&self) -> bool {
            self.controller.can_retry()
        }

        pub fn attempt(&self) -> u32 {
            self.controller.attempt()
        }

        pub fn logs_json(&self) -> String {
            serde_json::to_string(&self.controller.logs()).unwrap_or_else(|_| "[]".to_string())
        }

        pub fn snapshot_json(&self) -> String {
            serde_json::to_string(&self.controller.snapshot())
                .unwrap_or_else(|_| "{}".to_string())
        }
    }

    impl Drop for ReportViewer {
        fn drop(&mut self) {
            self.controller.dispose();
        }
    }
}

#[cfg(target_arch = "wasm32")]
pub use wasm::ReportViewer;

#[cfg(not(target_arch = "wasm32"))]
pub fn viewer_status_json() -> String {
    "{\"phase\":\"idle\",\"detail\":\"report viewer requires wasm32 target\"}".to_string()
}
