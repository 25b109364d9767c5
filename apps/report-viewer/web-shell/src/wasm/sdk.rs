use super::*;

/// Binding to the `powerbi-client` script loaded by the host page.
pub(super) struct PowerBiSdk {
    container: HtmlElement,
}

impl PowerBiSdk {
    pub(super) fn new(container: HtmlElement) -> Self {
        Self { container }
    }
}

impl EmbeddingSdk for PowerBiSdk {
    fn create_service(&self) -> Result<Rc<dyn EmbeddingService>, EmbedSdkError> {
        let window = web_sys::window()
            .ok_or_else(|| EmbedSdkError::Unavailable("window is unavailable".to_string()))?;
        // A fresh instance when the module is exposed; otherwise the
        // page-wide singleton the script installs.
        let service = construct_service(&window)
            .or_else(|| property(&window, POWERBI_SERVICE_GLOBAL))
            .ok_or_else(|| {
                EmbedSdkError::Unavailable("powerbi-client is not loaded".to_string())
            })?;
        Ok(Rc::new(PowerBiService {
            service,
            container: self.container.clone(),
        }))
    }
}

struct PowerBiService {
    service: JsValue,
    container: HtmlElement,
}

impl EmbeddingService for PowerBiService {
    fn embed(&self, config: &EmbedConfig) -> Result<Rc<dyn ReportHandle>, EmbedSdkError> {
        let encoded = serde_json::to_string(config)
            .map_err(|error| EmbedSdkError::EmbedRejected(error.to_string()))?;
        let config = js_sys::JSON::parse(&encoded)
            .map_err(|error| EmbedSdkError::EmbedRejected(js_message(&error)))?;
        let container: &JsValue = &self.container;
        let report = call_method(&self.service, "embed", &[container, &config])
            .map_err(|error| EmbedSdkError::EmbedRejected(js_message(&error)))?;
        Ok(Rc::new(PowerBiReport {
            report,
            handlers: RefCell::new(HashMap::new()),
        }))
    }

    fn reset(&self) -> Result<(), EmbedSdkError> {
        let container: &JsValue = &self.container;
        call_method(&self.service, "reset", &[container])
            .map(|_| ())
            .map_err(|error| EmbedSdkError::Reset(js_message(&error)))
    }

    fn has_embed(&self) -> bool {
        let container: &JsValue = &self.container;
        // `get` throws when nothing is embedded in the element.
        call_method(&self.service, "get", &[container])
            .is_ok_and(|embed| !embed.is_undefined() && !embed.is_null())
    }
}

/// One embedded report. Keeps each registered closure alive until the
/// matching `off`.
struct PowerBiReport {
    report: JsValue,
    handlers: RefCell<HashMap<WidgetEventKind, Closure<dyn FnMut(JsValue)>>>,
}

impl ReportHandle for PowerBiReport {
    fn on(&self, kind: WidgetEventKind, mut handler: WidgetEventHandler) -> Result<(), EmbedSdkError> {
        if self.handlers.borrow().contains_key(&kind) {
            self.off(kind)?;
        }
        let closure = Closure::wrap(Box::new(move |event: JsValue| {
            handler(widget_event(kind, &event));
        }) as Box<dyn FnMut(JsValue)>);
        call_method(
            &self.report,
            "on",
            &[&JsValue::from_str(kind.as_str()), closure.as_ref()],
        )
        .map_err(|error| EmbedSdkError::Handler(js_message(&error)))?;
        self.handlers.borrow_mut().insert(kind, closure);
        Ok(())
    }

    fn off(&self, kind: WidgetEventKind) -> Result<(), EmbedSdkError> {
        let result = call_method(&self.report, "off", &[&JsValue::from_str(kind.as_str())]);
        self.handlers.borrow_mut().remove(&kind);
        result
            .map(|_| ())
            .map_err(|error| EmbedSdkError::Handler(js_message(&error)))
    }
}

fn construct_service(window: &JsValue) -> Option<JsValue> {
    let client = property(window, POWERBI_CLIENT_GLOBAL)?;
    let constructor = property(&property(&client, "service")?, "Service")?
        .dyn_into::<js_sys::Function>()
        .ok()?;
    let factories = property(&client, "factories")?;
    let args = js_sys::Array::of3(
        &property(&factories, "hpmFactory")?,
        &property(&factories, "wpmpFactory")?,
        &property(&factories, "routerFactory")?,
    );
    js_sys::Reflect::construct(&constructor, &args).ok()
}

fn widget_event(kind: WidgetEventKind, event: &JsValue) -> WidgetEvent {
    match kind {
        WidgetEventKind::Loaded => WidgetEvent::Loaded,
        WidgetEventKind::Rendered => WidgetEvent::Rendered,
        WidgetEventKind::Error => WidgetEvent::Error {
            message: error_detail(event),
        },
    }
}

fn error_detail(event: &JsValue) -> String {
    let Some(detail) = property(event, "detail") else {
        return "report widget error".to_string();
    };
    if let Some(text) = detail.as_string() {
        return text;
    }
    let message = property(&detail, "message").and_then(|value| value.as_string());
    let detailed = property(&detail, "detailedMessage").and_then(|value| value.as_string());
    match (message, detailed) {
        (Some(message), Some(detailed)) if message != detailed => format!("{message}: {detailed}"),
        (Some(message), _) => message,
        (None, Some(detailed)) => detailed,
        (None, None) => "report widget error".to_string(),
    }
}

fn property(target: &JsValue, name: &str) -> Option<JsValue> {
    js_sys::Reflect::get(target, &JsValue::from_str(name))
        .ok()
        .filter(|value| !value.is_undefined() && !value.is_null())
}

fn call_method(target: &JsValue, name: &str, args: &[&JsValue]) -> Result<JsValue, JsValue> {
    let method = js_sys::Reflect::get(target, &JsValue::from_str(name))?
        .dyn_into::<js_sys::Function>()?;
    let list = js_sys::Array::new();
    for arg in args {
        list.push(arg);
    }
    method.apply(target, &list)
}

fn js_message(value: &JsValue) -> String {
    value
        .as_string()
        .or_else(|| property(value, "message").and_then(|message| message.as_string()))
        .unwrap_or_else(|| format!("{value:?}"))
}
