use super::*;

/// Token endpoint over `fetch`. Each request owns an `AbortController`;
/// dropping the request future aborts only that request.
pub(super) struct BrowserTransport {
    base_url: String,
    next_request: Cell<u64>,
    in_flight: RefCell<HashMap<u64, AbortController>>,
}

impl BrowserTransport {
    pub(super) fn new(base_url: String) -> Self {
        Self {
            base_url,
            next_request: Cell::new(1),
            in_flight: RefCell::new(HashMap::new()),
        }
    }

    fn register(&self) -> Result<InFlight<'_>, CredentialError> {
        let controller = AbortController::new().map_err(|_| CredentialError::Request {
            message: "abort controller is unavailable".to_string(),
        })?;
        let id = self.next_request.get();
        self.next_request.set(id.saturating_add(1));
        self.in_flight.borrow_mut().insert(id, controller.clone());
        Ok(InFlight {
            transport: self,
            id,
            controller,
            finished: false,
        })
    }
}

struct InFlight<'a> {
    transport: &'a BrowserTransport,
    id: u64,
    controller: AbortController,
    finished: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.transport.in_flight.borrow_mut().remove(&self.id);
        if !self.finished {
            self.controller.abort();
        }
    }
}

#[async_trait(?Send)]
impl CredentialTransport for BrowserTransport {
    async fn fetch_embed_credential(
        &self,
        report: &ReportRef,
    ) -> Result<EmbedTokenResponse, CredentialError> {
        let url = embed_token_url(&self.base_url, report).map_err(|error| {
            CredentialError::Request {
                message: error.to_string(),
            }
        })?;
        let mut in_flight = self.register()?;
        let signal = in_flight.controller.signal();
        let request_id = format!("req_{}", uuid::Uuid::new_v4().simple());

        let response = Request::get(&url)
            .header("accept", "application/json")
            .header(REQUEST_ID_HEADER, &request_id)
            .abort_signal(Some(&signal))
            .send()
            .await
            .map_err(map_request_error)?;
        let status = response.status();
        let raw = response.text().await.map_err(map_request_error)?;
        in_flight.finished = true;

        if !(200..=299).contains(&status) {
            return Err(CredentialError::Http { status, body: raw });
        }
        serde_json::from_str::<EmbedTokenResponse>(&raw).map_err(|error| {
            CredentialError::Decode {
                message: error.to_string(),
            }
        })
    }

    fn abort_in_flight(&self) {
        let aborted = self
            .in_flight
            .borrow_mut()
            .drain()
            .map(|(_, controller)| controller)
            .collect::<Vec<_>>();
        for controller in aborted {
            controller.abort();
        }
    }
}

fn map_request_error(error: gloo_net::Error) -> CredentialError {
    let message = error.to_string();
    if message.contains("AbortError") {
        CredentialError::Aborted
    } else {
        CredentialError::Request { message }
    }
}
