//! HTTP transport for `GET /embed-token/{reportId}?datasetId=...` on native
//! hosts. Browser hosts use the gloo-net transport in the web shell instead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{AbortHandle, AbortRegistration, Abortable};
use report_embed_core::config::resolve_backend_base_url;
use report_embed_core::{
    CredentialError, CredentialTransport, EmbedTokenResponse, PolicyError, ReportRef,
    embed_token_url,
};
use reqwest::StatusCode;
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_REQUEST_ATTEMPTS: usize = 1;

#[derive(Debug, Clone)]
pub struct EmbedTokenClientConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    /// Attempts per fetch for connection-level failures. HTTP error statuses
    /// are never repeated here; the controller owns retry policy.
    pub request_attempts: usize,
}

impl EmbedTokenClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            request_attempts: DEFAULT_REQUEST_ATTEMPTS,
        }
    }

    /// Base URL from `REPORT_EMBED_BACKEND_BASE_URL`, or the local default.
    pub fn from_env() -> Result<Self, EmbedClientError> {
        let (base_url, source) = resolve_backend_base_url().map_err(EmbedClientError::from)?;
        tracing::debug!(%base_url, source = source.as_str(), "resolved embed backend base url");
        Ok(Self::new(base_url))
    }
}

#[derive(Debug, Error)]
pub enum EmbedClientError {
    #[error("embed_client_base_url_missing")]
    BaseUrlMissing,
    #[error("embed_client_invalid_base_url")]
    InvalidBaseUrl,
    #[error("embed_token_request_failed:{message}")]
    Request { message: String },
    #[error("embed_token_read_failed:{message}")]
    Read { message: String },
    #[error("embed_token_http_{status}:{body}")]
    Http { status: StatusCode, body: String },
    #[error("embed_token_json_decode_failed:{message}")]
    Decode { message: String },
    #[error("embed_token_aborted")]
    Aborted,
}

impl From<PolicyError> for EmbedClientError {
    fn from(error: PolicyError) -> Self {
        match error {
            PolicyError::EmptyBaseUrl => Self::BaseUrlMissing,
            _ => Self::InvalidBaseUrl,
        }
    }
}

impl From<EmbedClientError> for CredentialError {
    fn from(error: EmbedClientError) -> Self {
        match error {
            EmbedClientError::Http { status, body } => Self::Http {
                status: status.as_u16(),
                body,
            },
            EmbedClientError::Decode { message } => Self::Decode { message },
            EmbedClientError::Aborted => Self::Aborted,
            other @ (EmbedClientError::BaseUrlMissing
            | EmbedClientError::InvalidBaseUrl
            | EmbedClientError::Request { .. }
            | EmbedClientError::Read { .. }) => Self::Request {
                message: other.to_string(),
            },
        }
    }
}

/// Abort handles for requests still awaiting a response.
#[derive(Debug, Default)]
struct InFlightRequests {
    next_id: AtomicU64,
    handles: Mutex<HashMap<u64, AbortHandle>>,
}

impl InFlightRequests {
    fn register(&self) -> (u64, AbortRegistration) {
        let (handle, registration) = AbortHandle::new_pair();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, handle);
        (id, registration)
    }

    fn finish(&self, id: u64) {
        self.lock().remove(&id);
    }

    fn abort_all(&self) -> usize {
        let drained: Vec<AbortHandle> = self.lock().drain().map(|(_, handle)| handle).collect();
        for handle in &drained {
            handle.abort();
        }
        drained.len()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, AbortHandle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes its request from the registry however the fetch ends.
struct InFlightGuard<'a> {
    requests: &'a InFlightRequests,
    id: u64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.requests.finish(self.id);
    }
}

#[derive(Debug, Clone)]
pub struct EmbedTokenClient {
    base_url: String,
    timeout: Duration,
    request_attempts: usize,
    http: reqwest::Client,
    in_flight: Arc<InFlightRequests>,
}

impl EmbedTokenClient {
    pub fn new(config: EmbedTokenClientConfig) -> Result<Self, EmbedClientError> {
        let base_url = report_embed_core::config::normalize_base_url(&config.base_url)?;
        Ok(Self {
            base_url,
            timeout: Duration::from_millis(config.timeout_ms.max(250)),
            request_attempts: config.request_attempts.max(1),
            http: reqwest::Client::new(),
            in_flight: Arc::new(InFlightRequests::default()),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn embed_token_url(&self, report: &ReportRef) -> Result<String, EmbedClientError> {
        embed_token_url(&self.base_url, report).map_err(EmbedClientError::from)
    }

    /// Fetches a token and signed locator for `report`. Dropping the future
    /// cancels the request; [`Self::abort_all`] cancels every pending one.
    pub async fn fetch_embed_token(
        &self,
        report: &ReportRef,
    ) -> Result<EmbedTokenResponse, EmbedClientError> {
        let url = self.embed_token_url(report)?;
        let (id, registration) = self.in_flight.register();
        let _guard = InFlightGuard {
            requests: &self.in_flight,
            id,
        };

        let (status, body) = Abortable::new(self.send_get(&url), registration)
            .await
            .map_err(|_| EmbedClientError::Aborted)??;
        decode_embed_token(status, &body)
    }

    /// Aborts every request still waiting on the backend and returns how many
    /// there were.
    pub fn abort_all(&self) -> usize {
        self.in_flight.abort_all()
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    async fn send_get(&self, url: &str) -> Result<(StatusCode, Vec<u8>), EmbedClientError> {
        let mut last_error: Option<String> = None;

        for attempt in 0..self.request_attempts {
            let request = self
                .http
                .get(url)
                .header("x-request-id", format!("req_{}", Uuid::new_v4().simple()))
                .header("accept", "application/json")
                .timeout(self.timeout);

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    let bytes =
                        response
                            .bytes()
                            .await
                            .map_err(|error| EmbedClientError::Read {
                                message: error.to_string(),
                            })?;
                    return Ok((status, bytes.to_vec()));
                }
                Err(error) => {
                    tracing::debug!(attempt, %error, "embed token request failed");
                    last_error = Some(error.to_string());
                    if attempt + 1 >= self.request_attempts {
                        break;
                    }
                }
            }
        }

        Err(EmbedClientError::Request {
            message: last_error.unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

#[async_trait(?Send)]
impl CredentialTransport for EmbedTokenClient {
    async fn fetch_embed_credential(
        &self,
        report: &ReportRef,
    ) -> Result<EmbedTokenResponse, CredentialError> {
        self.fetch_embed_token(report)
            .await
            .map_err(CredentialError::from)
    }

    fn abort_in_flight(&self) {
        let aborted = self.abort_all();
        if aborted > 0 {
            tracing::debug!(aborted, "aborted in-flight embed token requests");
        }
    }
}

pub fn format_http_error(status: StatusCode, body: &[u8]) -> EmbedClientError {
    let body = non_empty_string(String::from_utf8_lossy(body).to_string())
        .unwrap_or_else(|| "<empty>".to_string());
    EmbedClientError::Http { status, body }
}

fn decode_embed_token(status: StatusCode, bytes: &[u8]) -> Result<EmbedTokenResponse, EmbedClientError> {
    if !status.is_success() {
        return Err(format_http_error(status, bytes));
    }
    serde_json::from_slice::<EmbedTokenResponse>(bytes).map_err(|error| EmbedClientError::Decode {
        message: error.to_string(),
    })
}

fn non_empty_string(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn client(base_url: &str) -> EmbedTokenClient {
        EmbedTokenClient::new(EmbedTokenClientConfig::new(base_url)).expect("embed client")
    }

    /// Answers one request with `response` and hands back the raw request.
    async fn serve_once(response: String) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("address");
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut buffer = vec![0_u8; 8192];
            let read = socket.read(&mut buffer).await.expect("read request");
            socket
                .write_all(response.as_bytes())
                .await
                .expect("write response");
            let _ = socket.shutdown().await;
            String::from_utf8_lossy(&buffer[..read]).to_string()
        });
        (format!("http://{address}"), server)
    }

    fn http_response(status_line: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    #[test]
    fn embed_token_url_encodes_identifiers() {
        let client = client("https://reports.example.com/api/");
        assert_eq!(client.base_url(), "https://reports.example.com/api");
        assert_eq!(
            client
                .embed_token_url(&ReportRef::new("R 1", "D/1"))
                .expect("url"),
            "https://reports.example.com/api/embed-token/R%201?datasetId=D%2F1"
        );
    }

    #[test]
    fn base_url_missing_is_rejected() {
        let result = EmbedTokenClient::new(EmbedTokenClientConfig::new("   "));
        assert!(matches!(result, Err(EmbedClientError::BaseUrlMissing)));

        let result = EmbedTokenClient::new(EmbedTokenClientConfig::new("reports.example.com"));
        assert!(matches!(result, Err(EmbedClientError::InvalidBaseUrl)));
    }

    #[test]
    fn http_error_mapping_preserves_shape() {
        let error = format_http_error(StatusCode::BAD_GATEWAY, b" gateway failed ");
        assert_eq!(
            error.to_string(),
            "embed_token_http_502 Bad Gateway:gateway failed"
        );

        let empty_body = format_http_error(StatusCode::SERVICE_UNAVAILABLE, b" ");
        assert_eq!(
            CredentialError::from(empty_body),
            CredentialError::Http {
                status: 503,
                body: "<empty>".to_string()
            }
        );
    }

    #[test]
    fn client_errors_map_onto_credential_errors() {
        assert_eq!(
            CredentialError::from(EmbedClientError::Aborted),
            CredentialError::Aborted
        );
        assert_eq!(
            CredentialError::from(EmbedClientError::Request {
                message: "connection refused".to_string()
            }),
            CredentialError::Request {
                message: "embed_token_request_failed:connection refused".to_string()
            }
        );
        assert_eq!(
            CredentialError::from(EmbedClientError::Read {
                message: "connection reset".to_string()
            }),
            CredentialError::Request {
                message: "embed_token_read_failed:connection reset".to_string()
            }
        );
        assert!(matches!(
            CredentialError::from(EmbedClientError::Decode {
                message: "eof".to_string()
            }),
            CredentialError::Decode { .. }
        ));
    }

    #[test]
    fn decode_accepts_backend_payload_and_rejects_garbage() {
        let decoded = decode_embed_token(
            StatusCode::OK,
            br#"{"token":"t1","embedUrl":"https://app.powerbi.com/reportEmbed?reportId=R1","expiration":"2030-01-01T00:00:00Z"}"#,
        )
        .expect("decode");
        assert_eq!(decoded.token, "t1");
        assert_eq!(decoded.expiration.as_deref(), Some("2030-01-01T00:00:00Z"));

        let garbage = decode_embed_token(StatusCode::OK, b"<html>").expect_err("garbage");
        assert!(matches!(garbage, EmbedClientError::Decode { .. }));

        let not_found = decode_embed_token(StatusCode::NOT_FOUND, b"no such report")
            .expect_err("not found");
        assert!(matches!(
            not_found,
            EmbedClientError::Http { status, .. } if status == StatusCode::NOT_FOUND
        ));
    }

    #[test]
    fn abort_all_cancels_registered_requests() {
        let requests = InFlightRequests::default();
        let (first, registration) = requests.register();
        let (_second, _) = requests.register();
        assert_eq!(requests.len(), 2);

        requests.finish(first);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests.abort_all(), 1);
        assert_eq!(requests.len(), 0);

        // A pending future bound to an aborted registration resolves at once.
        let (handle, late) = AbortHandle::new_pair();
        handle.abort();
        let result = futures::executor::block_on(Abortable::new(
            futures::future::pending::<()>(),
            late,
        ));
        assert!(result.is_err());
        drop(registration);
    }

    #[tokio::test]
    async fn fetch_sends_request_id_and_decodes_success() {
        let body = r#"{"token":"tok","embedUrl":"https://app.powerbi.com/reportEmbed?reportId=R1&groupId=G1"}"#;
        let (base_url, server) = serve_once(http_response("200 OK", body)).await;

        let response = client(&base_url)
            .fetch_embed_token(&ReportRef::new("R1", "D1"))
            .await
            .expect("token");
        assert_eq!(response.token, "tok");

        let request = server.await.expect("server");
        assert!(request.starts_with("GET /embed-token/R1?datasetId=D1 HTTP/1.1"));
        assert!(request.to_ascii_lowercase().contains("x-request-id: req_"));
    }

    #[tokio::test]
    async fn fetch_maps_error_status_and_body() {
        let (base_url, server) =
            serve_once(http_response("503 Service Unavailable", "capacity paused")).await;

        let error = client(&base_url)
            .fetch_embed_credential(&ReportRef::new("R1", "D1"))
            .await
            .expect_err("http failure");
        assert_eq!(
            error,
            CredentialError::Http {
                status: 503,
                body: "capacity paused".to_string()
            }
        );
        server.await.expect("server");
    }

    #[tokio::test]
    async fn abort_all_cancels_a_hanging_fetch() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let base_url = format!("http://{}", listener.local_addr().expect("address"));
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.expect("accept");
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let client = client(&base_url);
        let task_client = client.clone();
        let fetch = tokio::spawn(async move {
            task_client
                .fetch_embed_token(&ReportRef::new("R1", "D1"))
                .await
        });
        while client.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(client.abort_all(), 1);
        let result = fetch.await.expect("join");
        assert!(matches!(result, Err(EmbedClientError::Aborted)));
        assert_eq!(client.in_flight(), 0);
        server.abort();
    }
}
