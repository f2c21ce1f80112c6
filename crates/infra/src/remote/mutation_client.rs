//! reqwest-backed implementation of the remote mutation port.
//!
//! Each action is POSTed as JSON to `{base_url}/actions/{action_type}` with
//! the action id in the `Idempotency-Key` header. The response status is
//! the only input to failure classification.

use async_trait::async_trait;
use offsync_core::{RemoteAck, RemoteMutationApi};
use offsync_domain::constants::IDEMPOTENCY_KEY_HEADER;
use offsync_domain::{ActionType, ErrorClass, RemoteConfig, RemoteError, Result};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::http::HttpClient;

/// Longest slice of an error response body kept in the failure reason
const MAX_BODY_EXCERPT: usize = 200;

/// Optional acknowledgement body returned on success.
#[derive(Debug, Default, Deserialize)]
struct AckBody {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    replayed: bool,
}

pub struct HttpMutationClient {
    http: HttpClient,
    base_url: String,
}

impl HttpMutationClient {
    pub fn new(http: HttpClient, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    /// Build a client with its own HTTP stack from remote configuration.
    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        let mut builder = HttpClient::builder()
            .timeout(config.timeout())
            .user_agent(concat!("offsync/", env!("CARGO_PKG_VERSION")));
        if let Some(token) = &config.api_token {
            builder = builder.bearer_token(token.clone());
        }
        Ok(Self::new(builder.build()?, config.base_url.clone()))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, action_type: &ActionType) -> String {
        format!("{}/actions/{}", self.base_url, action_type)
    }
}

#[async_trait]
impl RemoteMutationApi for HttpMutationClient {
    #[instrument(skip(self, payload), fields(action_type = %action_type))]
    async fn apply(
        &self,
        idempotency_key: &str,
        action_type: &ActionType,
        payload: &Value,
    ) -> std::result::Result<RemoteAck, RemoteError> {
        let request = self
            .http
            .request(Method::POST, self.endpoint(action_type))
            .header(IDEMPOTENCY_KEY_HEADER, idempotency_key)
            .json(payload);

        let response = self.http.send(request).await.map_err(classify_transport_error)?;
        let status = response.status();

        match classify_status(status) {
            None => {
                let body = response.text().await.unwrap_or_default();
                let ack: AckBody = if body.trim().is_empty() {
                    AckBody::default()
                } else {
                    serde_json::from_str(&body).unwrap_or_else(|err| {
                        debug!(error = %err, "Ignoring unparseable acknowledgement body");
                        AckBody::default()
                    })
                };
                debug!(%status, replayed = ack.replayed, "Remote accepted mutation");
                Ok(RemoteAck { remote_id: ack.id, replayed: ack.replayed })
            }
            Some(class) => {
                let body = response.text().await.unwrap_or_default();
                let reason = failure_reason(status, &body);
                warn!(%status, class = %class, "Remote rejected mutation");
                Err(match class {
                    ErrorClass::Transient => RemoteError::Transient(reason),
                    ErrorClass::Permanent => RemoteError::Permanent(reason),
                })
            }
        }
    }
}

/// Failure class for a response status; `None` means success.
///
/// 408, 425, 429 and 5xx are worth retrying. Every other non-2xx status,
/// including 409 duplicate conflicts, is a rejection of the action itself.
pub fn classify_status(status: StatusCode) -> Option<ErrorClass> {
    if status.is_success() {
        return None;
    }
    match status.as_u16() {
        408 | 425 | 429 | 500..=599 => Some(ErrorClass::Transient),
        _ => Some(ErrorClass::Permanent),
    }
}

fn classify_transport_error(err: reqwest::Error) -> RemoteError {
    if err.is_builder() {
        return RemoteError::Permanent(format!("request could not be built: {err}"));
    }
    if err.is_timeout() {
        return RemoteError::Transient("HTTP request timed out".to_string());
    }
    if err.is_connect() {
        return RemoteError::Transient(format!("HTTP connection failure: {err}"));
    }
    RemoteError::Transient(err.to_string())
}

fn failure_reason(status: StatusCode, body: &str) -> String {
    let label = format!("HTTP {} {}", status.as_u16(), status.canonical_reason().unwrap_or("unknown status"));
    let body = body.trim();
    if body.is_empty() {
        return label;
    }
    let excerpt: String = body.chars().take(MAX_BODY_EXCERPT).collect();
    format!("{label}: {excerpt}")
}
